//! Recovery subcommand handlers for Maestro.
//!
//! The CLI owns no live engine, so recovery from here is always a dry run.

use maestro_checkpoint::{RecoveryManager, RecoveryOptions, RecoveryResult};
use maestro_config::Config;

use crate::cli::RecoveryAction;
use crate::open_services;

/// Handle recovery subcommands.
pub(crate) async fn handle_recovery_command(
    action: RecoveryAction,
    config: &Config,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let services = open_services(config).await?;
    let recovery = RecoveryManager::new(services.manager, config.checkpoint.recovery.clone());

    match action {
        RecoveryAction::Points => recovery_points(&recovery, format).await,
        RecoveryAction::Status { id } => recovery_status(&recovery, &id, format).await,
        RecoveryAction::Plan {
            id,
            skip_failed_agent,
            reset_to_state,
            replay_mode,
        } => {
            let id = match id {
                Some(id) => id,
                None => match recovery.checkpoint_manager().get_latest_checkpoint().await? {
                    Some(cp) => cp.id.to_string(),
                    None => {
                        println!("No active checkpoint to recover from.");
                        return Ok(());
                    }
                },
            };

            let options = RecoveryOptions {
                checkpoint_id: id,
                skip_failed_agent,
                reset_to_state,
                replay_mode,
                dry_run: true,
            };
            recovery_plan(&recovery, options, format).await
        }
    }
}

async fn recovery_points(
    recovery: &RecoveryManager,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let points = recovery.list_recovery_points().await?;

    if points.is_empty() {
        println!("No recovery points found.");
        return Ok(());
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&points)?);
        }
        _ => {
            println!(
                "{:<38} {:<20} {:<17} {:<20} {}",
                "ID", "CREATED", "TRIGGER", "STATE", "RESUME"
            );
            println!("{}", "-".repeat(104));
            for p in points {
                println!(
                    "{:<38} {:<20} {:<17} {:<20} {}",
                    p.id.to_string(),
                    p.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    p.trigger.to_string(),
                    p.state,
                    if p.can_resume { "yes" } else { "no" }
                );
            }
        }
    }

    Ok(())
}

async fn recovery_status(
    recovery: &RecoveryManager,
    id: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let status = recovery.get_recovery_status(id).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Checkpoint:  {}", id);
    println!("Recoverable: {}", if status.can_recover { "yes" } else { "no" });
    if !status.blockers.is_empty() {
        println!("\nBlockers:");
        for blocker in &status.blockers {
            println!("  - {}", blocker);
        }
    }
    if !status.suggestions.is_empty() {
        println!("\nSuggestions:");
        for suggestion in &status.suggestions {
            println!("  - {}", suggestion);
        }
    }
    Ok(())
}

async fn recovery_plan(
    recovery: &RecoveryManager,
    options: RecoveryOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = recovery.recover(options).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    print_plan(&result);
    Ok(())
}

fn print_plan(result: &RecoveryResult) {
    if let Some(cp) = &result.checkpoint {
        println!("Checkpoint:  {}", cp.id);
    }
    println!("Would succeed: {}", if result.success { "yes" } else { "no" });
    if let Some(state) = &result.restored_state {
        println!("Target state:  {}", state);
    }
    if !result.skipped_agents.is_empty() {
        println!("Skipped:       {}", result.skipped_agents.join(", "));
    }
    for warning in &result.warnings {
        println!("  warning: {}", warning);
    }
    for error in &result.errors {
        println!("  error: {}", error);
    }
}
