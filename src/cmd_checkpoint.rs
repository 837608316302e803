//! Checkpoint subcommand handlers for Maestro.

use tracing::info;

use maestro_checkpoint::{Checkpoint, CheckpointIndexEntry, CheckpointStatus, CheckpointStore};
use maestro_config::Config;

use crate::cli::CheckpointAction;
use crate::open_services;

/// Handle checkpoint subcommands.
pub(crate) async fn handle_checkpoint_command(
    action: CheckpointAction,
    config: &Config,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        CheckpointAction::List { all } => checkpoint_list(config, all, format).await,
        CheckpointAction::Show { id } => checkpoint_show(config, &id, format).await,
        CheckpointAction::Stats => checkpoint_stats(config, format).await,
        CheckpointAction::Validate { id } => checkpoint_validate(config, &id).await,
        CheckpointAction::Archive { id } => checkpoint_archive(config, &id).await,
        CheckpointAction::Delete { id } => checkpoint_delete(config, &id).await,
        CheckpointAction::Prune => checkpoint_prune(config).await,
        CheckpointAction::Reindex => checkpoint_reindex(config).await,
    }
}

/// List checkpoints from the index.
async fn checkpoint_list(
    config: &Config,
    all: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let services = open_services(config).await?;
    let mut entries: Vec<CheckpointIndexEntry> = services
        .store
        .list_entries()
        .await?
        .into_iter()
        .filter(|e| all || e.status == CheckpointStatus::Active)
        .collect();
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    if entries.is_empty() {
        println!("No checkpoints found.");
        return Ok(());
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            println!(
                "{:<38} {:<20} {:<17} {:<9} {:<20} {:<7} {}",
                "ID", "CREATED", "TRIGGER", "STATUS", "STATE", "RESUME", "SIZE"
            );
            println!("{}", "-".repeat(120));
            for e in entries {
                println!(
                    "{:<38} {:<20} {:<17} {:<9} {:<20} {:<7} {}",
                    e.id.to_string(),
                    e.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    e.trigger.to_string(),
                    e.status.to_string(),
                    e.state,
                    if e.can_resume { "yes" } else { "no" },
                    format_size(e.size)
                );
            }
        }
    }

    Ok(())
}

/// Show a single checkpoint.
async fn checkpoint_show(
    config: &Config,
    id: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let services = open_services(config).await?;
    let Some(cp) = services.manager.get_checkpoint(id).await? else {
        println!("Checkpoint not found: {}", id);
        return Ok(());
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&cp)?);
        return Ok(());
    }

    print_checkpoint(&cp);
    Ok(())
}

fn print_checkpoint(cp: &Checkpoint) {
    println!("Checkpoint: {}", cp.id);
    println!("{}", "=".repeat(50));
    println!("Created:     {}", cp.created_at.to_rfc3339());
    println!("Trigger:     {}", cp.trigger);
    println!("Status:      {}", cp.status);
    println!("State:       {}", cp.workflow.current_state);
    if let Some(target) = &cp.workflow.rollback_target {
        println!("Rollback:    {}", target);
    }
    println!("Size:        {}", format_size(cp.metadata.checkpoint_size));
    println!("Resumable:   {}", cp.recovery.can_resume);
    for blocker in &cp.recovery.blockers {
        println!("  ! {}", blocker);
    }

    println!("\nHistory:");
    for entry in &cp.workflow.state_history {
        let exited = entry
            .exited_at
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<20} {} -> {:<8} ({})",
            entry.state,
            entry.entered_at.format("%H:%M:%S"),
            exited,
            entry.trigger
        );
    }

    println!("\nAgents:");
    for agent in &cp.agents {
        let tokens = agent
            .token_usage
            .map(|u| format!(" [{} in / {} out tokens]", u.input_tokens, u.output_tokens))
            .unwrap_or_default();
        println!(
            "  - {:<20} {:<10} attempts={}{}",
            agent.agent_id,
            agent.status.to_string(),
            agent.attempts,
            tokens
        );
    }

    println!("\nContext:");
    println!("  Project:  {}", cp.context.project_id);
    println!("  Session:  {}", cp.context.session_id);
    println!("  Task:     {}", cp.context.task_description);
    if !cp.context.lessons.is_empty() {
        println!("  Lessons:");
        for lesson in &cp.context.lessons {
            println!("    - {}", lesson);
        }
    }
    if !cp.context.decisions.is_empty() {
        println!("  Decisions:");
        for d in &cp.context.decisions {
            println!("    - {} ({})", d.decision, d.rationale);
        }
    }
}

/// Show store statistics.
async fn checkpoint_stats(config: &Config, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let services = open_services(config).await?;
    let stats = services.manager.stats().await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let when = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
    };
    println!("Directory:   {}", services.store.base_path().display());
    println!("Checkpoints: {}", stats.count);
    println!("Total size:  {}", format_size(stats.total_size));
    println!("Oldest:      {}", when(stats.oldest_checkpoint));
    println!("Newest:      {}", when(stats.newest_checkpoint));
    Ok(())
}

/// Run semantic validation.
async fn checkpoint_validate(config: &Config, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let services = open_services(config).await?;
    let cp = services.manager.validate_checkpoint(id).await?;
    println!(
        "Checkpoint {} is valid (state {}, {} agents)",
        cp.id,
        cp.workflow.current_state,
        cp.agents.len()
    );
    Ok(())
}

async fn checkpoint_archive(config: &Config, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let services = open_services(config).await?;
    let cp = services.manager.archive_checkpoint(id).await?;
    info!("Archived checkpoint {}", cp.id);
    println!("Archived checkpoint {}", cp.id);
    Ok(())
}

async fn checkpoint_delete(config: &Config, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let services = open_services(config).await?;
    if services.manager.delete_checkpoint(id).await? {
        info!("Deleted checkpoint {}", id);
        println!("Deleted checkpoint {}", id);
    } else {
        println!("Checkpoint not found: {}", id);
    }
    Ok(())
}

/// Apply retention.
async fn checkpoint_prune(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let services = open_services(config).await?;
    let deleted = services.manager.apply_retention().await?;
    println!(
        "Removed {} checkpoints (retention {} days, keep at most {})",
        deleted, config.checkpoint.manager.retention_days, config.checkpoint.manager.max_checkpoints
    );
    Ok(())
}

/// Rebuild the index by scanning the directory.
async fn checkpoint_reindex(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let services = open_services(config).await?;
    let count = services.store.rebuild_index().await?;
    println!("Index rebuilt with {} checkpoints", count);
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
