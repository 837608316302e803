//! Maestro - checkpoint and recovery tooling for workflow orchestration
//!
//! Main entry point for the Maestro CLI.

mod cli;
mod cmd_checkpoint;
mod cmd_recovery;

use std::sync::Arc;

use clap::Parser;
use tracing::{debug, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use maestro_checkpoint::{CheckpointError, CheckpointManager, FileCheckpointStore};
use maestro_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};

use cli::{Cli, Commands};

/// Store and manager opened from the configuration.
pub(crate) struct Services {
    pub store: Arc<FileCheckpointStore>,
    pub manager: Arc<CheckpointManager>,
}

pub(crate) async fn open_services(config: &Config) -> Result<Services, CheckpointError> {
    let store = Arc::new(FileCheckpointStore::new(config.checkpoint.store.clone()).await?);
    let manager = Arc::new(CheckpointManager::new(
        config.checkpoint.manager.clone(),
        store.clone(),
    ));
    Ok(Services { store, manager })
}

/// Initialize tracing with console and optional file output.
///
/// Log files are written to the configured directory with daily rotation.
/// Console output goes to stderr so JSON output on stdout stays parseable.
fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console = fmt::layer()
        .with_target(true)
        .with_ansi(true)
        .with_writer(std::io::stderr);

    let file = if logging.file {
        std::fs::create_dir_all(&logging.directory)?;
        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("maestro")
            .filename_suffix("log")
            .max_log_files(30)
            .build(&logging.directory)?;

        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // The worker flushes on drop; keep it for the life of the process.
        static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
            std::sync::OnceLock::new();
        let _ = GUARD.set(guard);

        Some(fmt::layer().with_writer(non_blocking).with_ansi(false).boxed())
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = ConfigLoader::load_or_default(cli.config.as_deref())?;
    if let Some(base_path) = &cli.base_path {
        config.checkpoint.store.base_path = base_path.clone();
    }
    Ok(config)
}

async fn run(cli: Cli, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Checkpoint { action } => {
            cmd_checkpoint::handle_checkpoint_command(action, &config, &cli.format).await
        }
        Commands::Recovery { action } => {
            cmd_recovery::handle_recovery_command(action, &config, &cli.format).await
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    init_tracing(&config.logging)?;

    let validation = ConfigValidator::validate(&config)?;
    for warning in &validation.warnings {
        warn!("Config {}: {}", warning.path, warning.message);
    }
    validation.ensure_valid()?;
    debug!("Using checkpoint directory {:?}", config.checkpoint.store.base_path);

    if let Err(e) = run(cli, config).await {
        match e.downcast_ref::<CheckpointError>() {
            Some(err) => eprintln!("error[{}]: {}", err.code(), err),
            None => eprintln!("error: {}", e),
        }
        std::process::exit(1);
    }

    Ok(())
}
