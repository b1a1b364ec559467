use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use daemon::cli::RunArgs;
use engine::control::{
    ControlError, CreateBackupRequest, RemoteRestoreKind, RemoteRestoreRequest,
    RestoreBackupRequest,
};
use engine::Engine;
use serde::Serialize;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "archivist",
    about = "Backup, restore and scheduling for the reservation backend",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create, list, restore and delete backup archives
    #[command(subcommand)]
    Backup(BackupCommands),

    /// Run the scheduler daemon in the foreground
    Run(RunArgs),

    /// Start the scheduler daemon in the background
    Start(RunArgs),

    /// Stop the scheduler daemon
    Stop,

    /// Restart the scheduler daemon
    Restart(RunArgs),

    /// Get the status of the scheduler daemon
    Status,

    /// Inspect the effective configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum BackupCommands {
    /// Create a full backup and upload it
    Create {
        /// Leave the source tree out of the archive
        #[arg(long)]
        no_code: bool,
        /// Leave the database out of the archive
        #[arg(long)]
        no_db: bool,
        /// Database engine to snapshot (postgres or sqlite)
        #[arg(long)]
        engine: Option<String>,
    },

    /// List local archives, or the remote folder with --remote
    List {
        #[arg(long)]
        remote: bool,
    },

    /// Restore a local archive
    Restore {
        file: String,
        #[arg(long)]
        no_code: bool,
        #[arg(long)]
        no_db: bool,
    },

    /// Download an archive from remote storage and restore it
    RestoreRemote {
        file: String,
        #[arg(long = "type", value_enum, default_value_t = RestoreScope::Total)]
        scope: RestoreScope,
    },

    /// Print the local path of an archive
    Download { file: String },

    /// Delete a local archive, or the remote copy with --remote
    Delete {
        file: String,
        #[arg(long)]
        remote: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the configuration with secrets masked
    Show,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RestoreScope {
    /// Code and database
    Total,
    /// Database only
    Base,
    /// Code only
    Backend,
}

impl From<RestoreScope> for RemoteRestoreKind {
    fn from(scope: RestoreScope) -> Self {
        match scope {
            RestoreScope::Total => RemoteRestoreKind::Total,
            RestoreScope::Base => RemoteRestoreKind::Base,
            RestoreScope::Backend => RemoteRestoreKind::Backend,
        }
    }
}

fn init_logging() -> Result<()> {
    let logger = env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .format_level(true)
        .format_module_path(false)
        .format_indent(Some(4))
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .build();
    let max_level = logger.filter();

    // Errors are forwarded to Sentry as well when a client is bound
    let logger = sentry_log::SentryLogger::with_dest(logger);
    log::set_logger(Box::leak(Box::new(logger))).context("Logger already initialised")?;
    log::set_max_level(max_level);
    Ok(())
}

/// Prints a control-surface response as JSON, or its error body on stderr
fn emit<T: Serialize>(result: Result<T, ControlError>) -> Result<()> {
    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", serde_json::to_string_pretty(&e.body())?);
            bail!("request failed with status {}", e.status())
        }
    }
}

async fn load_engine() -> Result<Engine> {
    let config = common::config::load_config().context("Failed to load configuration")?;
    Engine::from_config(&config)
        .await
        .context("Failed to set up the backup engine")
}

async fn backup(command: BackupCommands) -> Result<()> {
    let engine = load_engine().await?;
    match command {
        BackupCommands::Create {
            no_code,
            no_db,
            engine: db_engine,
        } => emit(
            engine
                .create(CreateBackupRequest {
                    include_backend: Some(!no_code),
                    include_db: Some(!no_db),
                    db_engine,
                })
                .await,
        ),
        BackupCommands::List { remote: false } => emit(engine.list_local().await),
        BackupCommands::List { remote: true } => emit(engine.list_remote().await),
        BackupCommands::Restore {
            file,
            no_code,
            no_db,
        } => emit(
            engine
                .restore(RestoreBackupRequest {
                    backup_file: file,
                    restore_code: Some(!no_code),
                    restore_db: Some(!no_db),
                })
                .await,
        ),
        BackupCommands::RestoreRemote { file, scope } => emit(
            engine
                .restore_from_remote(RemoteRestoreRequest {
                    filename: file,
                    kind: scope.into(),
                })
                .await,
        ),
        BackupCommands::Download { file } => emit(
            engine
                .download(&file)
                .await
                .map(|path| serde_json::json!({ "path": path })),
        ),
        BackupCommands::Delete { file, remote: false } => emit(engine.delete(&file).await),
        BackupCommands::Delete { file, remote: true } => emit(engine.delete_remote(&file).await),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let _sentry = std::env::var("SENTRY_DSN")
        .ok()
        .filter(|dsn| !dsn.trim().is_empty())
        .map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    ..Default::default()
                },
            ))
        });

    let cli = Cli::parse();

    match cli.command {
        Commands::Backup(command) => backup(command).await?,
        Commands::Run(args) => daemon::cli::run::execute(args).await?,
        Commands::Start(args) => daemon::cli::start::execute(args).await?,
        Commands::Stop => daemon::cli::stop::execute().await?,
        Commands::Restart(args) => {
            log::info!("Restarting archivist daemon...");
            daemon::cli::stop::execute().await?;
            daemon::cli::stop::wait_for_exit(Duration::from_secs(60)).await?;
            daemon::cli::start::execute(args).await?
        }
        Commands::Status => {
            let state = daemon::cli::status::execute().await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Commands::Config(ConfigCommands::Show) => {
            let config = common::config::load_config().context("Failed to load configuration")?;
            print!("{}", common::config::render_config(&config)?);
        }
    }

    Ok(())
}
