pub mod archive;
pub mod backup;
pub mod control;
pub mod error;
pub mod layout;
pub mod lock;
pub mod restore;
pub mod scheduler;
pub mod source;

use common::config::ArchivistConfig;
use database::{
    DataLayer, ManagementCommand, PostgresDriver, PostgresDriverOptions, SnapshotDriver,
    SqliteDriver,
};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use storage::{StorageConfig, StorageProvider, StorageProviderFactory, StorageProviderType};

pub use database::DbEngine;
pub use backup::{BackupManager, BackupRequest, BackupResult, BackupTrigger};
pub use error::{EngineError, ErrorClass, Result};
pub use lock::OperationLock;
pub use restore::{RestoreManager, RestoreRequest, RestoreResult};
pub use scheduler::{ScheduleRule, Scheduler};
pub use source::SourceTree;

/// Where finished archives go
#[derive(Clone, Default)]
pub struct RemoteTarget {
    pub provider: Option<Arc<dyn StorageProvider>>,
    /// An upload failure fails the run
    pub required: bool,
    /// Why no provider is available, when one was configured but could not be built
    pub unavailable: Option<String>,
}

impl RemoteTarget {
    pub fn new(provider: Arc<dyn StorageProvider>, required: bool) -> Self {
        Self {
            provider: Some(provider),
            required,
            unavailable: None,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

/// Everything the backup and restore pipelines share
pub struct EngineContext {
    pub backup_root: PathBuf,
    pub source: SourceTree,
    pub sqlite: Arc<dyn SnapshotDriver>,
    pub postgres: Arc<dyn SnapshotDriver>,
    /// File name of the embedded database inside an archive
    pub embedded_name: String,
    pub data_layer: Arc<dyn DataLayer>,
    pub fixture_excludes: Vec<String>,
    pub remote: RemoteTarget,
    pub keep_local: usize,
    pub lock: OperationLock,
}

impl EngineContext {
    pub fn driver(&self, engine: DbEngine) -> Arc<dyn SnapshotDriver> {
        match engine {
            DbEngine::Sqlite => self.sqlite.clone(),
            DbEngine::Postgres => self.postgres.clone(),
        }
    }
}

/// Entry point shared by the CLI, the daemon and a control surface
#[derive(Clone)]
pub struct Engine {
    ctx: Arc<EngineContext>,
    backups: Arc<BackupManager>,
    restores: Arc<RestoreManager>,
    default_engine: DbEngine,
}

impl Engine {
    pub fn new(ctx: EngineContext, default_engine: DbEngine) -> Self {
        let ctx = Arc::new(ctx);
        Self {
            backups: Arc::new(BackupManager::new(ctx.clone())),
            restores: Arc::new(RestoreManager::new(ctx.clone())),
            ctx,
            default_engine,
        }
    }

    /// Wires drivers, data layer and remote storage from the loaded configuration.
    /// Relative paths are taken from the project root.
    pub async fn from_config(config: &ArchivistConfig) -> Result<Self> {
        let project_root = config.paths.project_root.clone();
        let backup_root = under(&project_root, &config.paths.backup_root);
        let sqlite_file = under(&project_root, &config.paths.sqlite_file);

        let default_engine: DbEngine = config.database.engine.parse()?;
        let sqlite = SqliteDriver::new(&sqlite_file);
        let embedded_name = sqlite.file_name();

        let postgres = PostgresDriver::new(PostgresDriverOptions {
            url_env_vars: config.database.url_env_vars.clone(),
            pg_dump_bin: config.database.pg_dump_bin.clone(),
            psql_bin: config.database.psql_bin.clone(),
            pg_restore_bin: config.database.pg_restore_bin.clone(),
            maintenance_db: config.database.maintenance_db.clone(),
            timeout: Duration::from_secs(config.database.command_timeout_secs),
        });

        let data_layer = ManagementCommand::new(
            config.data_layer.program.clone(),
            config.data_layer.args.clone(),
            &project_root,
            Duration::from_secs(config.data_layer.timeout_secs),
        );

        let remote = remote_target(config).await?;
        let source = SourceTree::new(
            &project_root,
            config.code.include.clone(),
            config.code.exclude.clone(),
            &backup_root,
        );

        info!(
            "Engine ready: backups in {}, default engine {default_engine}",
            backup_root.display()
        );
        Ok(Self::new(
            EngineContext {
                lock: OperationLock::in_dir(&backup_root),
                backup_root,
                source,
                sqlite: Arc::new(sqlite),
                postgres: Arc::new(postgres),
                embedded_name,
                data_layer: Arc::new(data_layer),
                fixture_excludes: config.database.fixture_excludes.clone(),
                remote,
                keep_local: config.scheduler.keep_local,
            },
            default_engine,
        ))
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backups
    }

    pub fn restores(&self) -> &Arc<RestoreManager> {
        &self.restores
    }

    pub fn default_engine(&self) -> DbEngine {
        self.default_engine
    }

    pub fn backup_root(&self) -> &Path {
        &self.ctx.backup_root
    }
}

fn under(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// An unknown provider name is a configuration error. A known provider that
/// cannot be built (e.g. a missing token) only disables uploads.
async fn remote_target(config: &ArchivistConfig) -> Result<RemoteTarget> {
    let remote = &config.remote;
    let provider: StorageProviderType = remote.provider.parse()?;
    let storage_config = StorageConfig {
        provider,
        folder: remote.folder.clone(),
        access_token: remote.dropbox_token.clone(),
        bucket: remote.s3_bucket.clone(),
        region: remote.s3_region.clone(),
        endpoint: remote.s3_endpoint.clone(),
        access_key: remote.s3_access_key.clone(),
        secret_key: remote.s3_secret_key.clone(),
        local_dir: remote.local_dir.clone(),
    };

    match StorageProviderFactory::create(&storage_config).await {
        Ok(Some(provider)) => {
            info!("Remote storage: {} ({})", provider.name(), remote.folder);
            Ok(RemoteTarget::new(Arc::from(provider), remote.required))
        }
        Ok(None) => {
            info!("Remote storage disabled");
            Ok(RemoteTarget::disabled())
        }
        Err(e) => {
            warn!("Remote storage unavailable: {e}");
            Ok(RemoteTarget {
                provider: None,
                required: remote.required,
                unavailable: Some(e.to_string()),
            })
        }
    }
}
