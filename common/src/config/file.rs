use config::{Config, ConfigError, File};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file locations, lowest priority first.
pub const CONFIG_PATHS: [&str; 3] = [
    "/etc/archivist/archivist.toml",
    "~/.config/archivist/archivist.toml",
    "archivist.toml",
];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchivistConfig {
    pub paths: PathsConfig,
    pub code: CodeConfig,
    pub database: DatabaseConfig,
    pub data_layer: DataLayerConfig,
    pub remote: RemoteConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Root of the deployed application (where `manage.py` lives)
    pub project_root: PathBuf,
    /// Directory holding `full_backup_*.zip` archives and temp dirs
    pub backup_root: PathBuf,
    /// Live embedded database file
    pub sqlite_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CodeConfig {
    /// Top-level entries of the project root that make up the code snapshot
    pub include: Vec<String>,
    /// Directory names skipped at any depth
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Engine used when a request doesn't name one ("postgres" or "sqlite")
    pub engine: String,
    /// Connection URL variables, checked in order
    pub url_env_vars: Vec<String>,
    pub pg_dump_bin: String,
    pub psql_bin: String,
    pub pg_restore_bin: String,
    pub maintenance_db: String,
    pub command_timeout_secs: u64,
    pub fixture_excludes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataLayerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    /// "dropbox", "s3", "local" or "none"
    pub provider: String,
    pub folder: String,
    /// A failed upload fails the whole backup run
    pub required: bool,
    pub dropbox_token: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    pub local_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Start the scheduler automatically with the daemon
    pub enabled: bool,
    /// Replace the weekly rule with `test_interval_secs`
    pub test_mode: bool,
    /// Six-field cron expression (sec min hour dom month dow)
    pub cron: String,
    pub timezone: String,
    pub tick_secs: u64,
    pub test_interval_secs: u64,
    /// Local archives kept after a scheduled run, 0 keeps everything
    pub keep_local: usize,
}

/// Interprets boolean-like environment values ("1", "true", "yes", "on").
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Loads the configuration from the default file locations and the process environment.
pub fn load_config() -> Result<ArchivistConfig, ConfigError> {
    let paths: Vec<String> = CONFIG_PATHS
        .iter()
        .filter_map(|path| shellexpand::full(path).ok().map(|p| p.into_owned()))
        .collect();
    let paths: Vec<&Path> = paths.iter().map(Path::new).collect();

    let config = build_config(&paths, |key| std::env::var(key).ok())?;
    info!(
        "Configuration loaded: backup root {}, remote provider {}",
        config.paths.backup_root.display(),
        config.remote.provider
    );
    Ok(config)
}

/// Builds the configuration from defaults, the given files (when they exist) and
/// an environment lookup.
pub fn build_config<F>(files: &[&Path], env: F) -> Result<ArchivistConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let config_builder = Config::builder()
        .set_default("paths.project_root", ".")?
        .set_default("paths.backup_root", "backups")?
        .set_default("paths.sqlite_file", "db.sqlite3")?
        .set_default(
            "code.include",
            vec!["condominio", "core", "authz", "config", "manage.py"],
        )?
        .set_default(
            "code.exclude",
            vec![
                "__pycache__",
                "venv",
                ".venv",
                "env",
                "backups",
                "node_modules",
                ".git",
            ],
        )?
        .set_default("database.engine", "postgres")?
        .set_default(
            "database.url_env_vars",
            vec!["DATABASE_URL", "DATABASE_PUBLIC_URL", "DATABASE_PRIVATE_URL"],
        )?
        .set_default("database.pg_dump_bin", "pg_dump")?
        .set_default("database.psql_bin", "psql")?
        .set_default("database.pg_restore_bin", "pg_restore")?
        .set_default("database.maintenance_db", "postgres")?
        .set_default("database.command_timeout_secs", 600_i64)?
        .set_default(
            "database.fixture_excludes",
            vec!["auth.permission", "contenttypes"],
        )?
        .set_default("data_layer.program", "python")?
        .set_default("data_layer.args", vec!["manage.py"])?
        .set_default("data_layer.timeout_secs", 900_i64)?
        .set_default("remote.provider", "dropbox")?
        .set_default("remote.folder", "/backups")?
        .set_default("remote.required", true)?
        .set_default("remote.dropbox_token", None::<String>)?
        .set_default("remote.s3_bucket", None::<String>)?
        .set_default("remote.s3_region", None::<String>)?
        .set_default("remote.s3_endpoint", None::<String>)?
        .set_default("remote.s3_access_key", None::<String>)?
        .set_default("remote.s3_secret_key", None::<String>)?
        .set_default("remote.local_dir", None::<String>)?
        .set_default("scheduler.enabled", false)?
        .set_default("scheduler.test_mode", false)?
        .set_default("scheduler.cron", "0 30 17 * * Sat")?
        .set_default("scheduler.timezone", "America/La_Paz")?
        .set_default("scheduler.tick_secs", 30_i64)?
        .set_default("scheduler.test_interval_secs", 60_i64)?
        .set_default("scheduler.keep_local", 8_i64)?;

    // Add config sources
    let config_builder = files.iter().fold(config_builder, |builder, path| {
        if path.exists() {
            debug!("Reading configuration from {}", path.display());
            builder.add_source(File::from(*path))
        } else {
            builder
        }
    });

    // Environment values win over files
    let flag = |key: &str| env(key).map(|value| parse_flag(&value));
    let config_builder = config_builder
        .set_override_option("paths.backup_root", env("BACKUP_ROOT"))?
        .set_override_option("paths.project_root", env("PROJECT_ROOT"))?
        .set_override_option("paths.sqlite_file", env("SQLITE_PATH"))?
        .set_override_option("remote.dropbox_token", env("DROPBOX_ACCESS_TOKEN"))?
        .set_override_option("remote.provider", env("BACKUP_REMOTE_PROVIDER"))?
        .set_override_option("remote.s3_bucket", env("BACKUP_S3_BUCKET"))?
        .set_override_option("remote.s3_region", env("AWS_REGION"))?
        .set_override_option("remote.s3_endpoint", env("AWS_ENDPOINT"))?
        .set_override_option("remote.s3_access_key", env("AWS_ACCESS_KEY_ID"))?
        .set_override_option("remote.s3_secret_key", env("AWS_SECRET_ACCESS_KEY"))?
        .set_override_option("scheduler.enabled", flag("BACKUP_SCHEDULER_ENABLED"))?
        .set_override_option("scheduler.test_mode", flag("BACKUP_TEST_MODE"))?;

    config_builder.build()?.try_deserialize()
}

/// Renders the configuration as TOML with secrets masked.
pub fn render_config(config: &ArchivistConfig) -> Result<String, toml::ser::Error> {
    let mut masked = config.clone();
    let mask = |value: &mut Option<String>| {
        if value.is_some() {
            *value = Some("********".to_string());
        }
    };
    mask(&mut masked.remote.dropbox_token);
    mask(&mut masked.remote.s3_access_key);
    mask(&mut masked.remote.s3_secret_key);
    toml::to_string_pretty(&masked)
}
