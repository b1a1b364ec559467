mod file;

pub use file::{
    build_config, load_config, parse_flag, render_config, ArchivistConfig, CodeConfig,
    DataLayerConfig, DatabaseConfig, PathsConfig, RemoteConfig, SchedulerConfig, CONFIG_PATHS,
};
