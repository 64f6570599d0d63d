pub mod config;

pub use config::{
    default_config_path, default_scripts_dir, ConfigError, ConfigStore, ViewerConfig,
};
pub use gpxview_runexec::ToolCommand;
