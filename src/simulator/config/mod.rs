#[allow(clippy::module_inception)]
pub mod config;

pub use config::{apply_cli_overrides, load_and_merge_configs, load_config, validate_config, AppConfig, CliOverrides};
