use env_logger::{Builder, Env};
use log::LevelFilter;

/// Installs the global logger. `RUST_LOG` takes precedence; otherwise the
/// level is `info`, or `warn` when quiet.
pub fn init_log(quiet: bool) {
  let default_level = if quiet { "warn" } else { "info" };
  let _ = Builder::from_env(Env::default().default_filter_or(default_level))
    .format_timestamp(None)
    .try_init();
}

/// Logger for tests: captured by the harness, errors only unless `RUST_LOG` says otherwise.
pub fn init_test_log() {
  let _ = Builder::from_env(Env::default().default_filter_or("error"))
    .filter_module("sim", LevelFilter::Warn)
    .is_test(true)
    .try_init();
}
