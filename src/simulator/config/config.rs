use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

use crate::bridge::{BridgeConfig, ExclusiveMode};
use crate::model::PeerConfig;

const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// Prefix of environment overrides, e.g. `BUSBRIDGE__BRIDGE__PORTS=4`.
pub const ENV_PREFIX: &str = "BUSBRIDGE";

/// Run-control section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationSection {
  #[serde(default)]
  pub quiet: bool,
  #[serde(default)]
  pub step_mode: bool,
  #[serde(default)]
  pub trace_file: String,
  /// Stop after this many cycles even if traffic is still in flight.
  #[serde(default = "default_max_cycles")]
  pub max_cycles: u64,
  /// Workload script; empty runs the built-in demo.
  #[serde(default)]
  pub workload: String,
  /// Initiators refuse every n-th response (0 = never).
  #[serde(default)]
  pub reject_every: u32,
}

fn default_max_cycles() -> u64 {
  100_000
}

impl Default for SimulationSection {
  fn default() -> Self {
    Self {
      quiet: false,
      step_mode: false,
      trace_file: String::new(),
      max_cycles: default_max_cycles(),
      workload: String::new(),
      reject_every: 0,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
  #[serde(default)]
  pub bridge: BridgeConfig,
  #[serde(default)]
  pub peer: PeerConfig,
  #[serde(default)]
  pub simulation: SimulationSection,
}

/// Command-line values that win over every file and environment layer.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
  pub quiet: bool,
  pub step: bool,
  pub trace_file: Option<String>,
  pub workload: Option<String>,
  pub max_cycles: Option<u64>,
  pub ports: Option<usize>,
  pub accept_window: Option<u64>,
  pub exclusive_mode: Option<ExclusiveMode>,
  pub no_anti_interleave: bool,
  pub reject_every: Option<u32>,
}

fn invalid(msg: String) -> io::Error {
  io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Layers the built-in defaults, an optional user file and the environment.
pub fn load_config(custom_config_path: Option<&Path>) -> io::Result<AppConfig> {
  let mut builder = Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));
  if let Some(path) = custom_config_path {
    if !path.exists() {
      return Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("config file {:?} not found", path),
      ));
    }
    builder = builder.add_source(File::from(path).format(FileFormat::Toml));
  }
  builder = builder.add_source(
    Environment::with_prefix(ENV_PREFIX)
      .prefix_separator("__")
      .separator("__")
      .try_parsing(true),
  );

  builder
    .build()
    .and_then(|cfg| cfg.try_deserialize::<AppConfig>())
    .map_err(|e| invalid(format!("failed to load configuration: {}", e)))
}

pub fn apply_cli_overrides(config: &mut AppConfig, cli: &CliOverrides) {
  if cli.quiet {
    config.simulation.quiet = true;
  }
  if cli.step {
    config.simulation.step_mode = true;
  }
  if let Some(file) = &cli.trace_file {
    config.simulation.trace_file = file.clone();
  }
  if let Some(workload) = &cli.workload {
    config.simulation.workload = workload.clone();
  }
  if let Some(max_cycles) = cli.max_cycles {
    config.simulation.max_cycles = max_cycles;
  }
  if let Some(every) = cli.reject_every {
    config.simulation.reject_every = every;
  }
  if let Some(ports) = cli.ports {
    config.bridge.ports = ports;
  }
  if let Some(window) = cli.accept_window {
    config.bridge.accept_window = window;
  }
  if let Some(mode) = cli.exclusive_mode {
    config.bridge.exclusive_mode = mode;
  }
  if cli.no_anti_interleave {
    config.bridge.anti_interleave_lock = false;
  }
}

pub fn validate_config(config: &AppConfig) -> io::Result<()> {
  config
    .bridge
    .validate()
    .map_err(|e| invalid(format!("invalid bridge configuration: {}", e)))?;
  if config.simulation.max_cycles == 0 {
    return Err(invalid("max_cycles must be at least 1".to_string()));
  }
  if config.peer.size == 0 {
    return Err(invalid("peer memory size must be non-zero".to_string()));
  }
  Ok(())
}

/// Loads every layer, applies the command line and validates the result.
pub fn load_and_merge_configs(custom_config_path: Option<&Path>, cli: &CliOverrides) -> io::Result<AppConfig> {
  let mut config = load_config(custom_config_path)?;
  apply_cli_overrides(&mut config, cli);
  validate_config(&config)?;
  Ok(config)
}
