use busbridge::bridge::ExclusiveMode;
use busbridge::simulator::config::{load_and_merge_configs, CliOverrides};
use busbridge::simulator::log::init_log;
use busbridge::Simulator;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExclusiveArg {
  Deny,
  Ignore,
  Translate,
}

impl From<ExclusiveArg> for ExclusiveMode {
  fn from(arg: ExclusiveArg) -> Self {
    match arg {
      ExclusiveArg::Deny => ExclusiveMode::Deny,
      ExclusiveArg::Ignore => ExclusiveMode::Ignore,
      ExclusiveArg::Translate => ExclusiveMode::Translate,
    }
  }
}

/// busbridge - cycle-level bus-protocol bridge simulator
#[derive(Parser, Debug)]
#[command(name = "busbridge")]
#[command(version = "0.1.0")]
#[command(about = "Bridges a wide block/burst bus onto a narrow burst bus against a reference memory", long_about = None)]
struct Args {
  /// Configuration file layered over the built-in defaults
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Workload script (TOML); the built-in demo runs without one
  #[arg(short, long, value_name = "FILE")]
  workload: Option<String>,

  /// Enable step mode (interactive stepping)
  #[arg(short, long)]
  step: bool,

  /// Quiet mode (warnings only, no record dump)
  #[arg(short, long)]
  quiet: bool,

  /// Output trace file path (JSON lines)
  #[arg(long, value_name = "FILE")]
  trace_file: Option<String>,

  #[arg(long, value_name = "N")]
  max_cycles: Option<u64>,

  /// Number of upstream ports
  #[arg(long, value_name = "N")]
  ports: Option<usize>,

  /// Cycles an issued transfer stays open to a not-accepted
  #[arg(long, value_name = "N")]
  accept_window: Option<u64>,

  #[arg(long, value_enum)]
  exclusive_mode: Option<ExclusiveArg>,

  /// Disable the read/write response anti-interleave lock
  #[arg(long)]
  no_anti_interleave: bool,

  /// Initiators refuse every N-th response
  #[arg(long, value_name = "N")]
  reject_every: Option<u32>,
}

fn main() -> std::io::Result<()> {
  let args = Args::parse();
  init_log(args.quiet);

  let cli = CliOverrides {
    quiet: args.quiet,
    step: args.step,
    trace_file: args.trace_file,
    workload: args.workload,
    max_cycles: args.max_cycles,
    ports: args.ports,
    accept_window: args.accept_window,
    exclusive_mode: args.exclusive_mode.map(ExclusiveMode::from),
    no_anti_interleave: args.no_anti_interleave,
    reject_every: args.reject_every,
  };
  let config = load_and_merge_configs(args.config.as_deref(), &cli)?;

  let mut simulator = Simulator::new(config)?;
  simulator.run()
}
