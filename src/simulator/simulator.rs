use log::{info, warn};
use sim::simulator::Simulation;
use std::fs::File;
use std::io::{self, BufWriter, Result};
use std::path::Path;

use super::config::AppConfig;
use super::sim::inject::{inject_commit_failure, inject_poke, inject_reset};
use super::sim::mode::StepMode;
use super::sim::model::model_step;
use super::sim::shell::{Command, Shell};
use super::utils::report::{print_model_status, print_simulation_records};
use super::workload::Workload;
use crate::model::create_simulation;

/// Bridge, peer memory and initiators wired together and driven to
/// completion, either freely or from the step prompt.
pub struct Simulator {
  config: AppConfig,
  simulation: Simulation,
  trace_writer: Option<BufWriter<File>>,
}

impl Simulator {
  pub fn new(config: AppConfig) -> Result<Self> {
    let workload = if config.simulation.workload.is_empty() {
      info!("no workload given, running the built-in demo");
      Workload::demo()?
    } else {
      Workload::load(Path::new(&config.simulation.workload))?
    };
    Self::with_workload(config, &workload)
  }

  pub fn with_workload(config: AppConfig, workload: &Workload) -> Result<Self> {
    let scripts = workload.scripts(config.bridge.ports)?;
    let mut simulation = create_simulation(
      config.bridge.clone(),
      config.peer.clone(),
      scripts,
      config.simulation.reject_every,
    )
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    for poke in &workload.pokes {
      inject_poke(&mut simulation, poke.address, poke.data.clone())?;
    }
    if workload.fail_next_commit {
      inject_commit_failure(&mut simulation)?;
    }

    let trace_writer = if config.simulation.trace_file.is_empty() {
      None
    } else {
      Some(BufWriter::new(File::create(&config.simulation.trace_file)?))
    };

    info!(
      "bridge: {} port(s), {} requests, exclusive mode {:?}",
      config.bridge.ports,
      workload.requests.len(),
      config.bridge.exclusive_mode
    );
    Ok(Self {
      config,
      simulation,
      trace_writer,
    })
  }

  pub fn cycle(&self) -> u64 {
    self.simulation.get_global_time() as u64
  }

  pub fn simulation(&mut self) -> &mut Simulation {
    &mut self.simulation
  }

  /// Advances to the next event time. `false` once the run is over, either
  /// because nothing is left to do or the cycle limit was hit.
  pub fn step(&mut self) -> Result<bool> {
    if self.cycle() >= self.config.simulation.max_cycles {
      warn!("cycle limit {} reached", self.config.simulation.max_cycles);
      return Ok(false);
    }
    model_step(&mut self.simulation, &mut self.trace_writer)
  }

  pub fn run(&mut self) -> Result<()> {
    match StepMode::from_flag(self.config.simulation.step_mode) {
      StepMode::Continuous => {
        self.run_continuous()?;
      },
      StepMode::Step => self.run_step_mode()?,
    }
    self.report();
    Ok(())
  }

  /// Runs until idle or the cycle limit; returns the final cycle.
  pub fn run_continuous(&mut self) -> Result<u64> {
    while self.step()? {}
    info!("simulation finished at cycle {}", self.cycle());
    Ok(self.cycle())
  }

  fn run_step_mode(&mut self) -> Result<()> {
    println!("Step mode: Enter steps once, 'si N' steps N times, 'c' continues, 'reset' drains, 'fail-commit' fails the next exclusive commit, 'q' quits");
    let mut shell = Shell::new()?;
    loop {
      match shell.read_command()? {
        Command::Step(n) => {
          for _ in 0..n {
            if !self.step()? {
              println!("simulation idle at cycle {}", self.cycle());
              break;
            }
          }
          println!("cycle {}", self.cycle());
        },
        Command::Reset => inject_reset(&mut self.simulation)?,
        Command::FailCommit => inject_commit_failure(&mut self.simulation)?,
        Command::Continue => {
          self.run_continuous()?;
          return Ok(());
        },
        Command::Quit => return Ok(()),
      }
    }
  }

  fn report(&mut self) {
    if !self.config.simulation.quiet {
      print_simulation_records(&mut self.simulation);
    }
    print_model_status(&mut self.simulation);
  }
}
