use serde::Serialize;
use sim::simulator::{Message, Simulation};
use std::io;

use crate::model::{BridgePorts, MemoryCommand, BRIDGE_ID, CONTROL_RESET, MEMORY_CONTROL, MEMORY_ID};

/// Injects `content` into `target_model`'s `target_port` at the current
/// simulation time.
pub fn inject_message(simulation: &mut Simulation, target_model: &str, target_port: &str, content: &str) {
  let msg = Message::new(
    "host".to_string(),
    "default".to_string(),
    target_model.to_string(),
    target_port.to_string(),
    simulation.get_global_time(),
    content.to_string(),
  );
  simulation.inject_input(msg);
}

fn inject_json<T: Serialize>(simulation: &mut Simulation, target_model: &str, target_port: &str, data: &T) -> io::Result<()> {
  let content = serde_json::to_string(data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
  inject_message(simulation, target_model, target_port, &content);
  Ok(())
}

/// Writes bytes straight into the peer memory, bypassing the bridge.
pub fn inject_poke(simulation: &mut Simulation, address: u64, data: Vec<u8>) -> io::Result<()> {
  inject_json(simulation, MEMORY_ID, MEMORY_CONTROL, &MemoryCommand::Poke { address, data })
}

/// Makes the next exclusive commit in the peer memory fail.
pub fn inject_commit_failure(simulation: &mut Simulation) -> io::Result<()> {
  inject_json(simulation, MEMORY_ID, MEMORY_CONTROL, &MemoryCommand::FailNextCommit)
}

/// Drains every bridge port.
pub fn inject_reset(simulation: &mut Simulation) -> io::Result<()> {
  inject_json(simulation, BRIDGE_ID, &BridgePorts::default().control, &CONTROL_RESET)
}
