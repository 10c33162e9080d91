use log::debug;
use sim::models::model_trait::DevsModel;
use sim::simulator::{Message, Simulation};
use std::fs::File;
use std::io::{self, BufWriter, Result, Write};

fn sim_error(e: impl std::fmt::Debug) -> io::Error {
  io::Error::new(io::ErrorKind::Other, format!("simulation error: {:?}", e))
}

fn trace_messages(messages: &[Message], trace_writer: &mut Option<BufWriter<File>>) -> Result<()> {
  for msg in messages {
    debug!(
      "[MSG] t={:.1} {}:{} -> {}:{} | {}",
      msg.time(),
      msg.source_id(),
      msg.source_port(),
      msg.target_id(),
      msg.target_port(),
      msg.content()
    );
  }
  if let Some(writer) = trace_writer {
    for msg in messages {
      let entry = serde_json::json!({
        "time": msg.time(),
        "source": msg.source_id(),
        "source_port": msg.source_port(),
        "target": msg.target_id(),
        "target_port": msg.target_port(),
        "content": msg.content()
      });
      writeln!(writer, "{}", entry)?;
    }
    writer.flush()?;
  }
  Ok(())
}

/// Time of the earliest scheduled internal event, relative to now.
pub fn next_event(simulation: &mut Simulation) -> f64 {
  simulation
    .models()
    .iter()
    .fold(f64::INFINITY, |min, model| f64::min(min, model.until_next_event()))
}

/// Runs every event at the current time and advances to the next one.
///
/// Returns `false` when there is nothing left to do: no message in flight
/// and every model passive.
pub fn model_step(simulation: &mut Simulation, trace_writer: &mut Option<BufWriter<File>>) -> Result<bool> {
  let time0 = simulation.get_global_time();
  loop {
    let pending = simulation.get_messages();
    trace_messages(&pending, trace_writer)?;
    let has_pending = !pending.is_empty();

    if !has_pending && next_event(simulation).is_infinite() {
      return Ok(false);
    }

    simulation.step().map_err(sim_error)?;
    if simulation.get_global_time() > time0 {
      return Ok(true);
    }
  }
}
