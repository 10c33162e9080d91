use sim::models::{Model, Reportable};
use sim::simulator::Simulation;

pub fn print_simulation_records(simulation: &mut Simulation) {
  println!("\n--- Simulation Records ---");
  for model in simulation.models().iter() {
    print_model_records(model);
  }
  println!("--- End Records ---\n");
}

fn print_model_records(model: &Model) {
  let records = model.records();
  if records.is_empty() {
    return;
  }
  println!("\n[{}]", model.id());
  for record in records {
    println!("  Time {:.1}: {} {}", record.time, record.action, record.subject);
  }
}

/// One status line per model, e.g. the bridge's per-port statistics.
pub fn print_model_status(simulation: &mut Simulation) {
  println!("--- Model Status ---");
  for model in simulation.models().iter() {
    println!("[{}] {}", model.id(), model.status());
  }
}
