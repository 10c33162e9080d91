use sim::models::Model;
use sim::simulator::{Connector, Simulation};

use super::bridge_model::{BridgeModel, BridgePorts};
use super::initiator::{Initiator, InitiatorPorts};
use super::memory::{MemoryTarget, PeerConfig};
use crate::bridge::{BridgeConfig, BridgeError, Cycle, Transaction};

pub const BRIDGE_ID: &str = "bridge";
pub const MEMORY_ID: &str = "memory";
pub const MEMORY_CONTROL: &str = "control";

pub fn initiator_id(port: usize) -> String {
  format!("initiator{}", port)
}

/// Timed requests for one upstream port.
pub type Script = Vec<(Cycle, Transaction)>;

/// Builds initiators, one per bridge port, wired through the bridge to a
/// single reference memory.
///
/// `scripts[p]` drives port `p`; ports without a script stay silent.
/// Every `reject_every`-th response an initiator sees is refused once
/// (0 disables refusals).
pub fn create_simulation(
  bridge: BridgeConfig,
  peer: PeerConfig,
  mut scripts: Vec<Script>,
  reject_every: u32,
) -> Result<Simulation, BridgeError> {
  let ports = bridge.ports;
  let bridge_ports = BridgePorts::default();
  scripts.resize_with(ports, Vec::new);

  let mut models = vec![
    Model::new(
      String::from(BRIDGE_ID),
      Box::new(BridgeModel::new(bridge, bridge_ports.clone())?),
    ),
    Model::new(
      String::from(MEMORY_ID),
      Box::new(MemoryTarget::new(
        String::from("req"),
        String::from("ack"),
        String::from("resp"),
        String::from(MEMORY_CONTROL),
        peer,
      )),
    ),
  ];

  let mut connectors = vec![
    Connector::new(
      String::from("bridge_memory_req"),
      String::from(BRIDGE_ID),
      String::from(MEMORY_ID),
      bridge_ports.downstream_req.clone(),
      String::from("req"),
    ),
    Connector::new(
      String::from("memory_bridge_ack"),
      String::from(MEMORY_ID),
      String::from(BRIDGE_ID),
      String::from("ack"),
      bridge_ports.downstream_ack.clone(),
    ),
    Connector::new(
      String::from("memory_bridge_resp"),
      String::from(MEMORY_ID),
      String::from(BRIDGE_ID),
      String::from("resp"),
      bridge_ports.downstream_resp.clone(),
    ),
  ];

  for (port, script) in scripts.into_iter().take(ports).enumerate() {
    let id = initiator_id(port);
    let initiator_ports = InitiatorPorts::default();
    // acks and responses are broadcast; each initiator keeps its own port's
    connectors.push(Connector::new(
      format!("{}_bridge_req", id),
      id.clone(),
      String::from(BRIDGE_ID),
      initiator_ports.req.clone(),
      bridge_ports.upstream_req.clone(),
    ));
    connectors.push(Connector::new(
      format!("bridge_{}_ack", id),
      String::from(BRIDGE_ID),
      id.clone(),
      bridge_ports.upstream_ack.clone(),
      initiator_ports.req_ack.clone(),
    ));
    connectors.push(Connector::new(
      format!("bridge_{}_resp", id),
      String::from(BRIDGE_ID),
      id.clone(),
      bridge_ports.upstream_resp.clone(),
      initiator_ports.resp.clone(),
    ));
    connectors.push(Connector::new(
      format!("{}_bridge_resp_ack", id),
      id.clone(),
      String::from(BRIDGE_ID),
      initiator_ports.resp_ack.clone(),
      bridge_ports.upstream_resp_ack.clone(),
    ));
    models.push(Model::new(
      id,
      Box::new(Initiator::new(port, initiator_ports, script, reject_every)),
    ));
  }

  Ok(Simulation::post(models, connectors))
}
