//! Top-level bridge: one [`PortEngine`] per port, no state shared between
//! them.

use super::admission::Admission;
use super::config::BridgeConfig;
use super::error::BridgeError;
use super::ordering::LockState;
use super::port::{BridgeOutput, PortEngine, PortStats};
use super::types::{Cycle, PeerResponse, PeerTag, PortId, Tag, Transaction};

#[derive(Clone, Debug)]
pub struct Bridge {
  config: BridgeConfig,
  ports: Vec<PortEngine>,
}

impl Bridge {
  /// Validates the configuration and builds every port.
  pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
    config.validate()?;
    let ports = (0..config.ports).map(|id| PortEngine::new(id, &config)).collect();
    Ok(Self { config, ports })
  }

  pub fn config(&self) -> &BridgeConfig {
    &self.config
  }

  fn port_mut(&mut self, port: PortId) -> Result<&mut PortEngine, BridgeError> {
    self.ports.get_mut(port).ok_or(BridgeError::NoSuchPort { port })
  }

  fn port(&self, port: PortId) -> Result<&PortEngine, BridgeError> {
    self.ports.get(port).ok_or(BridgeError::NoSuchPort { port })
  }

  /// Offers an upstream request (or a continuation beat of one already
  /// admitted). A rejected request must be resubmitted unchanged.
  pub fn submit(&mut self, txn: Transaction, now: Cycle) -> Result<Admission, BridgeError> {
    self.port_mut(txn.port)?.submit(txn, now)
  }

  pub fn on_issue_accepted(&mut self, port: PortId, tag: PeerTag) -> Result<(), BridgeError> {
    self.port_mut(port)?.on_issue_accepted(tag)
  }

  pub fn on_issue_rejected(&mut self, port: PortId, tag: PeerTag, now: Cycle) -> Result<(), BridgeError> {
    self.port_mut(port)?.on_issue_rejected(tag, now)
  }

  pub fn on_peer_response(&mut self, response: PeerResponse, now: Cycle) -> Result<(), BridgeError> {
    self.port_mut(response.port)?.on_peer_response(response, now)
  }

  pub fn on_delivery_accepted(&mut self, port: PortId, tag: Tag) -> Result<(), BridgeError> {
    self.port_mut(port)?.on_delivery_accepted(tag)
  }

  pub fn on_delivery_rejected(&mut self, port: PortId, tag: Tag, now: Cycle) -> Result<(), BridgeError> {
    self.port_mut(port)?.on_delivery_rejected(tag, now);
    Ok(())
  }

  /// Runs every port's tasks for cycle `now`.
  pub fn poll(&mut self, now: Cycle) -> Result<Vec<BridgeOutput>, BridgeError> {
    let mut out = Vec::new();
    for port in &mut self.ports {
      port.poll(now, &mut out)?;
    }
    Ok(out)
  }

  /// Next cycle at which [`Bridge::poll`] has time-driven work. `None` means
  /// the bridge only moves again on an external input.
  pub fn next_wakeup(&self, now: Cycle) -> Option<Cycle> {
    self.ports.iter().filter_map(|p| p.next_wakeup(now)).min()
  }

  pub fn reset(&mut self) {
    for port in &mut self.ports {
      port.reset();
    }
  }

  pub fn is_idle(&self) -> bool {
    self.ports.iter().all(PortEngine::is_idle)
  }

  pub fn stats(&self) -> Vec<PortStats> {
    self.ports.iter().map(|p| p.stats().clone()).collect()
  }

  pub fn port_stats(&self, port: PortId) -> Result<&PortStats, BridgeError> {
    Ok(self.port(port)?.stats())
  }

  pub fn lock_state(&self, port: PortId) -> Result<LockState, BridgeError> {
    Ok(self.port(port)?.lock_state())
  }

  pub fn outstanding(&self, port: PortId) -> Result<usize, BridgeError> {
    Ok(self.port(port)?.outstanding())
  }

  pub fn live_parents(&self, port: PortId) -> Result<usize, BridgeError> {
    Ok(self.port(port)?.live_parents())
  }
}
