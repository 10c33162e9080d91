use serde::{Deserialize, Serialize};
use sim::models::ModelMessage;
use sim::utils::errors::SimulationError;

use crate::bridge::PortId;

/// ACK/NACK handshake for one request, transfer or response.
///
/// `tag` carries the upstream tag on the upstream side and the peer tag on
/// the downstream side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AckMessage {
  pub port: PortId,
  pub tag: u64,
  pub accepted: bool,
  pub reason: String,
  /// Times this item has been refused so far.
  pub retry_count: u32,
}

impl AckMessage {
  pub fn ack(port: PortId, tag: u64) -> Self {
    Self {
      port,
      tag,
      accepted: true,
      reason: "accepted".to_string(),
      retry_count: 0,
    }
  }

  pub fn nack(port: PortId, tag: u64, reason: &str, retry_count: u32) -> Self {
    Self {
      port,
      tag,
      accepted: false,
      reason: reason.to_string(),
      retry_count,
    }
  }
}

/// Deserializes a message arriving on `expected_port`.
///
/// ```ignore
/// let txn: Transaction = receive_message(msg, &self.upstream_req)?;
/// ```
pub fn receive_message<T: for<'de> Deserialize<'de>>(
  msg: &ModelMessage,
  expected_port: &str,
) -> Result<T, SimulationError> {
  if msg.port_name != expected_port {
    return Err(SimulationError::InvalidMessage);
  }
  let data: T = serde_json::from_str(&msg.content)?;
  Ok(data)
}

/// Serializes `data` into a message for `target_port`.
pub fn create_message<T: Serialize>(data: &T, target_port: &str) -> Result<ModelMessage, SimulationError> {
  Ok(ModelMessage {
    port_name: target_port.to_string(),
    content: serde_json::to_string(data)?,
  })
}

/// Model time to bus cycles.
pub fn cycle_of(time: f64) -> u64 {
  time.max(0.0).round() as u64
}
