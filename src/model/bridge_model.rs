use log::error;
use sim::models::model_trait::{DevsModel, Reportable, ReportableModel, SerializableModel};
use sim::models::{ModelMessage, ModelRecord};
use sim::simulator::Services;
use sim::utils::errors::SimulationError;
use std::f64::INFINITY;

use super::msg::{create_message, cycle_of, receive_message, AckMessage};
use crate::bridge::{
  Admission, Bridge, BridgeConfig, BridgeError, BridgeOutput, PeerResponse, PeerTag, PortStats, Tag, Transaction,
};
use crate::model_record;

/// Commands accepted on the control port.
pub const CONTROL_RESET: &str = "reset";

/// Names of the bridge model's ports.
#[derive(Debug, Clone)]
pub struct BridgePorts {
  pub upstream_req: String,
  pub upstream_ack: String,
  pub upstream_resp: String,
  pub upstream_resp_ack: String,
  pub downstream_req: String,
  pub downstream_ack: String,
  pub downstream_resp: String,
  pub control: String,
}

impl Default for BridgePorts {
  fn default() -> Self {
    Self {
      upstream_req: "upstream_req".to_string(),
      upstream_ack: "upstream_ack".to_string(),
      upstream_resp: "upstream_resp".to_string(),
      upstream_resp_ack: "upstream_resp_ack".to_string(),
      downstream_req: "downstream_req".to_string(),
      downstream_ack: "downstream_ack".to_string(),
      downstream_resp: "downstream_resp".to_string(),
      control: "control".to_string(),
    }
  }
}

/// DEVS wrapper around [`Bridge`].
///
/// External events feed the engine and schedule an immediate internal
/// event; the internal event flushes handshake replies, polls the engine for
/// the current cycle and sleeps until the engine's next wakeup.
#[derive(Debug, Clone)]
pub struct BridgeModel {
  ports: BridgePorts,
  bridge: Bridge,
  replies: Vec<ModelMessage>,
  until_next_event: f64,
  records: Vec<ModelRecord>,
}

fn fatal(err: BridgeError) -> SimulationError {
  error!("bridge invariant broken: {}", err);
  SimulationError::InvalidModelState
}

impl BridgeModel {
  pub fn new(config: BridgeConfig, ports: BridgePorts) -> Result<Self, BridgeError> {
    Ok(Self {
      ports,
      bridge: Bridge::new(config)?,
      replies: Vec::new(),
      until_next_event: INFINITY,
      records: Vec::new(),
    })
  }

  pub fn stats(&self) -> Vec<PortStats> {
    self.bridge.stats()
  }

  fn on_upstream_req(&mut self, msg: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    let now = cycle_of(services.global_time());
    let txn: Transaction = receive_message(msg, &self.ports.upstream_req)?;
    let (port, tag) = (txn.port, txn.tag);
    let summary = txn.to_string();
    let ack = match self.bridge.submit(txn, now).map_err(fatal)? {
      Admission::Accepted => {
        model_record!(self, services, "admit", summary);
        AckMessage::ack(port, tag.0 as u64)
      },
      Admission::Rejected(reason) => {
        model_record!(self, services, "reject", summary);
        AckMessage::nack(port, tag.0 as u64, &format!("{:?}", reason).to_lowercase(), 0)
      },
    };
    self.replies.push(create_message(&ack, &self.ports.upstream_ack)?);
    Ok(())
  }

  fn on_downstream_ack(&mut self, msg: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    let now = cycle_of(services.global_time());
    let ack: AckMessage = receive_message(msg, &self.ports.downstream_ack)?;
    let tag = PeerTag(ack.tag);
    if ack.accepted {
      self.bridge.on_issue_accepted(ack.port, tag).map_err(fatal)
    } else {
      model_record!(self, services, "peer_nacc", format!("port={} tag={}", ack.port, tag));
      self.bridge.on_issue_rejected(ack.port, tag, now).map_err(fatal)
    }
  }

  fn on_downstream_resp(&mut self, msg: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    let now = cycle_of(services.global_time());
    let response: PeerResponse = receive_message(msg, &self.ports.downstream_resp)?;
    model_record!(
      self,
      services,
      "peer_resp",
      format!("port={} tag={} {:?}", response.port, response.tag, response.status)
    );
    self.bridge.on_peer_response(response, now).map_err(fatal)
  }

  fn on_upstream_resp_ack(&mut self, msg: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    let now = cycle_of(services.global_time());
    let ack: AckMessage = receive_message(msg, &self.ports.upstream_resp_ack)?;
    let tag = Tag(ack.tag as u32);
    if ack.accepted {
      self.bridge.on_delivery_accepted(ack.port, tag).map_err(fatal)
    } else {
      model_record!(self, services, "delivery_refused", format!("port={} tag={}", ack.port, tag));
      self.bridge.on_delivery_rejected(ack.port, tag, now).map_err(fatal)
    }
  }

  fn on_control(&mut self, msg: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    let command: String = receive_message(msg, &self.ports.control)?;
    match command.as_str() {
      CONTROL_RESET => {
        self.bridge.reset();
        self.replies.clear();
        model_record!(self, services, "reset", "all ports drained");
        Ok(())
      },
      _ => Err(SimulationError::InvalidMessage),
    }
  }
}

impl DevsModel for BridgeModel {
  fn events_ext(&mut self, incoming_message: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    let port = incoming_message.port_name.as_str();
    if port == self.ports.upstream_req {
      self.on_upstream_req(incoming_message, services)?;
    } else if port == self.ports.downstream_ack {
      self.on_downstream_ack(incoming_message, services)?;
    } else if port == self.ports.downstream_resp {
      self.on_downstream_resp(incoming_message, services)?;
    } else if port == self.ports.upstream_resp_ack {
      self.on_upstream_resp_ack(incoming_message, services)?;
    } else if port == self.ports.control {
      self.on_control(incoming_message, services)?;
    } else {
      return Err(SimulationError::InvalidMessage);
    }
    self.until_next_event = 0.0;
    Ok(())
  }

  fn events_int(&mut self, services: &mut Services) -> Result<Vec<ModelMessage>, SimulationError> {
    let now = cycle_of(services.global_time());
    let mut messages = std::mem::take(&mut self.replies);

    for output in self.bridge.poll(now).map_err(fatal)? {
      match output {
        BridgeOutput::Issue(sub) => {
          model_record!(self, services, "issue", sub);
          messages.push(create_message(&sub, &self.ports.downstream_req)?);
        },
        BridgeOutput::Deliver(response) => {
          model_record!(self, services, "deliver", response);
          messages.push(create_message(&response, &self.ports.upstream_resp)?);
        },
      }
    }

    // everything due at `now` has run, so the next event is at least a cycle away
    self.until_next_event = match self.bridge.next_wakeup(now) {
      Some(at) => (at.max(now + 1) - now) as f64,
      None => INFINITY,
    };
    Ok(messages)
  }

  fn time_advance(&mut self, time_delta: f64) {
    self.until_next_event -= time_delta;
  }

  fn until_next_event(&self) -> f64 {
    self.until_next_event
  }
}

impl Reportable for BridgeModel {
  fn status(&self) -> String {
    serde_json::to_string(&self.bridge.stats()).unwrap_or_default()
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl ReportableModel for BridgeModel {}

impl SerializableModel for BridgeModel {
  fn get_type(&self) -> &'static str {
    "BridgeModel"
  }
}
