use sim::models::model_trait::{DevsModel, Reportable, ReportableModel, SerializableModel};
use sim::models::{ModelMessage, ModelRecord};
use sim::simulator::Services;
use sim::utils::errors::SimulationError;
use std::collections::VecDeque;
use std::f64::INFINITY;

use super::msg::{create_message, cycle_of, receive_message, AckMessage};
use crate::bridge::{Cycle, PortId, Response, Transaction};
use crate::model_record;

/// Record action under which every accepted response is logged, with the
/// response as JSON in the subject.
pub const RESPONSE_RECORD: &str = "response";

#[derive(Debug, Clone)]
pub struct InitiatorPorts {
  pub req: String,
  pub req_ack: String,
  pub resp: String,
  pub resp_ack: String,
}

impl Default for InitiatorPorts {
  fn default() -> Self {
    Self {
      req: "req".to_string(),
      req_ack: "req_ack".to_string(),
      resp: "resp".to_string(),
      resp_ack: "resp_ack".to_string(),
    }
  }
}

/// Scripted upstream peer for one bridge port.
///
/// Sends its script one submission at a time, resubmitting a refused one
/// unchanged on the next cycle, and acknowledges responses (refusing every
/// `reject_every`-th one to exercise the bridge's delivery retry).
#[derive(Debug, Clone)]
pub struct Initiator {
  port: PortId,
  ports: InitiatorPorts,
  script: VecDeque<(Cycle, Transaction)>,
  awaiting_ack: bool,
  retry_count: u32,
  next_send_at: Cycle,
  reject_every: u32,
  responses_seen: u64,
  received: Vec<Response>,
  replies: Vec<ModelMessage>,
  until_next_event: f64,
  records: Vec<ModelRecord>,
}

impl Initiator {
  pub fn new(port: PortId, ports: InitiatorPorts, script: Vec<(Cycle, Transaction)>, reject_every: u32) -> Self {
    let mut initiator = Self {
      port,
      ports,
      script: script.into(),
      awaiting_ack: false,
      retry_count: 0,
      next_send_at: 0,
      reject_every,
      responses_seen: 0,
      received: Vec::new(),
      replies: Vec::new(),
      until_next_event: INFINITY,
      records: Vec::new(),
    };
    initiator.schedule(0);
    initiator
  }

  pub fn received(&self) -> &[Response] {
    &self.received
  }

  pub fn is_done(&self) -> bool {
    self.script.is_empty() && !self.awaiting_ack
  }

  fn schedule(&mut self, now: Cycle) {
    self.until_next_event = if !self.replies.is_empty() {
      0.0
    } else if self.awaiting_ack {
      INFINITY
    } else {
      match self.script.front() {
        Some((at, _)) => ((*at).max(self.next_send_at).saturating_sub(now)) as f64,
        None => INFINITY,
      }
    };
  }

  fn on_req_ack(&mut self, ack: AckMessage, now: Cycle, services: &mut Services) {
    let Some((_, txn)) = self.script.front() else {
      return;
    };
    if !self.awaiting_ack || ack.tag != txn.tag.0 as u64 {
      return;
    }
    self.awaiting_ack = false;
    self.next_send_at = now + 1;
    if ack.accepted {
      self.script.pop_front();
      self.retry_count = 0;
    } else {
      self.retry_count += 1;
      model_record!(self, services, "retry", format!("tag={} attempt={}", ack.tag, self.retry_count));
    }
  }

  fn on_resp(&mut self, response: Response, services: &mut Services) -> Result<(), SimulationError> {
    self.responses_seen += 1;
    let tag = response.tag.0 as u64;
    let every = self.reject_every as u64;
    let reply = if every > 0 && self.responses_seen % every == 0 {
      model_record!(self, services, "refuse", response);
      AckMessage::nack(self.port, tag, "busy", 0)
    } else {
      model_record!(self, services, RESPONSE_RECORD, serde_json::to_string(&response)?);
      self.received.push(response);
      AckMessage::ack(self.port, tag)
    };
    self.replies.push(create_message(&reply, &self.ports.resp_ack)?);
    Ok(())
  }
}

impl DevsModel for Initiator {
  fn events_ext(&mut self, incoming_message: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    let now = cycle_of(services.global_time());
    if incoming_message.port_name == self.ports.req_ack {
      let ack: AckMessage = receive_message(incoming_message, &self.ports.req_ack)?;
      if ack.port == self.port {
        self.on_req_ack(ack, now, services);
      }
    } else if incoming_message.port_name == self.ports.resp {
      let response: Response = receive_message(incoming_message, &self.ports.resp)?;
      if response.port == self.port {
        self.on_resp(response, services)?;
      }
    } else {
      return Err(SimulationError::InvalidMessage);
    }
    self.schedule(now);
    Ok(())
  }

  fn events_int(&mut self, services: &mut Services) -> Result<Vec<ModelMessage>, SimulationError> {
    let now = cycle_of(services.global_time());
    let mut messages = std::mem::take(&mut self.replies);
    if !self.awaiting_ack {
      if let Some((at, txn)) = self.script.front() {
        if *at <= now && self.next_send_at <= now {
          let txn = txn.clone();
          model_record!(self, services, "submit", txn);
          messages.push(create_message(&txn, &self.ports.req)?);
          self.awaiting_ack = true;
        }
      }
    }
    self.schedule(now);
    Ok(messages)
  }

  fn time_advance(&mut self, time_delta: f64) {
    self.until_next_event -= time_delta;
  }

  fn until_next_event(&self) -> f64 {
    self.until_next_event
  }
}

impl Reportable for Initiator {
  fn status(&self) -> String {
    format!(
      "port={}, pending={}, received={}",
      self.port,
      self.script.len(),
      self.received.len()
    )
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl ReportableModel for Initiator {}

impl SerializableModel for Initiator {
  fn get_type(&self) -> &'static str {
    "Initiator"
  }
}
