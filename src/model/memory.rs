//! Downstream peer: a byte-addressed reference memory with an exclusive
//! monitor, wrapped in a DEVS model with fixed latency and optional
//! not-accepted injection.

use serde::{Deserialize, Serialize};
use sim::models::model_trait::{DevsModel, Reportable, ReportableModel, SerializableModel};
use sim::models::{ModelMessage, ModelRecord};
use sim::simulator::Services;
use sim::utils::errors::SimulationError;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::f64::INFINITY;

use super::msg::{create_message, cycle_of, receive_message, AckMessage};
use crate::bridge::{Cycle, PeerOp, PeerResponse, PeerStatus, PortId, SubTransaction};
use crate::model_record;

fn default_latency() -> Cycle {
  2
}

fn default_size() -> u64 {
  1 << 32
}

fn default_true() -> bool {
  true
}

/// Peer behaviour knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
  /// Cycles from acceptance to response.
  #[serde(default = "default_latency")]
  pub latency: Cycle,
  /// Refuse every n-th transfer with a not-accepted (0 = never).
  #[serde(default)]
  pub nacc_every: u32,
  /// Grant exclusive locks.
  #[serde(default = "default_true")]
  pub exclusive: bool,
  /// Accesses at or above this address get a decode error.
  #[serde(default = "default_size")]
  pub size: u64,
}

impl Default for PeerConfig {
  fn default() -> Self {
    Self {
      latency: default_latency(),
      nacc_every: 0,
      exclusive: true,
      size: default_size(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Reservation {
  address: u64,
  len: u64,
}

impl Reservation {
  fn covers(&self, address: u64, len: u64) -> bool {
    address >= self.address && address + len <= self.address + self.len
  }

  fn overlaps(&self, address: u64, len: u64) -> bool {
    address < self.address + self.len && self.address < address + len
  }
}

/// Sparse memory; unwritten bytes read as zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceMemory {
  bytes: BTreeMap<u64, u8>,
  /// One exclusive reservation per requesting port.
  reservations: HashMap<PortId, Reservation>,
  exclusive: bool,
  size: u64,
  fail_next_commit: bool,
}

impl ReferenceMemory {
  pub fn new(config: &PeerConfig) -> Self {
    Self {
      bytes: BTreeMap::new(),
      reservations: HashMap::new(),
      exclusive: config.exclusive,
      size: config.size,
      fail_next_commit: false,
    }
  }

  pub fn peek(&self, address: u64, len: usize) -> Vec<u8> {
    (0..len as u64)
      .map(|i| self.bytes.get(&(address + i)).copied().unwrap_or(0))
      .collect()
  }

  pub fn poke(&mut self, address: u64, data: &[u8]) {
    for (i, byte) in data.iter().enumerate() {
      self.bytes.insert(address + i as u64, *byte);
    }
  }

  /// Makes the next exclusive commit fail even if its reservation holds.
  pub fn fail_next_commit(&mut self) {
    self.fail_next_commit = true;
  }

  pub fn clear_reservations(&mut self) {
    self.reservations.clear();
  }

  fn in_range(&self, sub: &SubTransaction) -> bool {
    (0..sub.beats).all(|i| sub.beat_address(i) + sub.beat_size as u64 <= self.size)
  }

  fn write_beats(&mut self, sub: &SubTransaction) {
    let size = sub.beat_size as usize;
    for i in 0..sub.beats {
      let address = sub.beat_address(i);
      let mask = sub.byte_enable.get(i as usize).copied().unwrap_or(u64::MAX);
      let start = i as usize * size;
      let Some(chunk) = sub.data.get(start..start + size) else {
        continue;
      };
      for (b, byte) in chunk.iter().enumerate() {
        if mask >> b & 1 == 1 {
          self.bytes.insert(address + b as u64, *byte);
        }
      }
    }
    let len = sub.total_bytes();
    let base = (0..sub.beats).map(|i| sub.beat_address(i)).min().unwrap_or(sub.address);
    self.reservations.retain(|_, r| !r.overlaps(base, len));
  }

  /// Performs one peer transfer and returns its response.
  pub fn access(&mut self, sub: &SubTransaction) -> PeerResponse {
    let mut response = PeerResponse {
      tag: sub.tag,
      port: sub.port,
      status: PeerStatus::Okay,
      data: Vec::new(),
    };
    if !self.in_range(sub) {
      response.status = PeerStatus::DecodeError;
      return response;
    }
    let len = sub.total_bytes();
    match sub.op {
      PeerOp::Read => {
        for i in 0..sub.beats {
          response.data.extend(self.peek(sub.beat_address(i), sub.beat_size as usize));
        }
        if sub.exclusive && self.exclusive {
          self.reservations.insert(
            sub.port,
            Reservation {
              address: sub.address,
              len,
            },
          );
          response.status = PeerStatus::ExOkay;
        }
      },
      PeerOp::Write if sub.exclusive => {
        let held = self
          .reservations
          .get(&sub.port)
          .map_or(false, |r| r.covers(sub.address, len));
        let fail = std::mem::take(&mut self.fail_next_commit);
        if self.exclusive && held && !fail {
          self.write_beats(sub);
          response.status = PeerStatus::ExOkay;
        }
        self.reservations.remove(&sub.port);
      },
      PeerOp::Write => self.write_beats(sub),
    }
    response
  }
}

/// Debug commands accepted on the memory's control port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCommand {
  Poke { address: u64, data: Vec<u8> },
  FailNextCommit,
}

#[derive(Debug, Clone)]
pub struct MemoryTarget {
  req_port: String,
  ack_port: String,
  resp_port: String,
  control_port: String,
  config: PeerConfig,
  memory: ReferenceMemory,
  acks: Vec<ModelMessage>,
  in_flight: VecDeque<(Cycle, PeerResponse)>,
  seen: u64,
  until_next_event: f64,
  records: Vec<ModelRecord>,
}

impl MemoryTarget {
  pub fn new(req_port: String, ack_port: String, resp_port: String, control_port: String, config: PeerConfig) -> Self {
    Self {
      req_port,
      ack_port,
      resp_port,
      control_port,
      memory: ReferenceMemory::new(&config),
      config,
      acks: Vec::new(),
      in_flight: VecDeque::new(),
      seen: 0,
      until_next_event: INFINITY,
      records: Vec::new(),
    }
  }

  pub fn memory(&self) -> &ReferenceMemory {
    &self.memory
  }

  fn schedule(&mut self, now: Cycle) {
    self.until_next_event = if !self.acks.is_empty() {
      0.0
    } else {
      match self.in_flight.front() {
        Some((at, _)) => at.saturating_sub(now) as f64,
        None => INFINITY,
      }
    };
  }
}

impl DevsModel for MemoryTarget {
  fn events_ext(&mut self, incoming_message: &ModelMessage, services: &mut Services) -> Result<(), SimulationError> {
    let now = cycle_of(services.global_time());
    if incoming_message.port_name == self.control_port {
      let command: MemoryCommand = receive_message(incoming_message, &self.control_port)?;
      model_record!(self, services, "control", format!("{:?}", command));
      match command {
        MemoryCommand::Poke { address, data } => self.memory.poke(address, &data),
        MemoryCommand::FailNextCommit => self.memory.fail_next_commit(),
      }
      self.schedule(now);
      return Ok(());
    }

    let sub: SubTransaction = receive_message(incoming_message, &self.req_port)?;
    self.seen += 1;
    let every = self.config.nacc_every as u64;
    if every > 0 && self.seen % every == 0 {
      model_record!(self, services, "nacc", sub);
      let nack = AckMessage::nack(sub.port, sub.tag.0, "busy", 0);
      self.acks.push(create_message(&nack, &self.ack_port)?);
      self.schedule(now);
      return Ok(());
    }

    let response = self.memory.access(&sub);
    model_record!(self, services, "accept", sub);
    self.acks.push(create_message(&AckMessage::ack(sub.port, sub.tag.0), &self.ack_port)?);
    self.in_flight.push_back((now + self.config.latency, response));
    self.schedule(now);
    Ok(())
  }

  fn events_int(&mut self, services: &mut Services) -> Result<Vec<ModelMessage>, SimulationError> {
    let now = cycle_of(services.global_time());
    let mut messages = std::mem::take(&mut self.acks);
    while let Some((at, _)) = self.in_flight.front() {
      if *at > now {
        break;
      }
      if let Some((_, response)) = self.in_flight.pop_front() {
        model_record!(self, services, "respond", format!("tag={} {:?}", response.tag, response.status));
        messages.push(create_message(&response, &self.resp_port)?);
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

impl Reportable for MemoryTarget {
  fn status(&self) -> String {
    format!("seen={}, in_flight={}", self.seen, self.in_flight.len())
  }

  fn records(&self) -> &Vec<ModelRecord> {
    &self.records
  }
}

impl ReportableModel for MemoryTarget {}

impl SerializableModel for MemoryTarget {
  fn get_type(&self) -> &'static str {
    "MemoryTarget"
  }
}
