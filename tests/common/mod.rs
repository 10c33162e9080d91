//! Cycle loop driving a [`Bridge`] against the reference memory, without the
//! DEVS scheduler in between.

#![allow(dead_code)]

use busbridge::bridge::{
  Admission, Bridge, BridgeConfig, BridgeOutput, Cycle, PeerResponse, PeerTag, PortId, Response, SubTransaction, Tag,
  Transaction,
};
use busbridge::model::{PeerConfig, ReferenceMemory};
use std::collections::{HashSet, VecDeque};

#[derive(Clone, Copy, Debug)]
enum Refusal {
  Issue(PortId, PeerTag),
  Delivery(PortId, Tag),
}

pub struct Harness {
  pub bridge: Bridge,
  pub memory: ReferenceMemory,
  pub now: Cycle,
  pub latency: Cycle,
  /// Refuse this many of the next peer transfers.
  pub refuse_issues: u32,
  /// Refuse this many of the next upstream deliveries.
  pub refuse_deliveries: u32,
  /// Cycles between an output and its refusal signal.
  pub refusal_delay: Cycle,
  /// When false nothing is ever acknowledged; windows close on their own.
  pub explicit_accepts: bool,
  refusals: Vec<(Cycle, Refusal)>,
  queues: Vec<VecDeque<Transaction>>,
  in_flight: Vec<(Cycle, PeerResponse)>,
  live_peer_tags: HashSet<(PortId, PeerTag)>,
  pub issued: Vec<(Cycle, SubTransaction)>,
  pub delivered: Vec<(Cycle, Response)>,
  pub rejections: u32,
}

impl Harness {
  pub fn new(config: BridgeConfig) -> Self {
    Self::with_peer(config, PeerConfig::default())
  }

  pub fn with_peer(config: BridgeConfig, peer: PeerConfig) -> Self {
    let ports = config.ports;
    Self {
      bridge: Bridge::new(config).unwrap(),
      memory: ReferenceMemory::new(&peer),
      now: 0,
      latency: peer.latency,
      refuse_issues: 0,
      refuse_deliveries: 0,
      refusal_delay: 0,
      explicit_accepts: true,
      refusals: Vec::new(),
      queues: vec![VecDeque::new(); ports],
      in_flight: Vec::new(),
      live_peer_tags: HashSet::new(),
      issued: Vec::new(),
      delivered: Vec::new(),
      rejections: 0,
    }
  }

  /// Queues a submission; the port's initiator offers one per cycle and
  /// retries refused ones unchanged.
  pub fn push(&mut self, txn: Transaction) {
    self.queues[txn.port].push_back(txn);
  }

  pub fn push_all(&mut self, txns: impl IntoIterator<Item = Transaction>) {
    for txn in txns {
      self.push(txn);
    }
  }

  pub fn tick(&mut self) {
    let now = self.now;

    let (due, later): (Vec<_>, Vec<_>) = self.in_flight.drain(..).partition(|(at, _)| *at <= now);
    self.in_flight = later;
    for (_, response) in due {
      assert!(self.live_peer_tags.remove(&(response.port, response.tag)));
      self.bridge.on_peer_response(response, now).unwrap();
    }

    let (due, later): (Vec<_>, Vec<_>) = self.refusals.drain(..).partition(|(at, _)| *at <= now);
    self.refusals = later;
    for (_, refusal) in due {
      self.refuse(refusal, now);
    }

    for queue in &mut self.queues {
      let Some(txn) = queue.front() else {
        continue;
      };
      match self.bridge.submit(txn.clone(), now).unwrap() {
        Admission::Accepted => {
          queue.pop_front();
        },
        Admission::Rejected(_) => self.rejections += 1,
      }
    }

    for output in self.bridge.poll(now).unwrap() {
      match output {
        BridgeOutput::Issue(sub) => {
          self.issued.push((now, sub.clone()));
          if self.refuse_issues > 0 {
            self.refuse_issues -= 1;
            self.schedule_refusal(Refusal::Issue(sub.port, sub.tag), now);
            continue;
          }
          assert!(
            self.live_peer_tags.insert((sub.port, sub.tag)),
            "peer tag {} issued twice while live",
            sub.tag
          );
          let response = self.memory.access(&sub);
          if self.explicit_accepts {
            self.bridge.on_issue_accepted(sub.port, sub.tag).unwrap();
          }
          self.in_flight.push((now + self.latency, response));
        },
        BridgeOutput::Deliver(response) => {
          self.delivered.push((now, response.clone()));
          if self.refuse_deliveries > 0 {
            self.refuse_deliveries -= 1;
            self.schedule_refusal(Refusal::Delivery(response.port, response.tag), now);
          } else if self.explicit_accepts {
            self.bridge.on_delivery_accepted(response.port, response.tag).unwrap();
          }
        },
      }
    }

    self.now += 1;
  }

  fn schedule_refusal(&mut self, refusal: Refusal, now: Cycle) {
    if self.refusal_delay == 0 {
      self.refuse(refusal, now);
    } else {
      self.refusals.push((now + self.refusal_delay, refusal));
    }
  }

  fn refuse(&mut self, refusal: Refusal, now: Cycle) {
    match refusal {
      Refusal::Issue(port, tag) => self.bridge.on_issue_rejected(port, tag, now).unwrap(),
      Refusal::Delivery(port, tag) => self.bridge.on_delivery_rejected(port, tag, now).unwrap(),
    }
  }

  pub fn is_settled(&self) -> bool {
    self.bridge.is_idle()
      && self.in_flight.is_empty()
      && self.refusals.is_empty()
      && self.queues.iter().all(VecDeque::is_empty)
  }

  /// Ticks until everything has drained; panics after `limit` cycles.
  pub fn run(&mut self, limit: Cycle) {
    let end = self.now + limit;
    while !self.is_settled() {
      assert!(self.now < end, "bridge did not settle within {} cycles", limit);
      self.tick();
    }
  }

  /// Drops everything in flight on both sides.
  pub fn reset(&mut self) {
    self.bridge.reset();
    self.in_flight.clear();
    self.refusals.clear();
    self.live_peer_tags.clear();
    for queue in &mut self.queues {
      queue.clear();
    }
  }

  pub fn issued_for(&self, port: PortId, tag: Tag) -> Vec<SubTransaction> {
    self
      .issued
      .iter()
      .filter(|(_, s)| s.port == port && s.parent == tag)
      .map(|(_, s)| s.clone())
      .collect()
  }

  /// Responses accepted upstream for one parent (refused copies excluded).
  pub fn responses_for(&self, port: PortId, tag: Tag) -> Vec<Response> {
    let mut out: Vec<Response> = Vec::new();
    for (_, r) in self.delivered.iter().filter(|(_, r)| r.port == port && r.tag == tag) {
      if out.last() != Some(r) {
        out.push(r.clone());
      }
    }
    out
  }

  /// Parent tags in upstream delivery order, one entry per delivered
  /// response.
  pub fn delivery_order(&self, port: PortId) -> Vec<u32> {
    self
      .delivered
      .iter()
      .filter(|(_, r)| r.port == port)
      .map(|(_, r)| r.tag.0)
      .collect()
  }
}

pub fn beats(kind_header: &Transaction, data: &[Vec<u8>]) -> Vec<Transaction> {
  let last = data.len() - 1;
  data
    .iter()
    .enumerate()
    .map(|(i, d)| kind_header.beat(d.clone(), i == last))
    .collect()
}
