//! Per-port bridge engine.
//!
//! Owns every piece of state for one port: the parent arena, admission
//! queues, order queue, correlation table, exclusive monitors and response
//! arbiter. Two cooperative tasks run on it each cycle: the issue task
//! (order arbiter, then at most one peer transfer) and the response task (at
//! most one upstream response).

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::admission::{Admission, AdmissionControl};
use super::arena::{Arena, Handle};
use super::config::BridgeConfig;
use super::correlation::{CorrelationTable, SubRef, TagAllocator};
use super::error::BridgeError;
use super::exclusive::{MonitorSet, RcwContext, RcwOutcome, RcwState, RcwStep};
use super::ordering::{LockState, OrderEntry, OrderQueue};
use super::response::ResponseArbiter;
use super::splitter::{self, SplitPlan};
use super::types::{
  byte_mask, BurstKind, Cycle, Direction, PeerOp, PeerResponse, PeerStatus, PeerTag, PortId, Response,
  ResponseStatus, SubTransaction, Tag, Transaction, TxnKind,
};
use super::validate::{self, Violation};

/// Counters kept per port.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStats {
  pub admitted: u64,
  pub rejected: u64,
  pub violations: u64,
  pub secure_faults: u64,
  pub issued: u64,
  pub resent: u64,
  pub peer_responses: u64,
  pub completed: u64,
  pub delivered: u64,
  pub delivery_retries: u64,
  pub rcw_committed: u64,
  pub rcw_failed: u64,
  pub rcw_miss: u64,
  pub rcw_denied: u64,
  pub resets: u64,
}

/// Output of one engine step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeOutput {
  Issue(SubTransaction),
  Deliver(Response),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SubStage {
  Waiting,
  /// Sent; the peer may still refuse it.
  InWindow,
  Accepted,
  Resolved,
  /// Dropped unissued after the parent failed.
  Skipped,
}

#[derive(Clone, Debug)]
struct SubSlot {
  tag: Option<PeerTag>,
  stage: SubStage,
}

impl SubSlot {
  fn waiting() -> Self {
    Self {
      tag: None,
      stage: SubStage::Waiting,
    }
  }

  fn issued(&self) -> bool {
    matches!(self.stage, SubStage::Accepted | SubStage::Resolved | SubStage::Skipped)
  }
}

#[derive(Clone, Debug)]
struct Parent {
  header: Transaction,
  admitted: Direction,
  class: Direction,
  plan: Option<SplitPlan>,
  payload: Vec<u8>,
  /// Byte enables per payload slot.
  masks: Vec<u64>,
  beats_received: u32,
  beats_done: bool,
  subs: Vec<SubSlot>,
  status: ResponseStatus,
  failure: Option<Violation>,
  rcw: Option<RcwContext>,
  rcw_data: Vec<u8>,
  response_seq: Option<u64>,
  completed: bool,
}

impl Parent {
  fn new(txn: &Transaction) -> Self {
    let mut header = txn.clone();
    header.data = Vec::new();
    Self {
      header,
      admitted: txn.kind.direction(),
      class: txn.kind.response_class(),
      plan: None,
      payload: Vec::new(),
      masks: Vec::new(),
      beats_received: 0,
      beats_done: !txn.kind.carries_data() || txn.is_last_beat,
      subs: Vec::new(),
      status: ResponseStatus::Ok,
      failure: None,
      rcw: None,
      rcw_data: Vec::new(),
      response_seq: None,
      completed: false,
    }
  }

  fn tag(&self) -> Tag {
    self.header.tag
  }

  fn dump(&self) -> String {
    self.header.to_string()
  }

  fn is_write(&self) -> bool {
    self.admitted == Direction::Write
  }

  /// Index of the next sub-transaction, if it may issue now.
  fn next_ready(&self) -> Option<usize> {
    if self.failure.is_some() || self.completed {
      return None;
    }
    let index = self.subs.iter().position(|s| s.stage == SubStage::Waiting)?;
    // write subs wait for the upstream beats they carry
    match &self.plan {
      Some(plan) if self.header.kind.carries_data() => {
        (self.beats_received >= plan.beats_needed(index)).then_some(index)
      },
      _ => Some(index),
    }
  }

  fn fully_issued(&self) -> bool {
    let rcw_issued = self
      .rcw
      .as_ref()
      .map_or(true, |rcw| matches!(rcw.state(), RcwState::CommitWriteIssued | RcwState::Resolved(_)));
    rcw_issued && self.beats_done && self.subs.iter().all(SubSlot::issued)
  }

  fn is_complete(&self) -> bool {
    let rcw_done = self.rcw.as_ref().map_or(true, |rcw| rcw.is_resolved());
    let subs_done = self
      .subs
      .iter()
      .all(|s| matches!(s.stage, SubStage::Resolved | SubStage::Skipped));
    rcw_done && self.beats_done && subs_done
  }

  /// Marks the parent failed and drops whatever has not issued yet.
  fn abandon(&mut self, violation: Violation) {
    self.failure = Some(violation);
    self.status = self.status.merge(violation.status());
    for sub in self.subs.iter_mut().filter(|s| s.stage == SubStage::Waiting) {
      sub.stage = SubStage::Skipped;
    }
  }

  fn order_entry(&self, handle: Handle, eligible_at: Cycle) -> OrderEntry {
    let (address, len) = match &self.plan {
      Some(plan) => (plan.base, plan.payload_len() as u64),
      None => (self.header.address, self.header.total_bytes()),
    };
    OrderEntry {
      tag: self.tag(),
      handle,
      is_write: self.is_write(),
      address,
      len,
      eligible_at,
    }
  }

  /// Copies one upstream write beat into the payload.
  fn store_beat(&mut self, beat: &Transaction) -> Result<(), Violation> {
    let Some(plan) = &self.plan else {
      return Ok(());
    };
    let index = self.beats_received;
    self.beats_received += 1;
    if beat.is_last_beat {
      self.beats_done = true;
    }
    if index >= self.header.beat_count {
      return Err(Violation::BurstLength);
    }
    validate::check_beat(&self.header, beat)?;
    let size = plan.element_size();
    let offset = plan.beat_offset(index);
    self.payload[offset..offset + size].copy_from_slice(&beat.data);
    let unit = plan.unit as usize;
    for k in 0..plan.units_per_beat as usize {
      self.masks[offset / unit + k] = (beat.byte_enable >> (k * unit)) & byte_mask(plan.unit);
    }
    if beat.is_last_beat && self.beats_received < self.header.beat_count {
      return Err(Violation::BurstLength);
    }
    Ok(())
  }

  fn build_sub(&self, index: usize, tag: PeerTag, port: PortId) -> Option<SubTransaction> {
    let mut sub = SubTransaction {
      tag,
      port,
      parent: self.tag(),
      seq: index as u32,
      op: PeerOp::Read,
      address: self.header.address,
      beat_size: self.header.element_size,
      beats: 1,
      burst: BurstKind::Incr,
      exclusive: false,
      data: Vec::new(),
      byte_enable: Vec::new(),
      non_secure: self.header.non_secure,
      priority: self.header.priority,
    };
    if let Some(rcw) = &self.rcw {
      sub.exclusive = rcw.exclusive();
      if index == 1 {
        sub.op = PeerOp::Write;
        sub.data = rcw.swap_data().to_vec();
        sub.byte_enable = vec![self.header.byte_enable & byte_mask(self.header.element_size)];
      }
      return Some(sub);
    }
    let plan = self.plan.as_ref()?;
    let part = plan.subs.get(index)?;
    sub.address = part.address;
    sub.beat_size = part.beat_size;
    sub.beats = part.beats();
    sub.burst = part.burst;
    if self.is_write() {
      let unit = plan.unit as usize;
      sub.op = PeerOp::Write;
      for &slot in &part.slots {
        sub.data.extend_from_slice(&self.payload[slot * unit..(slot + 1) * unit]);
        sub.byte_enable.push(self.masks[slot]);
      }
    }
    Some(sub)
  }

  /// Folds a peer read response into the payload.
  fn scatter(&mut self, index: usize, response: &PeerResponse) {
    let Some(plan) = &self.plan else {
      return;
    };
    let Some(part) = plan.subs.get(index) else {
      return;
    };
    let unit = plan.unit as usize;
    if response.data.len() < part.slots.len() * unit {
      self.status = self.status.merge(ResponseStatus::DataError);
    }
    for (beat, &slot) in part.slots.iter().enumerate() {
      if let Some(chunk) = response.data.get(beat * unit..(beat + 1) * unit) {
        self.payload[slot * unit..(slot + 1) * unit].copy_from_slice(chunk);
      }
    }
  }

  fn responses(&self, port: PortId) -> Vec<Response> {
    let template = Response {
      tag: self.tag(),
      port,
      kind: self.header.kind,
      status: self.status,
      address: self.header.address,
      data: Vec::new(),
      beat_index: 0,
      beat_count: 1,
      transfer_number: 0,
      transfer_count: 0,
    };
    if self.failure.is_some() {
      return vec![template];
    }
    let issued = self.subs.iter().filter(|s| s.stage == SubStage::Resolved).count() as u32;
    match (self.header.kind, &self.plan) {
      (TxnKind::ExclusivePair, _) | (_, None) => vec![Response {
        data: self.rcw_data.clone(),
        transfer_number: issued,
        transfer_count: issued,
        ..template
      }],
      (TxnKind::Write | TxnKind::WriteBlock, Some(plan)) => vec![Response {
        transfer_number: plan.transfer_count(),
        transfer_count: plan.transfer_count(),
        ..template
      }],
      (TxnKind::Read | TxnKind::ReadBlock, Some(plan)) => {
        let beats = self.header.beat_count;
        let total = plan.transfer_count();
        let size = plan.element_size();
        (0..beats)
          .map(|i| {
            let offset = plan.beat_offset(i);
            Response {
              address: if i == 0 {
                self.header.address
              } else {
                plan.base + offset as u64
              },
              data: self.payload[offset..offset + size].to_vec(),
              beat_index: i,
              beat_count: beats,
              transfer_number: total * (i + 1) / beats,
              transfer_count: total,
              ..template.clone()
            }
          })
          .collect()
      },
    }
  }
}

#[derive(Clone, Debug)]
struct IssueWindow {
  sub: SubTransaction,
  at: SubRef,
  deadline: Cycle,
  resend_at: Option<Cycle>,
}

#[derive(Clone, Debug)]
pub struct PortEngine {
  id: PortId,
  config: BridgeConfig,
  parents: Arena<Parent>,
  live: HashMap<Tag, Handle>,
  admission: AdmissionControl,
  order: OrderQueue,
  correlation: CorrelationTable,
  synthetic: TagAllocator,
  monitors: MonitorSet,
  responses: ResponseArbiter,
  issue: Option<IssueWindow>,
  last_issue: Option<Cycle>,
  stats: PortStats,
}

impl PortEngine {
  pub fn new(id: PortId, config: &BridgeConfig) -> Self {
    Self {
      id,
      config: config.clone(),
      parents: Arena::new(),
      live: HashMap::new(),
      admission: AdmissionControl::new(config),
      order: OrderQueue::new(),
      correlation: CorrelationTable::default(),
      synthetic: TagAllocator::default(),
      monitors: MonitorSet::default(),
      responses: ResponseArbiter::new(config.anti_interleave_lock, config.accept_window),
      issue: None,
      last_issue: None,
      stats: PortStats::default(),
    }
  }

  pub fn stats(&self) -> &PortStats {
    &self.stats
  }

  pub fn lock_state(&self) -> LockState {
    self.order.state()
  }

  /// Issued sub-transactions still waiting for a peer response.
  pub fn outstanding(&self) -> usize {
    self.correlation.unresolved()
  }

  pub fn live_parents(&self) -> usize {
    self.parents.len()
  }

  pub fn is_idle(&self) -> bool {
    self.parents.is_empty() && self.issue.is_none() && self.responses.is_idle()
  }

  fn parent(&self, handle: Handle) -> Result<&Parent, BridgeError> {
    self.parents.get(handle).ok_or(BridgeError::StaleHandle {
      port: self.id,
      handle: handle.to_string(),
    })
  }

  fn parent_mut(&mut self, handle: Handle) -> Result<&mut Parent, BridgeError> {
    let port = self.id;
    self.parents.get_mut(handle).ok_or(BridgeError::StaleHandle {
      port,
      handle: handle.to_string(),
    })
  }

  // ---- ingress ----

  pub fn submit(&mut self, txn: Transaction, now: Cycle) -> Result<Admission, BridgeError> {
    // a tag comes back only after its final response was taken
    if self.live.contains_key(&txn.tag) && self.responses.delivering_last(txn.tag) {
      debug!("port {}: {} reused, final delivery taken as accepted", self.id, txn.tag);
      self.on_delivery_accepted(txn.tag)?;
    }
    if txn.kind == TxnKind::ExclusivePair && !txn.is_last_beat {
      self.check_open_pairs(&txn)?;
    }
    if let Some(&handle) = self.live.get(&txn.tag) {
      self.continue_parent(handle, txn, now)?;
      return Ok(Admission::Accepted);
    }
    let eligible_at = match self.admission.try_admit(txn.kind.direction(), txn.tag, now) {
      Ok(at) => at,
      Err(reason) => {
        self.stats.rejected += 1;
        debug!("port {}: {} not accepted ({:?})", self.id, txn, reason);
        return Ok(Admission::Rejected(reason));
      },
    };
    self.stats.admitted += 1;
    debug!("port {}: admitted {}", self.id, txn);
    self.admit(txn, eligible_at, now)?;
    Ok(Admission::Accepted)
  }

  /// Pairs on one port are not interleaved: a first phase while another
  /// pair still waits for its second phase is fatal.
  fn check_open_pairs(&self, txn: &Transaction) -> Result<(), BridgeError> {
    let open = self.parents.iter().find(|(_, p)| {
      p.header.kind == TxnKind::ExclusivePair
        && p.rcw.as_ref().map_or(!p.beats_done, |rcw| rcw.awaiting_commit_phase())
    });
    match open {
      Some((_, parent)) => Err(BridgeError::ExclusiveReentry {
        port: self.id,
        tag: txn.tag,
        dump: parent.dump(),
      }),
      None => Ok(()),
    }
  }

  fn admit(&mut self, txn: Transaction, eligible_at: Cycle, now: Cycle) -> Result<(), BridgeError> {
    let mut parent = Parent::new(&txn);
    if let Err(violation) = validate::check_header(&txn, &self.config) {
      self.note_violation(&txn, violation);
      parent.failure = Some(violation);
      parent.status = violation.status();
      let done = parent.beats_done;
      let handle = self.parents.insert(parent);
      self.live.insert(txn.tag, handle);
      if done {
        self.complete(handle, now)?;
      }
      return Ok(());
    }

    match txn.kind {
      TxnKind::ExclusivePair => {
        parent.rcw = Some(RcwContext::new(self.config.exclusive_mode, txn.data.clone()));
        self.monitors.arm(txn.tag, txn.address, txn.total_bytes());
      },
      kind => {
        let plan = splitter::plan(&txn, &self.config);
        parent.subs = plan.subs.iter().map(|_| SubSlot::waiting()).collect();
        parent.payload = vec![0; plan.payload_len()];
        parent.masks = vec![byte_mask(plan.unit); plan.order.len()];
        debug!(
          "port {}: {} planned as {:?} into {} sub-transaction(s)",
          self.id,
          txn.tag,
          plan.policy,
          plan.subs.len()
        );
        parent.plan = Some(plan);
        if kind.carries_data() {
          let plan = parent.plan.as_ref();
          let (base, len) = plan.map_or((txn.address, 0), |p| (p.base, p.payload_len() as u64));
          for lost in self.monitors.invalidate(base, len) {
            debug!("port {}: write {} invalidated exclusive monitor of {}", self.id, txn.tag, lost);
          }
          if let Err(violation) = parent.store_beat(&txn) {
            self.note_violation(&txn, violation);
            parent.abandon(violation);
          }
        }
      },
    }

    let failed = parent.failure.is_some();
    let done = parent.beats_done;
    let handle = self.parents.insert(parent);
    self.live.insert(txn.tag, handle);
    if failed {
      if done {
        self.complete(handle, now)?;
      }
      return Ok(());
    }
    let entry = self.parent(handle)?.order_entry(handle, eligible_at);
    self.order.push(entry);
    Ok(())
  }

  fn note_violation(&mut self, txn: &Transaction, violation: Violation) {
    warn!("port {}: {} rejected at the protocol level: {}", self.id, txn, violation);
    if violation == Violation::SecureRange {
      self.stats.secure_faults += 1;
    } else {
      self.stats.violations += 1;
    }
  }

  fn continue_parent(&mut self, handle: Handle, txn: Transaction, now: Cycle) -> Result<(), BridgeError> {
    let port = self.id;
    let parent = self.parent(handle)?;
    let kind = parent.header.kind;

    if kind == TxnKind::ExclusivePair && txn.kind == TxnKind::ExclusivePair {
      let awaiting = parent.rcw.as_ref().map_or(!parent.beats_done, |rcw| rcw.awaiting_commit_phase());
      if !txn.is_last_beat || !awaiting {
        return Err(BridgeError::ExclusiveReentry {
          port,
          tag: txn.tag,
          dump: parent.dump(),
        });
      }
      return self.commit_phase(handle, txn, now);
    }

    if kind != txn.kind || !kind.carries_data() || parent.beats_done {
      return Err(BridgeError::TagInUse {
        port,
        tag: txn.tag,
        dump: parent.dump(),
      });
    }

    let parent = self.parent_mut(handle)?;
    if parent.failure.is_some() {
      parent.beats_received += 1;
      parent.beats_done = txn.is_last_beat;
    } else if let Err(violation) = parent.store_beat(&txn) {
      self.note_violation(&txn, violation);
      self.fail(handle, violation)?;
    }
    self.try_complete(handle, now)
  }

  fn commit_phase(&mut self, handle: Handle, txn: Transaction, now: Cycle) -> Result<(), BridgeError> {
    let held = self.monitors.consult(txn.tag);
    let parent = self.parent_mut(handle)?;
    parent.beats_done = true;
    if parent.failure.is_some() {
      return self.try_complete(handle, now);
    }
    if let Err(violation) = validate::check_beat(&parent.header, &txn) {
      self.note_violation(&txn, violation);
      self.fail(handle, violation)?;
      return self.try_complete(handle, now);
    }
    let Some(rcw) = parent.rcw.as_mut() else {
      return Ok(());
    };
    match rcw.on_commit_data(txn.data, held) {
      RcwStep::IssueLockRead => parent.subs.push(SubSlot::waiting()),
      RcwStep::IssueCommit => parent.subs.push(SubSlot::waiting()),
      RcwStep::Complete { status, data, outcome } => self.finish_rcw(handle, status, data, outcome, now)?,
    }
    Ok(())
  }

  fn finish_rcw(
    &mut self,
    handle: Handle,
    status: ResponseStatus,
    data: Vec<u8>,
    outcome: RcwOutcome,
    now: Cycle,
  ) -> Result<(), BridgeError> {
    let port = self.id;
    let parent = self.parent_mut(handle)?;
    parent.status = status;
    parent.rcw_data = data;
    debug!("port {}: exclusive pair {} resolved as {:?}", port, parent.tag(), outcome);
    match outcome {
      RcwOutcome::Committed => self.stats.rcw_committed += 1,
      RcwOutcome::CommitFailed | RcwOutcome::Invalidated => self.stats.rcw_failed += 1,
      RcwOutcome::Miss => self.stats.rcw_miss += 1,
      RcwOutcome::LockDenied | RcwOutcome::Faulted => self.stats.rcw_denied += 1,
    }
    self.try_complete(handle, now)
  }

  /// Abandons the unissued remainder of a parent.
  fn fail(&mut self, handle: Handle, violation: Violation) -> Result<(), BridgeError> {
    let parent = self.parent_mut(handle)?;
    parent.abandon(violation);
    let tag = parent.tag();
    self.order.remove(tag);
    self.monitors.disarm(tag);
    Ok(())
  }

  fn try_complete(&mut self, handle: Handle, now: Cycle) -> Result<(), BridgeError> {
    let parent = self.parent(handle)?;
    let tag = parent.tag();
    let issued = parent.fully_issued() || parent.failure.is_some();
    let complete = !parent.completed && parent.is_complete();
    if issued {
      self.order.remove(tag);
    }
    if complete {
      self.complete(handle, now)?;
    }
    Ok(())
  }

  fn complete(&mut self, handle: Handle, now: Cycle) -> Result<(), BridgeError> {
    let port = self.id;
    let parent = self.parent(handle)?;
    let responses = parent.responses(port);
    let (tag, class, reserved) = (parent.tag(), parent.class, parent.response_seq);
    let seq = match reserved {
      Some(seq) => seq,
      None => self.responses.reserve(class, handle, tag),
    };
    let ready_at = now + self.config.direction(class).response_delay;
    debug!("port {}: {} complete, {} response(s) ready at {}", port, tag, responses.len(), ready_at);
    self.responses.complete(class, seq, responses, ready_at);
    let parent = self.parent_mut(handle)?;
    parent.completed = true;
    parent.response_seq = Some(seq);
    self.stats.completed += 1;
    self.order.remove(tag);
    self.monitors.disarm(tag);
    Ok(())
  }

  fn retire(&mut self, handle: Handle) -> Result<(), BridgeError> {
    let port = self.id;
    let parent = self.parents.remove(handle).ok_or(BridgeError::StaleHandle {
      port,
      handle: handle.to_string(),
    })?;
    let tag = parent.tag();
    self.live.remove(&tag);
    for sub_tag in parent.subs.iter().filter_map(|s| s.tag) {
      self.correlation.remove(sub_tag);
    }
    self.admission.release(parent.admitted, tag);
    self.order.remove(tag);
    self.monitors.disarm(tag);
    debug!("port {}: retired {}", port, tag);
    Ok(())
  }

  // ---- issue task ----

  fn budget_exhausted(&self) -> bool {
    let limit = self.config.max_outstanding_ids;
    limit > 0 && self.correlation.unresolved() >= limit
  }

  fn poll_issue(&mut self, now: Cycle, out: &mut Vec<BridgeOutput>) -> Result<(), BridgeError> {
    if let Some(window) = self.issue.as_mut() {
      match window.resend_at {
        Some(at) if at <= now => {
          window.resend_at = None;
          window.deadline = now + self.config.accept_window;
          debug!("port {}: resending {}", self.id, window.sub);
          out.push(BridgeOutput::Issue(window.sub.clone()));
          self.stats.resent += 1;
          self.last_issue = Some(now);
          if self.config.accept_window == 0 {
            self.accept_issue()?;
          }
          return Ok(());
        },
        Some(_) => return Ok(()),
        None if window.deadline <= now => self.accept_issue()?,
        None => return Ok(()),
      }
    }
    if self.last_issue == Some(now) || self.budget_exhausted() {
      return Ok(());
    }
    let parents = &self.parents;
    let Some(handle) = self
      .order
      .select(now, |h| parents.get(h).map_or(false, |p| p.next_ready().is_some()))
    else {
      return Ok(());
    };
    self.issue_next(handle, now, out)
  }

  fn issue_next(&mut self, handle: Handle, now: Cycle, out: &mut Vec<BridgeOutput>) -> Result<(), BridgeError> {
    let port = self.id;
    let parent = self.parents.get_mut(handle).ok_or(BridgeError::StaleHandle {
      port,
      handle: handle.to_string(),
    })?;
    let Some(index) = parent.next_ready() else {
      return Ok(());
    };
    let tag = if index == 0 {
      PeerTag::from_parent(parent.tag())
    } else {
      self.synthetic.allocate(&self.correlation)
    };
    let sub = parent.build_sub(index, tag, port).ok_or(BridgeError::StaleHandle {
      port,
      handle: handle.to_string(),
    })?;
    let at = SubRef { parent: handle, index };
    if self.correlation.insert(tag, at).is_err() {
      return Err(BridgeError::PeerTagInUse {
        port,
        tag,
        dump: sub.to_string(),
      });
    }
    parent.subs[index] = SubSlot {
      tag: Some(tag),
      stage: SubStage::InWindow,
    };
    if let Some(rcw) = parent.rcw.as_mut() {
      rcw.on_issued();
    }
    if parent.response_seq.is_none() {
      parent.response_seq = Some(self.responses.reserve(parent.class, handle, parent.header.tag));
    }
    let multi = parent.subs.len() > 1 || parent.header.beat_count > 1;
    if index == 0 && parent.is_write() && parent.rcw.is_none() && multi {
      self.order.lock(parent.header.tag);
    }

    debug!("port {}: issue {}", port, sub);
    self.stats.issued += 1;
    self.last_issue = Some(now);
    out.push(BridgeOutput::Issue(sub.clone()));
    self.issue = Some(IssueWindow {
      sub,
      at,
      deadline: now + self.config.accept_window,
      resend_at: None,
    });
    if self.config.accept_window == 0 {
      self.accept_issue()?;
    }
    Ok(())
  }

  /// Closes the open acceptance window: the transfer now belongs to the
  /// peer.
  fn accept_issue(&mut self) -> Result<(), BridgeError> {
    let Some(window) = self.issue.take() else {
      return Ok(());
    };
    let parent = self.parent_mut(window.at.parent)?;
    if let Some(slot) = parent.subs.get_mut(window.at.index) {
      if slot.stage == SubStage::InWindow {
        slot.stage = SubStage::Accepted;
      }
    }
    let tag = parent.tag();
    if parent.fully_issued() {
      debug!("port {}: {} fully issued", self.id, tag);
      self.order.remove(tag);
    }
    Ok(())
  }

  pub fn on_issue_accepted(&mut self, tag: PeerTag) -> Result<(), BridgeError> {
    let open = matches!(&self.issue, Some(window) if window.sub.tag == tag && window.resend_at.is_none());
    if open {
      self.accept_issue()?;
    }
    Ok(())
  }

  pub fn on_issue_rejected(&mut self, tag: PeerTag, now: Cycle) -> Result<(), BridgeError> {
    match self.issue.as_mut() {
      Some(window) if window.sub.tag == tag => {
        window.resend_at = Some(now + 1);
        debug!("port {}: {} not accepted, resend at {}", self.id, tag, now + 1);
        Ok(())
      },
      _ => Err(BridgeError::UnknownPeerTag { port: self.id, tag }),
    }
  }

  // ---- peer responses ----

  pub fn on_peer_response(&mut self, response: PeerResponse, now: Cycle) -> Result<(), BridgeError> {
    let port = self.id;
    let Some(at) = self.correlation.lookup(response.tag) else {
      return Err(BridgeError::UnknownPeerTag { port, tag: response.tag });
    };
    if self.issue.as_ref().map_or(false, |w| w.sub.tag == response.tag) {
      self.accept_issue()?;
    }
    let parent = self.parents.get_mut(at.parent).ok_or(BridgeError::StaleHandle {
      port,
      handle: at.parent.to_string(),
    })?;
    let Some(slot) = parent.subs.get_mut(at.index) else {
      return Err(BridgeError::UnknownPeerTag { port, tag: response.tag });
    };
    if slot.stage != SubStage::Accepted {
      return Err(BridgeError::DuplicateResponse {
        port,
        tag: response.tag,
        dump: parent.header.to_string(),
      });
    }
    slot.stage = SubStage::Resolved;
    self.correlation.resolved();
    self.stats.peer_responses += 1;
    debug!("port {}: {:?} for {}", port, response.status, response.tag);

    if let Some(rcw) = parent.rcw.as_mut() {
      let step = if at.index == 0 {
        rcw.on_lock_read(response.status, &response.data)
      } else {
        rcw.on_commit(response.status)
      };
      match step {
        RcwStep::IssueCommit | RcwStep::IssueLockRead => {
          parent.subs.push(SubSlot::waiting());
          return Ok(());
        },
        RcwStep::Complete { status, data, outcome } => {
          return self.finish_rcw(at.parent, status, data, outcome, now);
        },
      }
    }

    parent.status = parent.status.merge(ResponseStatus::from_peer(response.status));
    if !parent.is_write() && response.status != PeerStatus::DecodeError {
      parent.scatter(at.index, &response);
    }
    self.try_complete(at.parent, now)
  }

  // ---- response task ----

  fn poll_response(&mut self, now: Cycle, out: &mut Vec<BridgeOutput>) -> Result<(), BridgeError> {
    let delivery = self.responses.poll(now);
    if let Some(response) = delivery.response {
      if !delivery.resent {
        self.stats.delivered += 1;
      }
      debug!("port {}: deliver {}", self.id, response);
      out.push(BridgeOutput::Deliver(response));
    }
    for handle in delivery.retired {
      self.retire(handle)?;
    }
    Ok(())
  }

  pub fn on_delivery_accepted(&mut self, tag: Tag) -> Result<(), BridgeError> {
    if let Some(retired) = self.responses.accepted(tag) {
      for handle in retired {
        self.retire(handle)?;
      }
    }
    Ok(())
  }

  pub fn on_delivery_rejected(&mut self, tag: Tag, now: Cycle) {
    if self.responses.rejected(tag, now) {
      self.stats.delivery_retries += 1;
    } else {
      warn!("port {}: delivery refusal for {} arrived after its window closed", self.id, tag);
    }
  }

  // ---- scheduling ----

  pub fn poll(&mut self, now: Cycle, out: &mut Vec<BridgeOutput>) -> Result<(), BridgeError> {
    self.poll_issue(now, out)?;
    self.poll_response(now, out)
  }

  pub fn next_wakeup(&self, now: Cycle) -> Option<Cycle> {
    let issue = match &self.issue {
      Some(window) => Some(window.resend_at.unwrap_or(window.deadline)),
      None if self.budget_exhausted() => None,
      None => {
        let ready = |h: Handle| self.parents.get(h).map_or(false, |p| p.next_ready().is_some());
        if self.order.select(now, ready).is_some() {
          let earliest = self.last_issue.map_or(now, |at| at + 1);
          Some(earliest.max(now))
        } else {
          self.order.next_eligible(now, ready)
        }
      },
    };
    let response = self.responses.next_wakeup(now);
    [issue, response].into_iter().flatten().min()
  }

  /// Drops every in-flight parent, window and monitor on this port.
  pub fn reset(&mut self) {
    info!(
      "port {}: reset with {} parent(s) and {} peer transfer(s) in flight",
      self.id,
      self.parents.len(),
      self.correlation.unresolved()
    );
    self.parents.clear();
    self.live.clear();
    self.admission.clear();
    self.order.clear();
    self.correlation.clear();
    self.synthetic.reset();
    self.monitors.clear();
    self.responses.clear();
    self.issue = None;
    self.last_issue = None;
    self.stats.resets += 1;
  }
}
