//! Read-compare-conditional-write emulation over the peer's exclusive
//! access handshake.
//!
//! The first phase of an exclusive pair carries the compare data; the second
//! carries the data to store. The bridge answers the pair with a single
//! response whose payload tells the initiator what happened:
//!
//! * commit succeeded: the compare data, echoed
//! * commit failed: the bit-complement of the compare data
//! * compare missed: the memory value read under the lock
//! * lock refused: an address error, no data

use std::collections::HashMap;

use super::config::{AddressRange, ExclusiveMode};
use super::types::{PeerStatus, ResponseStatus, Tag};

/// Lifecycle of one exclusive pair.
///
/// `LockDenied` and the commit result are terminal and carried by
/// `Resolved`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RcwState {
  AwaitingCompareData,
  /// Second phase seen; the locked read waits for the issue task.
  LockReadQueued,
  LockReadIssued,
  /// Lock granted and compare data matched; the commit write waits for the
  /// issue task.
  LockGranted,
  CommitWriteIssued,
  Resolved(RcwOutcome),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RcwOutcome {
  Committed,
  CommitFailed,
  Miss,
  LockDenied,
  /// An overlapping write reached the bridge between the two phases.
  Invalidated,
  Faulted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RcwStep {
  IssueLockRead,
  IssueCommit,
  Complete {
    status: ResponseStatus,
    data: Vec<u8>,
    outcome: RcwOutcome,
  },
}

#[derive(Clone, Debug)]
pub struct RcwContext {
  mode: ExclusiveMode,
  compare: Vec<u8>,
  swap: Vec<u8>,
  state: RcwState,
}

pub fn complement(data: &[u8]) -> Vec<u8> {
  data.iter().map(|b| !b).collect()
}

impl RcwContext {
  pub fn new(mode: ExclusiveMode, compare: Vec<u8>) -> Self {
    Self {
      mode,
      compare,
      swap: Vec::new(),
      state: RcwState::AwaitingCompareData,
    }
  }

  pub fn state(&self) -> RcwState {
    self.state
  }

  pub fn swap_data(&self) -> &[u8] {
    &self.swap
  }

  /// Peer accesses carry the exclusive flag only when emulating.
  pub fn exclusive(&self) -> bool {
    self.mode == ExclusiveMode::Translate
  }

  pub fn awaiting_commit_phase(&self) -> bool {
    self.state == RcwState::AwaitingCompareData
  }

  pub fn is_resolved(&self) -> bool {
    matches!(self.state, RcwState::Resolved(_))
  }

  fn complete(&mut self, status: ResponseStatus, data: Vec<u8>, outcome: RcwOutcome) -> RcwStep {
    self.state = RcwState::Resolved(outcome);
    RcwStep::Complete { status, data, outcome }
  }

  /// Second phase arrived. `monitor_held` is false when an overlapping write
  /// invalidated the bridge-side monitor in between.
  pub fn on_commit_data(&mut self, swap: Vec<u8>, monitor_held: bool) -> RcwStep {
    self.swap = swap;
    if self.mode == ExclusiveMode::Deny {
      return self.complete(ResponseStatus::AddressError, Vec::new(), RcwOutcome::LockDenied);
    }
    if !monitor_held {
      let data = complement(&self.compare);
      return self.complete(ResponseStatus::Ok, data, RcwOutcome::Invalidated);
    }
    self.state = RcwState::LockReadQueued;
    RcwStep::IssueLockRead
  }

  pub fn on_issued(&mut self) {
    self.state = match self.state {
      RcwState::LockReadQueued => RcwState::LockReadIssued,
      RcwState::LockGranted => RcwState::CommitWriteIssued,
      other => other,
    };
  }

  pub fn on_lock_read(&mut self, status: PeerStatus, data: &[u8]) -> RcwStep {
    let granted = match (status, self.mode) {
      (PeerStatus::SlaveError | PeerStatus::DecodeError, _) => {
        return self.complete(ResponseStatus::from_peer(status), Vec::new(), RcwOutcome::Faulted);
      },
      (PeerStatus::ExOkay, _) => true,
      (PeerStatus::Okay, ExclusiveMode::Translate) => false,
      (PeerStatus::Okay, _) => true,
    };
    if !granted {
      return self.complete(ResponseStatus::AddressError, Vec::new(), RcwOutcome::LockDenied);
    }
    if data != self.compare.as_slice() {
      return self.complete(ResponseStatus::Ok, data.to_vec(), RcwOutcome::Miss);
    }
    self.state = RcwState::LockGranted;
    RcwStep::IssueCommit
  }

  pub fn on_commit(&mut self, status: PeerStatus) -> RcwStep {
    match (status, self.mode) {
      (PeerStatus::SlaveError | PeerStatus::DecodeError, _) => {
        self.complete(ResponseStatus::from_peer(status), Vec::new(), RcwOutcome::Faulted)
      },
      (PeerStatus::Okay, ExclusiveMode::Translate) => {
        let data = complement(&self.compare);
        self.complete(ResponseStatus::Ok, data, RcwOutcome::CommitFailed)
      },
      _ => {
        let data = self.compare.clone();
        self.complete(ResponseStatus::Ok, data, RcwOutcome::Committed)
      },
    }
  }
}

/// Bridge-side monitors for exclusive pairs waiting on their second phase.
#[derive(Clone, Debug, Default)]
pub struct MonitorSet {
  armed: HashMap<Tag, AddressRange>,
}

impl MonitorSet {
  pub fn arm(&mut self, tag: Tag, address: u64, len: u64) {
    self.armed.insert(tag, AddressRange::new(address, address.saturating_add(len)));
  }

  /// Consumes the monitor for `tag`; false if it was invalidated (or never
  /// armed).
  pub fn consult(&mut self, tag: Tag) -> bool {
    self.armed.remove(&tag).is_some()
  }

  /// Drops every monitor overlapping a write, returning the tags whose
  /// monitor was lost.
  pub fn invalidate(&mut self, address: u64, len: u64) -> Vec<Tag> {
    let lost: Vec<Tag> = self
      .armed
      .iter()
      .filter(|(_, range)| range.overlaps(address, len))
      .map(|(tag, _)| *tag)
      .collect();
    for tag in &lost {
      self.armed.remove(tag);
    }
    lost
  }

  pub fn disarm(&mut self, tag: Tag) {
    self.armed.remove(&tag);
  }

  pub fn is_empty(&self) -> bool {
    self.armed.is_empty()
  }

  pub fn clear(&mut self) {
    self.armed.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const COMPARE: [u8; 4] = [0xaa; 4];

  fn armed(mode: ExclusiveMode) -> RcwContext {
    let mut ctx = RcwContext::new(mode, COMPARE.to_vec());
    assert_eq!(ctx.on_commit_data(vec![1, 2, 3, 4], true), RcwStep::IssueLockRead);
    ctx.on_issued();
    ctx
  }

  #[test]
  fn successful_commit_echoes_compare_data() {
    let mut ctx = armed(ExclusiveMode::Translate);
    assert_eq!(ctx.state(), RcwState::LockReadIssued);
    assert_eq!(ctx.on_lock_read(PeerStatus::ExOkay, &COMPARE), RcwStep::IssueCommit);
    assert_eq!(ctx.state(), RcwState::LockGranted);
    ctx.on_issued();
    assert_eq!(ctx.state(), RcwState::CommitWriteIssued);
    assert_eq!(
      ctx.on_commit(PeerStatus::ExOkay),
      RcwStep::Complete {
        status: ResponseStatus::Ok,
        data: vec![0xaa; 4],
        outcome: RcwOutcome::Committed,
      }
    );
    assert_eq!(ctx.state(), RcwState::Resolved(RcwOutcome::Committed));
  }

  #[test]
  fn failed_commit_returns_complement() {
    let mut ctx = armed(ExclusiveMode::Translate);
    ctx.on_lock_read(PeerStatus::ExOkay, &COMPARE);
    match ctx.on_commit(PeerStatus::Okay) {
      RcwStep::Complete { data, outcome, .. } => {
        assert_eq!(data, vec![0x55; 4]);
        assert_eq!(outcome, RcwOutcome::CommitFailed);
      },
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn compare_miss_returns_memory_value() {
    let mut ctx = armed(ExclusiveMode::Translate);
    match ctx.on_lock_read(PeerStatus::ExOkay, &[1, 1, 1, 1]) {
      RcwStep::Complete { status, data, outcome } => {
        assert_eq!(status, ResponseStatus::Ok);
        assert_eq!(data, vec![1, 1, 1, 1]);
        assert_eq!(outcome, RcwOutcome::Miss);
      },
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn plain_okay_on_lock_read_is_a_refusal() {
    let mut ctx = armed(ExclusiveMode::Translate);
    match ctx.on_lock_read(PeerStatus::Okay, &COMPARE) {
      RcwStep::Complete { status, outcome, .. } => {
        assert_eq!(status, ResponseStatus::AddressError);
        assert_eq!(outcome, RcwOutcome::LockDenied);
      },
      other => panic!("unexpected {:?}", other),
    }
    assert_eq!(ctx.state(), RcwState::Resolved(RcwOutcome::LockDenied));
  }

  #[test]
  fn ignore_mode_treats_plain_accesses_as_exclusive() {
    let mut ctx = armed(ExclusiveMode::Ignore);
    assert!(!ctx.exclusive());
    assert_eq!(ctx.on_lock_read(PeerStatus::Okay, &COMPARE), RcwStep::IssueCommit);
    match ctx.on_commit(PeerStatus::Okay) {
      RcwStep::Complete { data, .. } => assert_eq!(data, COMPARE.to_vec()),
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn deny_mode_and_lost_monitor_skip_the_peer() {
    let mut deny = RcwContext::new(ExclusiveMode::Deny, COMPARE.to_vec());
    assert!(matches!(
      deny.on_commit_data(vec![0; 4], true),
      RcwStep::Complete {
        status: ResponseStatus::AddressError,
        ..
      }
    ));
    let mut lost = RcwContext::new(ExclusiveMode::Translate, COMPARE.to_vec());
    assert_eq!(
      lost.on_commit_data(vec![0; 4], false),
      RcwStep::Complete {
        status: ResponseStatus::Ok,
        data: vec![0x55; 4],
        outcome: RcwOutcome::Invalidated,
      }
    );
  }

  #[test]
  fn overlapping_write_invalidates_monitor() {
    let mut monitors = MonitorSet::default();
    monitors.arm(Tag(1), 0x2000, 4);
    monitors.arm(Tag(2), 0x3000, 4);
    assert_eq!(monitors.invalidate(0x1ffc, 8), vec![Tag(1)]);
    assert!(!monitors.consult(Tag(1)));
    assert!(monitors.consult(Tag(2)));
    assert!(monitors.is_empty());
  }
}
