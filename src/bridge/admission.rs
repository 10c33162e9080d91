//! Admission and flow control.
//!
//! Each port keeps one bounded queue per direction. A parent holds its slot
//! from admission until its last upstream response has been accepted; when
//! the queue is full the request is turned away and the upstream peer has to
//! resubmit it unchanged.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::config::BridgeConfig;
use super::types::{Cycle, Direction, Tag};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
  Busy,
}

/// Result of offering a request to the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
  Accepted,
  Rejected(RejectReason),
}

impl Admission {
  pub fn is_accepted(self) -> bool {
    self == Admission::Accepted
  }
}

/// Fixed-depth queue of admitted parent tags.
#[derive(Clone, Debug)]
pub struct SlotQueue {
  depth: usize,
  held: VecDeque<Tag>,
}

impl SlotQueue {
  pub fn new(depth: usize) -> Self {
    Self {
      depth,
      held: VecDeque::with_capacity(depth),
    }
  }

  pub fn push(&mut self, tag: Tag) -> bool {
    if self.is_full() {
      return false;
    }
    self.held.push_back(tag);
    true
  }

  pub fn release(&mut self, tag: Tag) -> bool {
    match self.held.iter().position(|t| *t == tag) {
      Some(pos) => {
        self.held.remove(pos);
        true
      },
      None => false,
    }
  }

  pub fn is_full(&self) -> bool {
    self.held.len() >= self.depth
  }

  pub fn len(&self) -> usize {
    self.held.len()
  }

  pub fn is_empty(&self) -> bool {
    self.held.is_empty()
  }

  pub fn clear(&mut self) {
    self.held.clear();
  }
}

#[derive(Clone, Debug)]
pub struct AdmissionControl {
  read: SlotQueue,
  write: SlotQueue,
  read_delay: Cycle,
  write_delay: Cycle,
}

impl AdmissionControl {
  pub fn new(config: &BridgeConfig) -> Self {
    Self {
      read: SlotQueue::new(config.read.queue_depth),
      write: SlotQueue::new(config.write.queue_depth),
      read_delay: config.read.issue_delay,
      write_delay: config.write.issue_delay,
    }
  }

  fn queue(&mut self, direction: Direction) -> &mut SlotQueue {
    match direction {
      Direction::Read => &mut self.read,
      Direction::Write => &mut self.write,
    }
  }

  /// Scheduling delay applied before work in `direction` may issue.
  pub fn issue_delay(&self, direction: Direction) -> Cycle {
    match direction {
      Direction::Read => self.read_delay,
      Direction::Write => self.write_delay,
    }
  }

  /// Claims a slot. On success returns the cycle the request becomes
  /// eligible for issue. A rejection leaves no trace.
  pub fn try_admit(&mut self, direction: Direction, tag: Tag, now: Cycle) -> Result<Cycle, RejectReason> {
    let delay = self.issue_delay(direction);
    if self.queue(direction).push(tag) {
      Ok(now + delay)
    } else {
      Err(RejectReason::Busy)
    }
  }

  pub fn release(&mut self, direction: Direction, tag: Tag) -> bool {
    self.queue(direction).release(tag)
  }

  pub fn occupancy(&self, direction: Direction) -> usize {
    match direction {
      Direction::Read => self.read.len(),
      Direction::Write => self.write.len(),
    }
  }

  pub fn clear(&mut self) {
    self.read.clear();
    self.write.clear();
  }
}
