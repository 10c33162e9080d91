//! Per-port order queue and write-lock arbiter.
//!
//! Parents sit in the queue in arrival order until every one of their
//! sub-transactions has been accepted downstream. A parent may issue when
//! nothing earlier in the queue touches the same bytes with a write on
//! either side, and, while the port is write-locked, only the locking
//! parent may issue.

use std::collections::VecDeque;

use super::arena::Handle;
use super::types::{Cycle, Tag};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockState {
  ReadEligible,
  WriteLocked(Tag),
}

#[derive(Clone, Debug)]
pub struct OrderEntry {
  pub tag: Tag,
  pub handle: Handle,
  pub is_write: bool,
  pub address: u64,
  pub len: u64,
  /// Earliest cycle the parent may issue (admission scheduling delay).
  pub eligible_at: Cycle,
}

impl OrderEntry {
  fn conflicts(&self, other: &OrderEntry) -> bool {
    if !(self.is_write || other.is_write) {
      return false;
    }
    let self_end = self.address.saturating_add(self.len);
    let other_end = other.address.saturating_add(other.len);
    self.address < other_end && other.address < self_end
  }
}

#[derive(Clone, Debug)]
pub struct OrderQueue {
  entries: VecDeque<OrderEntry>,
  lock: LockState,
}

impl Default for OrderQueue {
  fn default() -> Self {
    Self::new()
  }
}

impl OrderQueue {
  pub fn new() -> Self {
    Self {
      entries: VecDeque::new(),
      lock: LockState::ReadEligible,
    }
  }

  pub fn push(&mut self, entry: OrderEntry) {
    self.entries.push_back(entry);
  }

  /// Drops a fully issued (or abandoned) parent and releases the write
  /// lock if it held it.
  pub fn remove(&mut self, tag: Tag) -> bool {
    self.unlock(tag);
    match self.entries.iter().position(|e| e.tag == tag) {
      Some(index) => {
        self.entries.remove(index);
        true
      },
      None => false,
    }
  }

  pub fn lock(&mut self, tag: Tag) {
    self.lock = LockState::WriteLocked(tag);
  }

  pub fn unlock(&mut self, tag: Tag) {
    if self.lock == LockState::WriteLocked(tag) {
      self.lock = LockState::ReadEligible;
    }
  }

  pub fn state(&self) -> LockState {
    self.lock
  }

  pub fn clear(&mut self) {
    self.entries.clear();
    self.lock = LockState::ReadEligible;
  }

  fn blocked(&self, index: usize) -> bool {
    let entry = &self.entries[index];
    self.entries.iter().take(index).any(|earlier| earlier.conflicts(entry))
  }

  fn candidates(&self) -> impl Iterator<Item = &OrderEntry> + '_ {
    let locked = match self.lock {
      LockState::WriteLocked(tag) => Some(tag),
      LockState::ReadEligible => None,
    };
    self
      .entries
      .iter()
      .enumerate()
      .filter(move |(_, e)| locked.map_or(true, |tag| e.tag == tag))
      .filter(move |(i, _)| !self.blocked(*i))
      .map(|(_, e)| e)
  }

  /// Oldest parent allowed to issue at `now` whose next sub-transaction is
  /// ready.
  pub fn select(&self, now: Cycle, mut ready: impl FnMut(Handle) -> bool) -> Option<Handle> {
    self
      .candidates()
      .filter(|e| e.eligible_at <= now)
      .find(|e| ready(e.handle))
      .map(|e| e.handle)
  }

  /// Earliest future cycle at which a currently ready parent becomes
  /// eligible.
  pub fn next_eligible(&self, now: Cycle, mut ready: impl FnMut(Handle) -> bool) -> Option<Cycle> {
    self
      .candidates()
      .filter(|e| e.eligible_at > now)
      .filter(|e| ready(e.handle))
      .map(|e| e.eligible_at)
      .min()
  }
}
