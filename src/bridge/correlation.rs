//! Peer tag correlation.

use std::collections::HashMap;

use super::arena::Handle;
use super::types::PeerTag;

/// Where a peer tag points: a parent in the arena and the index of the
/// sub-transaction within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubRef {
  pub parent: Handle,
  pub index: usize,
}

/// Peer tag to parent context. Entries are created when a sub-transaction is
/// first issued and live until its parent retires, so a tag is never handed
/// out twice while any response for it could still be in flight.
#[derive(Clone, Debug, Default)]
pub struct CorrelationTable {
  entries: HashMap<PeerTag, SubRef>,
  /// Issued sub-transactions still waiting for their peer response.
  unresolved: usize,
}

impl CorrelationTable {
  /// Fails with the existing entry if the tag is already correlated.
  pub fn insert(&mut self, tag: PeerTag, sub: SubRef) -> Result<(), SubRef> {
    if let Some(existing) = self.entries.get(&tag) {
      return Err(*existing);
    }
    self.entries.insert(tag, sub);
    self.unresolved += 1;
    Ok(())
  }

  pub fn lookup(&self, tag: PeerTag) -> Option<SubRef> {
    self.entries.get(&tag).copied()
  }

  pub fn resolved(&mut self) {
    self.unresolved = self.unresolved.saturating_sub(1);
  }

  pub fn remove(&mut self, tag: PeerTag) -> Option<SubRef> {
    self.entries.remove(&tag)
  }

  pub fn contains(&self, tag: PeerTag) -> bool {
    self.entries.contains_key(&tag)
  }

  pub fn unresolved(&self) -> usize {
    self.unresolved
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn clear(&mut self) {
    self.entries.clear();
    self.unresolved = 0;
  }
}

/// Hands out synthetic continuation tags, skipping any still correlated.
#[derive(Clone, Debug, Default)]
pub struct TagAllocator {
  next: u32,
}

impl TagAllocator {
  pub fn allocate(&mut self, table: &CorrelationTable) -> PeerTag {
    loop {
      let tag = PeerTag::synthetic(self.next);
      self.next = self.next.wrapping_add(1);
      if !table.contains(tag) {
        return tag;
      }
    }
  }

  pub fn reset(&mut self) {
    self.next = 0;
  }
}
