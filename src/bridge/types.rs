//! Transactions and responses on both sides of the bridge.
//!
//! The upstream (local) side speaks in [`Transaction`]s and [`Response`]s; the
//! downstream (peer) side speaks in [`SubTransaction`]s and
//! [`PeerResponse`]s. Everything here derives serde so the DEVS models can
//! ship them as JSON message content.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Virtual clock, in bus cycles.
pub type Cycle = u64;

/// Index of a bridge port.
pub type PortId = usize;

/// Upstream correlation id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag(pub u32);

impl fmt::Display for Tag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

const SYNTHETIC_TAG_BASE: u64 = 1 << 32;

/// Downstream correlation id.
///
/// The first sub-transaction of a parent reuses the parent's own tag; every
/// continuation gets a synthetic id from the upper half of the id space, so
/// the two kinds can never collide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerTag(pub u64);

impl PeerTag {
  pub fn from_parent(tag: Tag) -> Self {
    PeerTag(tag.0 as u64)
  }

  pub fn synthetic(n: u32) -> Self {
    PeerTag(SYNTHETIC_TAG_BASE | n as u64)
  }

  pub fn is_synthetic(self) -> bool {
    self.0 & SYNTHETIC_TAG_BASE != 0
  }
}

impl fmt::Display for PeerTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_synthetic() {
      write!(f, "s{}", self.0 & !SYNTHETIC_TAG_BASE)
    } else {
      write!(f, "p{}", self.0)
    }
  }
}

/// Request/response channel class. Admission queues are split by it, and so
/// is response arbitration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
  Read,
  Write,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnKind {
  /// Single read, or a variable-length burst when `beat_count > 1`.
  Read,
  /// Single write, or a variable-length burst when `beat_count > 1`.
  Write,
  /// Fixed-size power-of-two block read.
  ReadBlock,
  /// Fixed-size power-of-two block write.
  WriteBlock,
  /// One phase of a read-compare-conditional-write. The first phase
  /// (`is_last_beat == false`) carries the compare data, the second the new
  /// data.
  ExclusivePair,
}

impl TxnKind {
  /// Admission queue the request is charged against.
  pub fn direction(self) -> Direction {
    match self {
      TxnKind::Read | TxnKind::ReadBlock => Direction::Read,
      TxnKind::Write | TxnKind::WriteBlock | TxnKind::ExclusivePair => Direction::Write,
    }
  }

  /// Upstream response channel the parent's responses travel on. An RCW
  /// returns data, so it answers on the read side.
  pub fn response_class(self) -> Direction {
    match self {
      TxnKind::Write | TxnKind::WriteBlock => Direction::Write,
      TxnKind::Read | TxnKind::ReadBlock | TxnKind::ExclusivePair => Direction::Read,
    }
  }

  pub fn is_block(self) -> bool {
    matches!(self, TxnKind::ReadBlock | TxnKind::WriteBlock)
  }

  pub fn carries_data(self) -> bool {
    matches!(self, TxnKind::Write | TxnKind::WriteBlock | TxnKind::ExclusivePair)
  }
}

fn default_true() -> bool {
  true
}

fn default_mask() -> u64 {
  u64::MAX
}

/// One upstream request, or one beat of a multi-beat upstream write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
  pub tag: Tag,
  pub port: PortId,
  pub kind: TxnKind,
  pub address: u64,
  /// Bytes per beat.
  pub element_size: u32,
  pub beat_count: u32,
  /// One bit per byte of this beat, LSB = lowest address.
  #[serde(default = "default_mask")]
  pub byte_enable: u64,
  /// Beat payload for writes and RCW phases; empty for reads.
  #[serde(default)]
  pub data: Vec<u8>,
  #[serde(default = "default_true")]
  pub is_last_beat: bool,
  /// Wrapping (critical-word-first) transfer.
  #[serde(default)]
  pub wrap: bool,
  #[serde(default)]
  pub non_secure: bool,
  #[serde(default)]
  pub priority: u8,
  #[serde(default)]
  pub route: u16,
}

impl Transaction {
  pub fn new(port: PortId, tag: u32, kind: TxnKind, address: u64, element_size: u32, beat_count: u32) -> Self {
    Self {
      tag: Tag(tag),
      port,
      kind,
      address,
      element_size,
      beat_count,
      byte_enable: u64::MAX,
      data: Vec::new(),
      is_last_beat: true,
      wrap: false,
      non_secure: false,
      priority: 0,
      route: 0,
    }
  }

  pub fn read(port: PortId, tag: u32, address: u64, element_size: u32) -> Self {
    Self::new(port, tag, TxnKind::Read, address, element_size, 1)
  }

  pub fn write(port: PortId, tag: u32, address: u64, data: Vec<u8>) -> Self {
    let size = data.len() as u32;
    Self::new(port, tag, TxnKind::Write, address, size, 1).beat(data, true)
  }

  /// Copy of this header carrying one beat of write data.
  pub fn beat(&self, data: Vec<u8>, is_last_beat: bool) -> Self {
    Self {
      data,
      is_last_beat,
      ..self.clone()
    }
  }

  pub fn wrapping(mut self) -> Self {
    self.wrap = true;
    self
  }

  pub fn non_secure(mut self) -> Self {
    self.non_secure = true;
    self
  }

  pub fn with_byte_enable(mut self, mask: u64) -> Self {
    self.byte_enable = mask;
    self
  }

  pub fn total_bytes(&self) -> u64 {
    self.element_size as u64 * self.beat_count as u64
  }
}

impl fmt::Display for Transaction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{:?} {} port={} addr={:#x} size={} beats={}{}{}",
      self.kind,
      self.tag,
      self.port,
      self.address,
      self.element_size,
      self.beat_count,
      if self.wrap { " wrap" } else { "" },
      if self.is_last_beat { " last" } else { "" }
    )
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerOp {
  Read,
  Write,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurstKind {
  Incr,
  Wrap,
}

/// One peer-protocol transfer produced by splitting or merging a parent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTransaction {
  pub tag: PeerTag,
  pub port: PortId,
  pub parent: Tag,
  /// Sequence index within the parent.
  pub seq: u32,
  pub op: PeerOp,
  pub address: u64,
  pub beat_size: u32,
  pub beats: u32,
  pub burst: BurstKind,
  pub exclusive: bool,
  /// `beats * beat_size` bytes for writes, empty for reads.
  #[serde(default)]
  pub data: Vec<u8>,
  /// Per-beat byte enables for writes.
  #[serde(default)]
  pub byte_enable: Vec<u64>,
  #[serde(default)]
  pub non_secure: bool,
  #[serde(default)]
  pub priority: u8,
}

impl SubTransaction {
  pub fn total_bytes(&self) -> u64 {
    self.beat_size as u64 * self.beats as u64
  }

  /// Address of beat `i`, following the burst's increment or wrap rule.
  pub fn beat_address(&self, i: u32) -> u64 {
    let step = self.beat_size as u64 * i as u64;
    match self.burst {
      BurstKind::Incr => self.address.wrapping_add(step),
      BurstKind::Wrap => {
        let span = self.total_bytes();
        let base = self.address & !(span - 1);
        base + (self.address - base + step) % span
      },
    }
  }
}

impl fmt::Display for SubTransaction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{:?} {} (parent {} seq {}) addr={:#x} {}x{} {:?}{}",
      self.op,
      self.tag,
      self.parent,
      self.seq,
      self.address,
      self.beats,
      self.beat_size,
      self.burst,
      if self.exclusive { " excl" } else { "" }
    )
  }
}

/// Peer response codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
  /// Normal success. For an exclusive access this means the lock was not
  /// granted (read) or the commit failed (write).
  Okay,
  /// Exclusive success.
  ExOkay,
  SlaveError,
  DecodeError,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerResponse {
  pub tag: PeerTag,
  pub port: PortId,
  pub status: PeerStatus,
  /// Read data, `beats * beat_size` bytes in beat order.
  #[serde(default)]
  pub data: Vec<u8>,
}

/// Upstream completion status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
  Ok,
  DataError,
  AddressError,
}

impl ResponseStatus {
  pub fn from_peer(status: PeerStatus) -> Self {
    match status {
      PeerStatus::Okay | PeerStatus::ExOkay => ResponseStatus::Ok,
      PeerStatus::SlaveError => ResponseStatus::DataError,
      PeerStatus::DecodeError => ResponseStatus::AddressError,
    }
  }

  /// Keeps the more severe of the two.
  pub fn merge(self, other: ResponseStatus) -> ResponseStatus {
    self.max(other)
  }

  pub fn is_ok(self) -> bool {
    self == ResponseStatus::Ok
  }
}

/// One upstream response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub tag: Tag,
  pub port: PortId,
  pub kind: TxnKind,
  pub status: ResponseStatus,
  pub address: u64,
  #[serde(default)]
  pub data: Vec<u8>,
  pub beat_index: u32,
  pub beat_count: u32,
  /// Downstream transfers folded into the parent up to this response.
  pub transfer_number: u32,
  /// Downstream transfers of the parent in total.
  pub transfer_count: u32,
}

impl Response {
  pub fn is_last(&self) -> bool {
    self.beat_index + 1 == self.beat_count
  }
}

impl fmt::Display for Response {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{:?} {} port={} {:?} addr={:#x} beat {}/{} transfer {}/{}",
      self.kind,
      self.tag,
      self.port,
      self.status,
      self.address,
      self.beat_index + 1,
      self.beat_count,
      self.transfer_number,
      self.transfer_count
    )
  }
}

/// Bitmask with the low `size` bits set.
pub fn byte_mask(size: u32) -> u64 {
  if size >= 64 {
    u64::MAX
  } else {
    (1u64 << size) - 1
  }
}
