//! Fatal bridge errors.
//!
//! Admission rejections, peer not-accepted signals, protocol violations and
//! secure-range faults are all answered on the wire and never show up here.
//! What does show up is a broken correlation invariant: there is no safe way
//! to keep simulating after one, so every [`BridgeError`] ends the run.

use thiserror::Error;

use super::types::{PeerTag, PortId, Tag};

#[derive(Debug, Error)]
pub enum BridgeError {
  #[error("port {port} does not exist")]
  NoSuchPort { port: PortId },

  #[error("port {port}: peer response for unknown tag {tag}")]
  UnknownPeerTag { port: PortId, tag: PeerTag },

  #[error("port {port}: second response for tag {tag} ({dump})")]
  DuplicateResponse { port: PortId, tag: PeerTag, dump: String },

  #[error("port {port}: tag {tag} is still in flight ({dump})")]
  TagInUse { port: PortId, tag: Tag, dump: String },

  #[error("port {port}: peer tag {tag} already correlated ({dump})")]
  PeerTagInUse { port: PortId, tag: PeerTag, dump: String },

  #[error("port {port}: first exclusive phase for {tag} arrived before the previous one completed ({dump})")]
  ExclusiveReentry { port: PortId, tag: Tag, dump: String },

  #[error("port {port}: parent handle {handle} is stale")]
  StaleHandle { port: PortId, handle: String },

  #[error(transparent)]
  Config(#[from] ConfigError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
  #[error("bridge needs at least one port")]
  NoPorts,

  #[error("{0} data width {1} is not a power of two in 1..=64")]
  Width(&'static str, u32),

  #[error("{0} burst limit {1} is outside 1..=256")]
  BurstLimit(&'static str, u32),

  #[error("max_merge_beats must be at least 1")]
  MergeLimit,

  #[error("{0} queue depth must be at least 1")]
  QueueDepth(&'static str),

  #[error("address boundary {0:#x} must be a power of two no smaller than the peer width")]
  Boundary(u64),

  #[error("secure range [{0:#x}, {1:#x}) is empty")]
  EmptyRange(u64, u64),
}
