//! Bridge configuration, validated once when the bridge is built.

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::types::{Cycle, Direction};

/// Upstream (local) bus shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusProfile {
  /// Bytes per beat.
  pub data_width: u32,
  /// Longest variable-length burst accepted.
  pub max_beats: u32,
}

/// Downstream (peer) bus shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownstreamProfile {
  pub data_width: u32,
  pub max_beats: u32,
  /// Address boundary no burst may cross (4096 for DMA-class peers).
  #[serde(default)]
  pub boundary: Option<u64>,
  #[serde(default = "default_true")]
  pub wrap_bursts: bool,
}

fn default_true() -> bool {
  true
}

/// Per-direction admission and scheduling knobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionConfig {
  pub queue_depth: usize,
  #[serde(default)]
  pub issue_delay: Cycle,
  #[serde(default)]
  pub response_delay: Cycle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusiveMode {
  /// Refuse exclusive pairs with an address error.
  Deny,
  /// Plain read, compare, plain write; the commit always reports success.
  Ignore,
  /// Full lock-read / commit-write emulation.
  Translate,
}

/// Half-open address range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRange {
  pub start: u64,
  pub end: u64,
}

impl AddressRange {
  pub fn new(start: u64, end: u64) -> Self {
    Self { start, end }
  }

  pub fn overlaps(&self, address: u64, len: u64) -> bool {
    let end = address.saturating_add(len);
    address < self.end && self.start < end
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
  pub ports: usize,
  pub upstream: BusProfile,
  pub downstream: DownstreamProfile,
  pub read: DirectionConfig,
  pub write: DirectionConfig,
  /// Cycles an issued transfer (or delivered response) stays open to a
  /// not-accepted signal before it counts as accepted.
  #[serde(default = "default_accept_window")]
  pub accept_window: Cycle,
  /// Outstanding peer ids per port, 0 = unlimited.
  #[serde(default)]
  pub max_outstanding_ids: usize,
  #[serde(default = "default_true")]
  pub anti_interleave_lock: bool,
  #[serde(default = "default_exclusive_mode")]
  pub exclusive_mode: ExclusiveMode,
  /// Peer beats per merged burst.
  #[serde(default = "default_max_merge_beats")]
  pub max_merge_beats: u32,
  #[serde(default)]
  pub secure_ranges: Vec<AddressRange>,
}

fn default_accept_window() -> Cycle {
  1
}

fn default_exclusive_mode() -> ExclusiveMode {
  ExclusiveMode::Translate
}

fn default_max_merge_beats() -> u32 {
  16
}

impl Default for BridgeConfig {
  fn default() -> Self {
    Self {
      ports: 1,
      upstream: BusProfile {
        data_width: 16,
        max_beats: 16,
      },
      downstream: DownstreamProfile {
        data_width: 4,
        max_beats: 16,
        boundary: Some(4096),
        wrap_bursts: true,
      },
      read: DirectionConfig {
        queue_depth: 8,
        issue_delay: 0,
        response_delay: 0,
      },
      write: DirectionConfig {
        queue_depth: 8,
        issue_delay: 0,
        response_delay: 0,
      },
      accept_window: default_accept_window(),
      max_outstanding_ids: 0,
      anti_interleave_lock: true,
      exclusive_mode: default_exclusive_mode(),
      max_merge_beats: default_max_merge_beats(),
      secure_ranges: Vec::new(),
    }
  }
}

impl BridgeConfig {
  pub fn direction(&self, direction: Direction) -> &DirectionConfig {
    match direction {
      Direction::Read => &self.read,
      Direction::Write => &self.write,
    }
  }

  /// Beats per merged peer burst after both limits apply.
  pub fn merge_limit(&self) -> u32 {
    self.downstream.max_beats.min(self.max_merge_beats).max(1)
  }

  pub fn is_secure(&self, address: u64, len: u64) -> bool {
    self.secure_ranges.iter().any(|range| range.overlaps(address, len))
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.ports == 0 {
      return Err(ConfigError::NoPorts);
    }
    check_width("upstream", self.upstream.data_width)?;
    check_width("downstream", self.downstream.data_width)?;
    check_beats("upstream", self.upstream.max_beats)?;
    check_beats("downstream", self.downstream.max_beats)?;
    if self.max_merge_beats == 0 {
      return Err(ConfigError::MergeLimit);
    }
    for (name, dir) in [("read", &self.read), ("write", &self.write)] {
      if dir.queue_depth == 0 {
        return Err(ConfigError::QueueDepth(name));
      }
    }
    if let Some(boundary) = self.downstream.boundary {
      if !boundary.is_power_of_two() || boundary < self.downstream.data_width as u64 {
        return Err(ConfigError::Boundary(boundary));
      }
    }
    if let Some(range) = self.secure_ranges.iter().find(|r| r.start >= r.end) {
      return Err(ConfigError::EmptyRange(range.start, range.end));
    }
    Ok(())
  }
}

fn check_width(side: &'static str, width: u32) -> Result<(), ConfigError> {
  if width == 0 || width > 64 || !width.is_power_of_two() {
    return Err(ConfigError::Width(side, width));
  }
  Ok(())
}

fn check_beats(side: &'static str, beats: u32) -> Result<(), ConfigError> {
  if beats == 0 || beats > 256 {
    return Err(ConfigError::BurstLimit(side, beats));
  }
  Ok(())
}
