//! TOML workload scripts.
//!
//! ```toml
//! [[poke]]
//! address = 0x2000
//! data = [0xAA, 0xAA, 0xAA, 0xAA]
//!
//! [[request]]
//! port = 0
//! at = 4
//! tag = 7
//! kind = "exclusive_pair"
//! address = 0x2000
//! element_size = 4
//! data = [[0xAA, 0xAA, 0xAA, 0xAA], [0x78, 0x56, 0x34, 0x12]]
//! ```
//!
//! Write data is one array per beat. An exclusive pair lists its compare
//! data and then its swap data, and is expanded into its two phases. A
//! top-level `fail_next_commit = true` makes the peer refuse the first
//! exclusive commit it sees.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use crate::bridge::{Cycle, PortId, Transaction, TxnKind};
use crate::model::Script;

const DEMO_WORKLOAD: &str = include_str!("../../demos/scenarios.toml");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poke {
  pub address: u64,
  pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSpec {
  #[serde(default)]
  pub port: PortId,
  /// Earliest cycle the initiator offers it.
  #[serde(default)]
  pub at: Cycle,
  pub tag: u32,
  pub kind: TxnKind,
  pub address: u64,
  pub element_size: u32,
  /// Reads only; writes take their beat count from `data`.
  #[serde(default)]
  pub beat_count: Option<u32>,
  #[serde(default)]
  pub data: Vec<Vec<u8>>,
  #[serde(default)]
  pub byte_enable: Option<u64>,
  #[serde(default)]
  pub wrap: bool,
  #[serde(default)]
  pub non_secure: bool,
}

impl RequestSpec {
  /// The submissions this request turns into, in order.
  pub fn submissions(&self) -> io::Result<Vec<Transaction>> {
    let beats = match self.kind {
      TxnKind::Read | TxnKind::ReadBlock => self.beat_count.unwrap_or(1),
      TxnKind::ExclusivePair => {
        if self.data.len() != 2 {
          return Err(self.invalid("an exclusive pair needs compare and swap data"));
        }
        1
      },
      TxnKind::Write | TxnKind::WriteBlock => {
        if self.data.is_empty() {
          return Err(self.invalid("a write needs at least one beat of data"));
        }
        self.data.len() as u32
      },
    };

    let mut header = Transaction::new(self.port, self.tag, self.kind, self.address, self.element_size, beats);
    header.wrap = self.wrap;
    header.non_secure = self.non_secure;
    if let Some(mask) = self.byte_enable {
      header.byte_enable = mask;
    }

    if !self.kind.carries_data() {
      return Ok(vec![header]);
    }
    let last = self.data.len() - 1;
    Ok(
      self
        .data
        .iter()
        .enumerate()
        .map(|(i, beat)| header.beat(beat.clone(), i == last))
        .collect(),
    )
  }

  fn invalid(&self, what: &str) -> io::Error {
    io::Error::new(
      io::ErrorKind::InvalidData,
      format!("request tag {} on port {}: {}", self.tag, self.port, what),
    )
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
  #[serde(default, rename = "poke")]
  pub pokes: Vec<Poke>,
  #[serde(default, rename = "request")]
  pub requests: Vec<RequestSpec>,
  #[serde(default)]
  pub fail_next_commit: bool,
}

impl Workload {
  pub fn parse(content: &str) -> io::Result<Self> {
    toml::from_str(content)
      .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("failed to parse workload: {}", e)))
  }

  pub fn load(path: &Path) -> io::Result<Self> {
    let content = fs::read_to_string(path)
      .map_err(|e| io::Error::new(io::ErrorKind::NotFound, format!("cannot read workload {:?}: {}", path, e)))?;
    Self::parse(&content)
  }

  pub fn demo() -> io::Result<Self> {
    Self::parse(DEMO_WORKLOAD)
  }

  /// Per-port initiator scripts, ordered by start cycle. Requests for ports
  /// the bridge does not have are refused.
  pub fn scripts(&self, ports: usize) -> io::Result<Vec<Script>> {
    let mut scripts: Vec<Script> = vec![Vec::new(); ports];
    for request in &self.requests {
      let Some(script) = scripts.get_mut(request.port) else {
        return Err(request.invalid(&format!("the bridge has {} port(s)", ports)));
      };
      for txn in request.submissions()? {
        script.push((request.at, txn));
      }
    }
    for script in &mut scripts {
      script.sort_by_key(|(at, _)| *at);
    }
    Ok(scripts)
  }
}
