//! Protocol checks run at admission.
//!
//! A request that fails here is still admitted, but it never reaches the
//! peer: the initiator gets an address-error (or, for secure ranges, a
//! data-error) completion instead.

use std::fmt;

use super::config::BridgeConfig;
use super::types::{ResponseStatus, Transaction, TxnKind};

const BLOCK_BEATS: [u32; 5] = [1, 2, 4, 8, 16];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Violation {
  ElementSize,
  BurstLength,
  Misaligned,
  IllegalWrap,
  BeatData,
  OrphanCommitPhase,
  SecureRange,
}

impl Violation {
  pub fn status(self) -> ResponseStatus {
    match self {
      Violation::SecureRange => ResponseStatus::DataError,
      _ => ResponseStatus::AddressError,
    }
  }
}

impl fmt::Display for Violation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let text = match self {
      Violation::ElementSize => "element size exceeds bus width or is not a power of two",
      Violation::BurstLength => "burst length outside the legal set",
      Violation::Misaligned => "misaligned address",
      Violation::IllegalWrap => "wrapping transfer with an illegal length",
      Violation::BeatData => "beat data does not match the element size",
      Violation::OrphanCommitPhase => "second exclusive phase without a first",
      Violation::SecureRange => "non-secure access to a secure range",
    };
    f.write_str(text)
  }
}

/// Checks the header (first beat) of a new parent.
pub fn check_header(txn: &Transaction, config: &BridgeConfig) -> Result<(), Violation> {
  let size = txn.element_size;
  if size == 0 || !size.is_power_of_two() || size > config.upstream.data_width {
    return Err(Violation::ElementSize);
  }

  let beats = txn.beat_count;
  let legal_length = match txn.kind {
    TxnKind::Read | TxnKind::Write => beats >= 1 && beats <= config.upstream.max_beats,
    TxnKind::ReadBlock | TxnKind::WriteBlock => {
      BLOCK_BEATS.contains(&beats) && beats <= config.upstream.max_beats
    },
    TxnKind::ExclusivePair => beats == 1,
  };
  if !legal_length {
    return Err(Violation::BurstLength);
  }

  if txn.kind == TxnKind::ExclusivePair {
    if txn.is_last_beat {
      return Err(Violation::OrphanCommitPhase);
    }
    if size > config.downstream.data_width {
      return Err(Violation::ElementSize);
    }
  }

  let unit = size.min(config.downstream.data_width) as u64;
  if txn.wrap {
    let span = txn.total_bytes();
    if txn.kind == TxnKind::ExclusivePair || !span.is_power_of_two() || (size as u64 > unit && beats != 1) {
      return Err(Violation::IllegalWrap);
    }
    if txn.address % unit != 0 {
      return Err(Violation::Misaligned);
    }
  } else if txn.address % size as u64 != 0 {
    return Err(Violation::Misaligned);
  }

  if txn.kind.carries_data() && txn.data.len() != size as usize {
    return Err(Violation::BeatData);
  }

  if txn.non_secure && config.is_secure(txn.address, txn.total_bytes()) {
    return Err(Violation::SecureRange);
  }

  Ok(())
}

/// Checks a continuation beat against its parent's header.
pub fn check_beat(header: &Transaction, beat: &Transaction) -> Result<(), Violation> {
  if beat.data.len() != header.element_size as usize {
    return Err(Violation::BeatData);
  }
  Ok(())
}
