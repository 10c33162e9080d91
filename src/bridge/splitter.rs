//! Transaction splitter/merger.
//!
//! A parent's payload is cut into units of `min(element_size, peer width)`
//! bytes, laid out in address order from `base`. `order` lists the payload
//! slot of every unit in the order the upstream side produces (or expects)
//! them; for wrapping transfers that starts at the critical word. Units are
//! then grouped into peer sub-transactions.

use super::config::BridgeConfig;
use super::types::{BurstKind, Transaction};

const MERGEABLE_BLOCK_BEATS: [u32; 4] = [2, 4, 8, 16];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergePolicy {
  /// Each wide beat split into several narrow single transfers.
  Narrowed,
  /// One transfer, one beat.
  Single,
  /// Beats merged into peer bursts.
  Merged,
  /// Block could not be merged; one transfer per beat.
  PerBeat,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubPlan {
  pub address: u64,
  pub beat_size: u32,
  pub burst: BurstKind,
  /// Payload slot of every beat of this sub, in beat order.
  pub slots: Vec<usize>,
  /// Last arrival position this sub covers.
  pub last_position: usize,
}

impl SubPlan {
  pub fn beats(&self) -> u32 {
    self.slots.len() as u32
  }
}

#[derive(Clone, Debug)]
pub struct SplitPlan {
  pub unit: u32,
  pub units_per_beat: u32,
  pub base: u64,
  pub order: Vec<usize>,
  pub subs: Vec<SubPlan>,
  pub policy: MergePolicy,
}

impl SplitPlan {
  pub fn payload_len(&self) -> usize {
    self.order.len() * self.unit as usize
  }

  pub fn slot_address(&self, slot: usize) -> u64 {
    self.base + slot as u64 * self.unit as u64
  }

  pub fn element_size(&self) -> usize {
    (self.unit * self.units_per_beat) as usize
  }

  /// Payload byte offset of upstream beat `beat`.
  pub fn beat_offset(&self, beat: u32) -> usize {
    let n = self.units_per_beat as usize;
    let first_slot = self.order[beat as usize * n];
    (first_slot / n) * self.element_size()
  }

  /// Upstream beats that must have arrived before sub `index` can issue.
  pub fn beats_needed(&self, index: usize) -> u32 {
    (self.subs[index].last_position / self.units_per_beat as usize) as u32 + 1
  }

  /// Peer data transfers across all subs.
  pub fn transfer_count(&self) -> u32 {
    self.order.len() as u32
  }
}

/// Plans the peer sub-transactions for a parent whose header already passed
/// validation.
pub fn plan(txn: &Transaction, config: &BridgeConfig) -> SplitPlan {
  let width = config.downstream.data_width;
  let size = txn.element_size;
  let unit = size.min(width);
  let units_per_beat = size / unit;
  let total_units = (txn.beat_count * units_per_beat) as usize;
  let span = txn.total_bytes();

  let (base, order): (u64, Vec<usize>) = if txn.wrap {
    let base = txn.address & !(span - 1);
    let start = ((txn.address - base) / unit as u64) as usize;
    (base, (0..total_units).map(|j| (start + j) % total_units).collect())
  } else {
    (txn.address, (0..total_units).collect())
  };

  let mut plan = SplitPlan {
    unit,
    units_per_beat,
    base,
    order,
    subs: Vec::new(),
    policy: MergePolicy::Single,
  };

  plan.policy = if units_per_beat > 1 {
    MergePolicy::Narrowed
  } else if txn.beat_count == 1 {
    MergePolicy::Single
  } else if txn.kind.is_block() && !block_mergeable(txn, base) {
    MergePolicy::PerBeat
  } else {
    MergePolicy::Merged
  };

  plan.subs = match plan.policy {
    MergePolicy::Narrowed | MergePolicy::Single | MergePolicy::PerBeat => {
      (0..total_units).map(|pos| single(&plan, pos)).collect()
    },
    MergePolicy::Merged => merge(&plan, txn.wrap, config),
  };
  plan
}

fn block_mergeable(txn: &Transaction, base: u64) -> bool {
  let span = txn.total_bytes();
  MERGEABLE_BLOCK_BEATS.contains(&txn.beat_count) && base % span == 0
}

fn single(plan: &SplitPlan, pos: usize) -> SubPlan {
  let slot = plan.order[pos];
  SubPlan {
    address: plan.slot_address(slot),
    beat_size: plan.unit,
    burst: BurstKind::Incr,
    slots: vec![slot],
    last_position: pos,
  }
}

fn merge(plan: &SplitPlan, wrap: bool, config: &BridgeConfig) -> Vec<SubPlan> {
  let limit = config.merge_limit() as usize;
  let total = plan.order.len();
  let unit = plan.unit as u64;
  let boundary = config.downstream.boundary;

  if wrap && config.downstream.wrap_bursts && total >= 2 && total <= limit && total.is_power_of_two() {
    let span = total as u64 * unit;
    let inside_boundary = boundary.map_or(true, |b| plan.base / b == (plan.base + span - 1) / b);
    if inside_boundary {
      return vec![SubPlan {
        address: plan.slot_address(plan.order[0]),
        beat_size: plan.unit,
        burst: BurstKind::Wrap,
        slots: plan.order.clone(),
        last_position: total - 1,
      }];
    }
  }

  let mut subs: Vec<SubPlan> = Vec::new();
  let mut current: Option<SubPlan> = None;
  for (pos, &slot) in plan.order.iter().enumerate() {
    let address = plan.slot_address(slot);
    if let Some(sub) = current.as_mut() {
      let prev = *sub.slots.last().unwrap_or(&slot);
      let contiguous = slot == prev + 1;
      let crosses = boundary.map_or(false, |b| address % b == 0);
      if contiguous && !crosses && sub.slots.len() < limit {
        sub.slots.push(slot);
        sub.last_position = pos;
        continue;
      }
      subs.extend(current.take());
    }
    current = Some(SubPlan {
      address,
      beat_size: plan.unit,
      burst: BurstKind::Incr,
      slots: vec![slot],
      last_position: pos,
    });
  }
  subs.extend(current);
  subs
}
