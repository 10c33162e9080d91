mod common;

use busbridge::bridge::ordering::LockState;
use busbridge::bridge::{
  AddressRange, Bridge, BridgeConfig, BridgeError, BurstKind, ExclusiveMode, PeerOp, PeerTag, ResponseStatus, Tag,
  Transaction, TxnKind,
};
use busbridge::model::PeerConfig;
use common::{beats, Harness};

fn config() -> BridgeConfig {
  BridgeConfig::default()
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
  (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

fn exclusive_pair(tag: u32, address: u64, compare: [u8; 4], swap: [u8; 4]) -> Vec<Transaction> {
  let first = Transaction::new(0, tag, TxnKind::ExclusivePair, address, 4, 1).beat(compare.to_vec(), false);
  let second = first.beat(swap.to_vec(), true);
  vec![first, second]
}

#[test]
fn aligned_block_write_is_one_peer_burst() {
  let mut h = Harness::new(config());
  let header = Transaction::new(0, 1, TxnKind::WriteBlock, 0x1000, 4, 16);
  let data: Vec<Vec<u8>> = (0..16u8).map(|i| vec![i; 4]).collect();
  h.push_all(beats(&header, &data));
  h.run(200);

  let subs = h.issued_for(0, Tag(1));
  assert_eq!(subs.len(), 1);
  assert_eq!(subs[0].op, PeerOp::Write);
  assert_eq!(subs[0].address, 0x1000);
  assert_eq!(subs[0].beats, 16);
  assert_eq!(subs[0].beat_size, 4);
  assert_eq!(subs[0].burst, BurstKind::Incr);
  assert_eq!(subs[0].tag, PeerTag::from_parent(Tag(1)));

  let responses = h.responses_for(0, Tag(1));
  assert_eq!(responses.len(), 1);
  assert_eq!(responses[0].kind, TxnKind::WriteBlock);
  assert_eq!(responses[0].status, ResponseStatus::Ok);
  assert_eq!(h.memory.peek(0x1000, 64), data.concat());
}

#[test]
fn wide_read_is_narrowed_and_reassembled() {
  let mut h = Harness::new(config());
  h.memory.poke(0x40, &pattern(16, 0x30));
  h.push(Transaction::read(0, 2, 0x40, 16));
  h.run(100);

  let subs = h.issued_for(0, Tag(2));
  let addresses: Vec<u64> = subs.iter().map(|s| s.address).collect();
  assert_eq!(addresses, vec![0x40, 0x44, 0x48, 0x4c]);
  assert!(subs.iter().all(|s| s.beats == 1 && s.beat_size == 4 && s.op == PeerOp::Read));
  assert!(subs[1..].iter().all(|s| s.tag.is_synthetic()));

  let responses = h.responses_for(0, Tag(2));
  assert_eq!(responses.len(), 1);
  assert_eq!(responses[0].data, pattern(16, 0x30));
  assert_eq!((responses[0].transfer_number, responses[0].transfer_count), (4, 4));

  let last_issue = h.issued.iter().map(|(at, _)| *at).max().unwrap();
  let (delivered_at, _) = h.delivered[0];
  assert!(delivered_at >= last_issue + h.latency);
}

#[test]
fn burst_is_split_at_the_address_boundary() {
  let mut h = Harness::new(config());
  h.memory.poke(0xff8, &pattern(16, 1));
  h.push(Transaction::new(0, 4, TxnKind::Read, 0xff8, 4, 4));
  h.run(100);

  let subs = h.issued_for(0, Tag(4));
  assert_eq!(subs.len(), 2);
  assert_eq!((subs[0].address, subs[0].beats), (0xff8, 2));
  assert_eq!((subs[1].address, subs[1].beats), (0x1000, 2));
  assert!(subs[1].tag.is_synthetic());

  let responses = h.responses_for(0, Tag(4));
  assert_eq!(responses.len(), 4);
  for (i, r) in responses.iter().enumerate() {
    assert_eq!(r.beat_index, i as u32);
    assert_eq!(r.address, 0xff8 + 4 * i as u64);
    assert_eq!(r.data, pattern(16, 1)[i * 4..i * 4 + 4].to_vec());
    assert_eq!((r.transfer_number, r.transfer_count), (i as u32 + 1, 4));
  }
}

#[test]
fn wrapping_block_read_starts_at_the_critical_word() {
  let mut h = Harness::new(config());
  h.memory.poke(0x1020, &pattern(16, 0));
  h.push(Transaction::new(0, 5, TxnKind::ReadBlock, 0x1028, 4, 4).wrapping());
  h.run(100);

  let subs = h.issued_for(0, Tag(5));
  assert_eq!(subs.len(), 1);
  assert_eq!(subs[0].burst, BurstKind::Wrap);
  assert_eq!(subs[0].address, 0x1028);

  let responses = h.responses_for(0, Tag(5));
  let addresses: Vec<u64> = responses.iter().map(|r| r.address).collect();
  assert_eq!(addresses, vec![0x1028, 0x102c, 0x1020, 0x1024]);
  let data: Vec<u8> = responses.iter().flat_map(|r| r.data.clone()).collect();
  assert_eq!(data, [pattern(8, 8), pattern(8, 0)].concat());
}

#[test]
fn exclusive_pair_commit_echoes_compare_data() {
  let mut h = Harness::new(config());
  h.memory.poke(0x2000, &[0xaa; 4]);
  h.push_all(exclusive_pair(6, 0x2000, [0xaa; 4], [0x78, 0x56, 0x34, 0x12]));
  h.run(100);

  let subs = h.issued_for(0, Tag(6));
  assert_eq!(subs.len(), 2);
  assert_eq!((subs[0].op, subs[0].exclusive), (PeerOp::Read, true));
  assert_eq!(subs[0].tag, PeerTag::from_parent(Tag(6)));
  assert_eq!((subs[1].op, subs[1].exclusive), (PeerOp::Write, true));
  assert!(subs[1].tag.is_synthetic());

  let responses = h.responses_for(0, Tag(6));
  assert_eq!(responses.len(), 1);
  assert_eq!(responses[0].status, ResponseStatus::Ok);
  assert_eq!(responses[0].data, vec![0xaa; 4]);
  assert_eq!(h.memory.peek(0x2000, 4), vec![0x78, 0x56, 0x34, 0x12]);
  assert_eq!(h.bridge.port_stats(0).unwrap().rcw_committed, 1);
}

#[test]
fn failed_commit_returns_the_complement() {
  let mut h = Harness::new(config());
  h.memory.poke(0x2000, &[0xaa; 4]);
  h.memory.fail_next_commit();
  h.push_all(exclusive_pair(6, 0x2000, [0xaa; 4], [1, 2, 3, 4]));
  h.run(100);

  let responses = h.responses_for(0, Tag(6));
  assert_eq!(responses.len(), 1);
  assert_eq!(responses[0].data, vec![0x55; 4]);
  assert_eq!(h.memory.peek(0x2000, 4), vec![0xaa; 4]);
  assert_eq!(h.bridge.port_stats(0).unwrap().rcw_failed, 1);
}

#[test]
fn compare_miss_returns_memory_without_writing() {
  let mut h = Harness::new(config());
  h.memory.poke(0x2000, &[0x11; 4]);
  h.push_all(exclusive_pair(6, 0x2000, [0xaa; 4], [1, 2, 3, 4]));
  h.run(100);

  assert_eq!(h.issued_for(0, Tag(6)).len(), 1);
  let responses = h.responses_for(0, Tag(6));
  assert_eq!(responses[0].status, ResponseStatus::Ok);
  assert_eq!(responses[0].data, vec![0x11; 4]);
  assert_eq!(h.memory.peek(0x2000, 4), vec![0x11; 4]);
  assert_eq!(h.bridge.port_stats(0).unwrap().rcw_miss, 1);
}

#[test]
fn peer_without_exclusive_support_gets_an_address_error() {
  let peer = PeerConfig {
    exclusive: false,
    ..PeerConfig::default()
  };
  let mut h = Harness::with_peer(config(), peer);
  h.memory.poke(0x2000, &[0xaa; 4]);
  h.push_all(exclusive_pair(6, 0x2000, [0xaa; 4], [1, 2, 3, 4]));
  h.run(100);

  assert_eq!(h.issued_for(0, Tag(6)).len(), 1);
  let responses = h.responses_for(0, Tag(6));
  assert_eq!(responses.len(), 1);
  assert_eq!(responses[0].status, ResponseStatus::AddressError);
  assert_eq!(h.memory.peek(0x2000, 4), vec![0xaa; 4]);
}

#[test]
fn deny_mode_answers_without_peer_traffic() {
  let mut cfg = config();
  cfg.exclusive_mode = ExclusiveMode::Deny;
  let mut h = Harness::new(cfg);
  h.push_all(exclusive_pair(6, 0x2000, [0xaa; 4], [1, 2, 3, 4]));
  h.run(100);

  assert!(h.issued.is_empty());
  let responses = h.responses_for(0, Tag(6));
  assert_eq!(responses.len(), 1);
  assert_eq!(responses[0].status, ResponseStatus::AddressError);
}

#[test]
fn ignore_mode_uses_plain_accesses() {
  let mut cfg = config();
  cfg.exclusive_mode = ExclusiveMode::Ignore;
  let mut h = Harness::new(cfg);
  h.memory.poke(0x2000, &[0xaa; 4]);
  h.push_all(exclusive_pair(6, 0x2000, [0xaa; 4], [9; 4]));
  h.run(100);

  let subs = h.issued_for(0, Tag(6));
  assert_eq!(subs.len(), 2);
  assert!(subs.iter().all(|s| !s.exclusive));
  assert_eq!(h.responses_for(0, Tag(6))[0].data, vec![0xaa; 4]);
  assert_eq!(h.memory.peek(0x2000, 4), vec![9; 4]);
}

#[test]
fn overlapping_write_between_phases_invalidates_the_pair() {
  let mut h = Harness::new(config());
  h.memory.poke(0x2000, &[0xaa; 4]);
  let pair = exclusive_pair(6, 0x2000, [0xaa; 4], [9; 4]);
  h.push(pair[0].clone());
  h.push(Transaction::write(0, 7, 0x2000, vec![1, 2, 3, 4]));
  h.push(pair[1].clone());
  h.run(100);

  assert!(h.issued_for(0, Tag(6)).is_empty());
  assert_eq!(h.responses_for(0, Tag(6))[0].data, vec![0x55; 4]);
  assert_eq!(h.responses_for(0, Tag(7)).len(), 1);
  assert_eq!(h.memory.peek(0x2000, 4), vec![1, 2, 3, 4]);
  assert_eq!(h.bridge.port_stats(0).unwrap().rcw_failed, 1);
}

#[test]
fn second_first_phase_on_a_live_pair_is_fatal() {
  let mut bridge = Bridge::new(config()).unwrap();
  let pair = exclusive_pair(6, 0x2000, [0xaa; 4], [9; 4]);
  assert!(bridge.submit(pair[0].clone(), 0).unwrap().is_accepted());
  let err = bridge.submit(pair[0].clone(), 1).unwrap_err();
  assert!(matches!(err, BridgeError::ExclusiveReentry { port: 0, .. }));
}

#[test]
fn first_phase_while_another_pair_is_open_is_fatal() {
  let mut bridge = Bridge::new(config()).unwrap();
  let open = exclusive_pair(6, 0x2000, [0xaa; 4], [9; 4]);
  let other = exclusive_pair(7, 0x2000, [0xaa; 4], [8; 4]);
  assert!(bridge.submit(open[0].clone(), 0).unwrap().is_accepted());
  let err = bridge.submit(other[0].clone(), 1).unwrap_err();
  assert!(matches!(err, BridgeError::ExclusiveReentry { port: 0, tag: Tag(7), .. }));
}

#[test]
fn back_to_back_pairs_both_resolve() {
  let mut h = Harness::new(config());
  h.memory.poke(0x2000, &[0xaa; 4]);
  h.memory.poke(0x2010, &[0xbb; 4]);
  h.push_all(exclusive_pair(6, 0x2000, [0xaa; 4], [1; 4]));
  h.push_all(exclusive_pair(7, 0x2010, [0xbb; 4], [2; 4]));
  h.run(100);

  assert_eq!(h.responses_for(0, Tag(6))[0].data, vec![0xaa; 4]);
  assert_eq!(h.responses_for(0, Tag(7))[0].data, vec![0xbb; 4]);
  assert_eq!(h.memory.peek(0x2000, 4), vec![1; 4]);
  assert_eq!(h.memory.peek(0x2010, 4), vec![2; 4]);
}

#[test]
fn tag_can_be_reused_once_its_response_is_out() {
  let mut h = Harness::new(config());
  h.explicit_accepts = false;
  h.memory.poke(0x40, &[1; 4]);
  h.memory.poke(0x80, &[2; 4]);
  let requests = [
    Transaction::read(0, 1, 0x40, 4),
    Transaction::read(0, 1, 0x80, 4),
    Transaction::write(0, 1, 0x40, vec![3; 4]),
  ];
  for (i, txn) in requests.into_iter().enumerate() {
    // each reuse is offered while the previous delivery's window is open
    h.push(txn);
    while h.delivered.len() <= i {
      assert!(h.now < 100);
      h.tick();
    }
  }
  h.run(100);

  let responses = h.responses_for(0, Tag(1));
  assert_eq!(responses.len(), 3);
  assert_eq!(responses[0].data, vec![1; 4]);
  assert_eq!(responses[1].data, vec![2; 4]);
  assert_eq!(responses[2].kind, TxnKind::Write);
  assert_eq!(h.memory.peek(0x40, 4), vec![3; 4]);
  assert_eq!(h.bridge.port_stats(0).unwrap().delivered, 3);
}

#[test]
fn acceptance_windows_close_on_their_own() {
  fn issue_cycles(latency: u64) -> Vec<u64> {
    let mut cfg = config();
    cfg.accept_window = 4;
    let peer = PeerConfig {
      latency,
      ..PeerConfig::default()
    };
    let mut h = Harness::with_peer(cfg, peer);
    h.explicit_accepts = false;
    h.memory.poke(0x40, &pattern(16, 0x10));
    h.push(Transaction::read(0, 1, 0x40, 16));
    h.run(200);
    assert_eq!(h.responses_for(0, Tag(1))[0].data, pattern(16, 0x10));
    assert!(h.bridge.is_idle());
    let cycles: Vec<u64> = h.issued.iter().map(|(at, _)| *at).collect();
    cycles.iter().map(|at| at - cycles[0]).collect()
  }

  // a slow peer: every window runs out before the response comes back
  assert_eq!(issue_cycles(10), vec![0, 4, 8, 12]);
  // a fast peer: the response closes the window early
  assert_eq!(issue_cycles(2), vec![0, 2, 4, 6]);
}

#[test]
fn refusal_in_the_last_window_cycle_is_honoured() {
  let mut cfg = config();
  cfg.accept_window = 3;
  let mut h = Harness::new(cfg);
  h.explicit_accepts = false;
  h.refusal_delay = 2;
  h.refuse_issues = 1;
  h.refuse_deliveries = 1;
  h.memory.poke(0x300, &[4; 4]);
  h.push(Transaction::read(0, 1, 0x300, 4));
  h.run(100);

  assert_eq!(h.issued.len(), 2);
  assert_eq!(h.issued[0].1, h.issued[1].1);
  assert_eq!(h.issued[1].0, h.issued[0].0 + 3);
  assert_eq!(h.delivered.len(), 2);
  assert_eq!(h.delivered[1].0, h.delivered[0].0 + 3);
  assert_eq!(h.delivered[1].1.data, vec![4; 4]);
  let stats = h.bridge.port_stats(0).unwrap();
  assert_eq!((stats.resent, stats.delivery_retries, stats.delivered), (1, 1, 1));
}

#[test]
fn resubmitting_a_refused_request_has_one_effect() {
  let mut cfg = config();
  cfg.read.queue_depth = 1;
  let mut h = Harness::new(cfg);
  h.memory.poke(0x200, &[7; 4]);
  h.push(Transaction::read(0, 1, 0x100, 4));
  h.push(Transaction::read(0, 2, 0x200, 4));
  h.run(100);

  assert!(h.rejections > 0);
  assert_eq!(h.issued_for(0, Tag(2)).len(), 1);
  let responses = h.responses_for(0, Tag(2));
  assert_eq!(responses.len(), 1);
  assert_eq!(responses[0].data, vec![7; 4]);
  let stats = h.bridge.port_stats(0).unwrap();
  assert_eq!(stats.admitted, 2);
  assert_eq!(stats.rejected, h.rejections as u64);
}

#[test]
fn not_accepted_transfer_is_resent_every_cycle() {
  let mut h = Harness::new(config());
  h.refuse_issues = 2;
  h.push(Transaction::read(0, 1, 0x300, 4));
  h.run(100);

  let sends: Vec<_> = h.issued.iter().filter(|(_, s)| s.parent == Tag(1)).collect();
  assert_eq!(sends.len(), 3);
  assert!(sends.iter().all(|(_, s)| *s == sends[0].1));
  assert_eq!(sends[1].0, sends[0].0 + 1);
  assert_eq!(sends[2].0, sends[0].0 + 2);
  let stats = h.bridge.port_stats(0).unwrap();
  assert_eq!((stats.issued, stats.resent), (1, 2));
  assert_eq!(h.responses_for(0, Tag(1)).len(), 1);
}

#[test]
fn refused_delivery_is_retried_next_cycle() {
  let mut h = Harness::new(config());
  h.refuse_deliveries = 1;
  h.push(Transaction::read(0, 1, 0x300, 4));
  h.run(100);

  assert_eq!(h.delivered.len(), 2);
  assert_eq!(h.delivered[0].1, h.delivered[1].1);
  assert_eq!(h.delivered[1].0, h.delivered[0].0 + 1);
  let stats = h.bridge.port_stats(0).unwrap();
  assert_eq!((stats.delivered, stats.delivery_retries), (1, 1));
  assert!(h.bridge.is_idle());
}

#[test]
fn protocol_violations_become_error_completions() {
  let mut cfg = config();
  cfg.secure_ranges.push(AddressRange::new(0x8000, 0x9000));
  let mut h = Harness::new(cfg);
  h.push(Transaction::read(0, 1, 0x8000, 4).non_secure());
  h.push(Transaction::read(0, 2, 0x8000, 4));
  h.push(Transaction::read(0, 3, 0x102, 4));
  h.push(Transaction::new(0, 4, TxnKind::ReadBlock, 0x100, 4, 3));
  h.run(100);

  let status = |tag| h.responses_for(0, Tag(tag))[0].status;
  assert_eq!(status(1), ResponseStatus::DataError);
  assert_eq!(status(2), ResponseStatus::Ok);
  assert_eq!(status(3), ResponseStatus::AddressError);
  assert_eq!(status(4), ResponseStatus::AddressError);
  for tag in [1, 3, 4] {
    assert!(h.issued_for(0, Tag(tag)).is_empty());
    let responses = h.responses_for(0, Tag(tag));
    assert_eq!(responses.len(), 1);
    assert_eq!((responses[0].transfer_number, responses[0].transfer_count), (0, 0));
  }
  let stats = h.bridge.port_stats(0).unwrap();
  assert_eq!((stats.secure_faults, stats.violations), (1, 2));
}

#[test]
fn bad_continuation_beat_fails_the_whole_write() {
  let mut h = Harness::new(config());
  let header = Transaction::new(0, 1, TxnKind::Write, 0x500, 4, 2);
  h.push(header.beat(vec![1; 4], false));
  h.push(header.beat(vec![2; 2], true));
  h.run(100);

  assert!(h.issued.is_empty());
  let responses = h.responses_for(0, Tag(1));
  assert_eq!(responses.len(), 1);
  assert_eq!(responses[0].status, ResponseStatus::AddressError);
  assert_eq!(h.memory.peek(0x500, 4), vec![0; 4]);
}

#[test]
fn overlapping_read_waits_for_the_whole_write() {
  let mut h = Harness::new(config());
  h.push(Transaction::write(0, 1, 0x100, pattern(16, 0)));
  h.push(Transaction::read(0, 2, 0x100, 4));
  h.push(Transaction::read(0, 3, 0x900, 4));

  h.tick();
  assert_eq!(h.bridge.lock_state(0).unwrap(), LockState::WriteLocked(Tag(1)));
  h.run(100);
  assert_eq!(h.bridge.lock_state(0).unwrap(), LockState::ReadEligible);

  let position = |tag: u32| -> Vec<usize> {
    h.issued
      .iter()
      .enumerate()
      .filter(|(_, (_, s))| s.parent == Tag(tag))
      .map(|(i, _)| i)
      .collect()
  };
  let write = position(1);
  assert_eq!(write.len(), 4);
  assert!(write.windows(2).all(|w| w[1] == w[0] + 1));
  assert!(position(2)[0] > write[3]);
  assert!(position(3)[0] > write[3]);
  assert_eq!(h.responses_for(0, Tag(2))[0].data, pattern(4, 0));
}

#[test]
fn anti_interleave_lets_one_write_through_after_a_read() {
  fn run(anti_interleave: bool) -> Vec<u32> {
    let mut cfg = config();
    cfg.anti_interleave_lock = anti_interleave;
    let mut h = Harness::new(cfg);
    h.push(Transaction::new(0, 1, TxnKind::Read, 0x100, 4, 4));
    h.push(Transaction::read(0, 2, 0x200, 4));
    h.push(Transaction::write(0, 3, 0x800, vec![5; 4]));
    h.run(100);
    h.delivery_order(0)
  }

  assert_eq!(run(true), vec![1, 1, 1, 1, 3, 2]);
  assert_eq!(run(false), vec![1, 1, 1, 1, 2, 3]);
}

#[test]
fn outstanding_id_budget_is_respected() {
  let mut cfg = config();
  cfg.max_outstanding_ids = 2;
  let mut h = Harness::new(cfg);
  for tag in 1..=4 {
    h.push(Transaction::read(0, tag, 0x40 * tag as u64, 16));
  }
  while !h.is_settled() {
    assert!(h.now < 500);
    h.tick();
    assert!(h.bridge.outstanding(0).unwrap() <= 2);
  }
  assert_eq!(h.issued.len(), 16);
}

#[test]
fn reset_drains_every_port() {
  let mut cfg = config();
  cfg.ports = 2;
  let mut h = Harness::new(cfg);
  h.push(Transaction::read(0, 1, 0x40, 16));
  h.push(Transaction::read(1, 1, 0x80, 16));
  h.tick();
  h.tick();
  assert!(!h.bridge.is_idle());

  h.reset();
  assert!(h.bridge.is_idle());
  for port in 0..2 {
    assert_eq!(h.bridge.outstanding(port).unwrap(), 0);
    assert_eq!(h.bridge.live_parents(port).unwrap(), 0);
    assert_eq!(h.bridge.port_stats(port).unwrap().resets, 1);
  }
  assert_eq!(h.bridge.next_wakeup(h.now), None);

  h.push(Transaction::read(0, 1, 0x40, 16));
  h.run(100);
  assert_eq!(h.responses_for(0, Tag(1)).len(), 1);
}

/// Mixed traffic on two ports, checked against a shadow copy of memory
/// updated in program order. The harness itself asserts that no peer tag is
/// live twice.
#[test]
fn random_traffic_reads_back_what_was_written() {
  let mut cfg = config();
  cfg.ports = 2;
  let mut h = Harness::new(cfg);
  let mut shadow = vec![vec![0u8; 0x400]; 2];
  let mut expected: Vec<(usize, u32, Vec<u8>)> = Vec::new();
  let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
  let mut next = |bound: u64| {
    seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (seed >> 33) % bound
  };

  for i in 0..80u32 {
    let port = (i % 2) as usize;
    // each port works in its own half of the address space
    let region = port as u64 * 0x400;
    let tag = i + 1;
    match next(5) {
      0 => {
        let size = 4u64 << next(3);
        let offset = next(0x400 / size) * size;
        let data: Vec<u8> = (0..size).map(|_| next(256) as u8).collect();
        shadow[port][offset as usize..(offset + size) as usize].copy_from_slice(&data);
        h.push(Transaction::write(port, tag, region + offset, data));
      },
      1 => {
        let count = 2 + next(3) as u32;
        let offset = next(0x400 / 4 - count as u64) * 4;
        let header = Transaction::new(port, tag, TxnKind::Write, region + offset, 4, count);
        let data: Vec<Vec<u8>> = (0..count).map(|_| (0..4).map(|_| next(256) as u8).collect()).collect();
        shadow[port][offset as usize..offset as usize + 4 * count as usize].copy_from_slice(&data.concat());
        h.push_all(beats(&header, &data));
      },
      2 => {
        let size = 4u64 << next(3);
        let offset = next(0x400 / size) * size;
        expected.push((port, tag, shadow[port][offset as usize..(offset + size) as usize].to_vec()));
        h.push(Transaction::read(port, tag, region + offset, size as u32));
      },
      3 => {
        let offset = next(0x400 / 16) * 16;
        expected.push((port, tag, shadow[port][offset as usize..offset as usize + 16].to_vec()));
        h.push(Transaction::new(port, tag, TxnKind::ReadBlock, region + offset, 4, 4));
      },
      _ => {
        let count = 1 + next(8) as u32;
        let offset = next(0x400 / 4 - count as u64) * 4;
        expected.push((port, tag, shadow[port][offset as usize..offset as usize + 4 * count as usize].to_vec()));
        h.push(Transaction::new(port, tag, TxnKind::Read, region + offset, 4, count));
      },
    }
  }
  h.run(5_000);

  for (port, tag, data) in expected {
    let responses = h.responses_for(port, Tag(tag));
    assert!(responses.iter().all(|r| r.status == ResponseStatus::Ok));
    assert_eq!(responses.len() as u32, responses[0].beat_count);
    let read: Vec<u8> = responses.iter().flat_map(|r| r.data.clone()).collect();
    assert_eq!(read, data, "port {} tag {}", port, tag);
  }
  for port in 0..2 {
    assert_eq!(h.memory.peek(port as u64 * 0x400, 0x400), shadow[port]);
  }
}
