//! Upstream response arbitration.
//!
//! Parents get a slot in their response class the first time they issue
//! downstream, so within a class responses leave in issue order no matter
//! which parent the peer finishes first. Between the two classes reads win,
//! except that with the anti-interleave lock on, a read parent's beats are
//! never split by a write response and each finished read parent lets one
//! waiting write response through.

use std::collections::{BTreeMap, VecDeque};

use log::debug;

use super::arena::Handle;
use super::types::{Cycle, Direction, Response, Tag};

#[derive(Clone, Debug)]
struct Slot {
  handle: Handle,
  tag: Tag,
  responses: VecDeque<Response>,
  ready_at: Option<Cycle>,
}

#[derive(Clone, Debug)]
struct InFlight {
  class: Direction,
  seq: u64,
  tag: Tag,
  deadline: Cycle,
  resend_at: Option<Cycle>,
}

/// What one arbiter step produced.
#[derive(Clone, Debug, Default)]
pub struct Delivery {
  pub response: Option<Response>,
  /// Parent whose last response was just accepted upstream.
  pub retired: Vec<Handle>,
  pub resent: bool,
}

#[derive(Clone, Debug)]
pub struct ResponseArbiter {
  anti_interleave: bool,
  window: Cycle,
  reads: BTreeMap<u64, Slot>,
  writes: BTreeMap<u64, Slot>,
  next_seq: u64,
  streaming: Option<u64>,
  write_credit: bool,
  inflight: Option<InFlight>,
  last_delivery: Option<Cycle>,
}

impl ResponseArbiter {
  pub fn new(anti_interleave: bool, window: Cycle) -> Self {
    Self {
      anti_interleave,
      window,
      reads: BTreeMap::new(),
      writes: BTreeMap::new(),
      next_seq: 0,
      streaming: None,
      write_credit: false,
      inflight: None,
      last_delivery: None,
    }
  }

  fn class(&self, class: Direction) -> &BTreeMap<u64, Slot> {
    match class {
      Direction::Read => &self.reads,
      Direction::Write => &self.writes,
    }
  }

  fn class_mut(&mut self, class: Direction) -> &mut BTreeMap<u64, Slot> {
    match class {
      Direction::Read => &mut self.reads,
      Direction::Write => &mut self.writes,
    }
  }

  /// Takes the parent's place in its class.
  pub fn reserve(&mut self, class: Direction, handle: Handle, tag: Tag) -> u64 {
    let seq = self.next_seq;
    self.next_seq += 1;
    self.class_mut(class).insert(
      seq,
      Slot {
        handle,
        tag,
        responses: VecDeque::new(),
        ready_at: None,
      },
    );
    seq
  }

  /// Hands over a completed parent's responses.
  pub fn complete(&mut self, class: Direction, seq: u64, responses: Vec<Response>, ready_at: Cycle) -> bool {
    match self.class_mut(class).get_mut(&seq) {
      Some(slot) => {
        slot.responses = responses.into();
        slot.ready_at = Some(ready_at);
        true
      },
      None => false,
    }
  }

  fn ready_head(&self, class: Direction, now: Cycle) -> Option<(u64, Cycle)> {
    let (seq, slot) = self.class(class).iter().next()?;
    let ready_at = slot.ready_at?;
    (ready_at <= now && !slot.responses.is_empty()).then_some((*seq, ready_at))
  }

  fn pick(&self, now: Cycle) -> Option<(Direction, u64)> {
    let read = self.ready_head(Direction::Read, now);
    let write = self.ready_head(Direction::Write, now);
    if self.anti_interleave {
      if let Some(seq) = self.streaming {
        return read.filter(|(s, _)| *s == seq).map(|(s, _)| (Direction::Read, s));
      }
      if self.write_credit {
        if let Some((seq, _)) = write {
          return Some((Direction::Write, seq));
        }
      }
      return read
        .map(|(s, _)| (Direction::Read, s))
        .or(write.map(|(s, _)| (Direction::Write, s)));
    }
    match (read, write) {
      (Some((r, r_at)), Some((w, w_at))) => {
        if w_at < r_at {
          Some((Direction::Write, w))
        } else {
          Some((Direction::Read, r))
        }
      },
      (Some((r, _)), None) => Some((Direction::Read, r)),
      (None, Some((w, _))) => Some((Direction::Write, w)),
      (None, None) => None,
    }
  }

  fn front(&self, class: Direction, seq: u64) -> Option<Response> {
    self.class(class).get(&seq).and_then(|slot| slot.responses.front().cloned())
  }

  fn finalize(&mut self, delivery: &mut Delivery) {
    let Some(inflight) = self.inflight.take() else {
      return;
    };
    let anti_interleave = self.anti_interleave;
    let slots = self.class_mut(inflight.class);
    let Some(slot) = slots.get_mut(&inflight.seq) else {
      return;
    };
    slot.responses.pop_front();
    if !slot.responses.is_empty() {
      if anti_interleave && inflight.class == Direction::Read {
        self.streaming = Some(inflight.seq);
      }
      return;
    }
    let handle = slot.handle;
    slots.remove(&inflight.seq);
    debug!("responses for {} all accepted", inflight.tag);
    if inflight.class == Direction::Read {
      self.streaming = None;
      self.write_credit = anti_interleave;
    }
    delivery.retired.push(handle);
  }

  fn emit(&mut self, class: Direction, seq: u64, now: Cycle, delivery: &mut Delivery) {
    let Some(response) = self.front(class, seq) else {
      return;
    };
    match class {
      Direction::Read => {
        if self.anti_interleave {
          self.streaming = Some(seq);
        }
        self.write_credit = false;
      },
      Direction::Write => self.write_credit = false,
    }
    self.inflight = Some(InFlight {
      class,
      seq,
      tag: response.tag,
      deadline: now + self.window,
      resend_at: None,
    });
    self.last_delivery = Some(now);
    delivery.response = Some(response);
    if self.window == 0 {
      self.finalize(delivery);
    }
  }

  /// One response-task step at `now`.
  pub fn poll(&mut self, now: Cycle) -> Delivery {
    let mut delivery = Delivery::default();
    if let Some(inflight) = &self.inflight {
      match inflight.resend_at {
        Some(at) if at <= now => {
          let (class, seq) = (inflight.class, inflight.seq);
          self.inflight = None;
          delivery.resent = true;
          self.emit(class, seq, now, &mut delivery);
          return delivery;
        },
        Some(_) => return delivery,
        None if inflight.deadline <= now => self.finalize(&mut delivery),
        None => return delivery,
      }
    }
    if self.last_delivery == Some(now) {
      return delivery;
    }
    if let Some((class, seq)) = self.pick(now) {
      self.emit(class, seq, now, &mut delivery);
    }
    delivery
  }

  /// Explicit accept from upstream. Returns the retired parent, if any.
  pub fn accepted(&mut self, tag: Tag) -> Option<Vec<Handle>> {
    match &self.inflight {
      Some(inflight) if inflight.tag == tag && inflight.resend_at.is_none() => {
        let mut delivery = Delivery::default();
        self.finalize(&mut delivery);
        Some(delivery.retired)
      },
      _ => None,
    }
  }

  /// True while `tag`'s final response is out and not refused.
  pub fn delivering_last(&self, tag: Tag) -> bool {
    match &self.inflight {
      Some(inflight) if inflight.tag == tag && inflight.resend_at.is_none() => self
        .class(inflight.class)
        .get(&inflight.seq)
        .map_or(false, |slot| slot.responses.len() == 1),
      _ => false,
    }
  }

  /// Upstream refused the delivery; it goes out again next cycle. False if
  /// no delivery for `tag` is open.
  pub fn rejected(&mut self, tag: Tag, now: Cycle) -> bool {
    match &mut self.inflight {
      Some(inflight) if inflight.tag == tag => {
        inflight.resend_at = Some(now + 1);
        true
      },
      _ => false,
    }
  }

  pub fn next_wakeup(&self, now: Cycle) -> Option<Cycle> {
    if let Some(inflight) = &self.inflight {
      return Some(inflight.resend_at.unwrap_or(inflight.deadline));
    }
    let earliest = match self.last_delivery {
      Some(at) => at + 1,
      None => 0,
    };
    let read = self.reads.values().next().and_then(|s| s.ready_at);
    let write = self.writes.values().next().and_then(|s| s.ready_at);
    let ready = match (self.anti_interleave, self.streaming) {
      (true, Some(_)) => read,
      _ => [read, write].into_iter().flatten().min(),
    };
    ready.map(|at| at.max(earliest).max(now))
  }

  pub fn is_idle(&self) -> bool {
    self.reads.is_empty() && self.writes.is_empty() && self.inflight.is_none()
  }

  pub fn clear(&mut self) {
    self.reads.clear();
    self.writes.clear();
    self.streaming = None;
    self.write_credit = false;
    self.inflight = None;
  }
}
