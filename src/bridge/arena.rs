//! Slot arena addressed by generation-checked handles.
//!
//! Parent contexts live here. A handle outliving its value (the parent was
//! retired and the slot reused) fails the generation check instead of
//! silently reaching the new occupant.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
  index: u32,
  generation: u32,
}

impl fmt::Display for Handle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}v{}", self.index, self.generation)
  }
}

#[derive(Clone, Debug)]
struct Slot<T> {
  generation: u32,
  value: Option<T>,
}

#[derive(Clone, Debug)]
pub struct Arena<T> {
  slots: Vec<Slot<T>>,
  free: Vec<u32>,
  len: usize,
}

impl<T> Default for Arena<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Arena<T> {
  pub fn new() -> Self {
    Self {
      slots: Vec::new(),
      free: Vec::new(),
      len: 0,
    }
  }

  pub fn insert(&mut self, value: T) -> Handle {
    self.len += 1;
    if let Some(index) = self.free.pop() {
      let slot = &mut self.slots[index as usize];
      slot.value = Some(value);
      return Handle {
        index,
        generation: slot.generation,
      };
    }
    let index = self.slots.len() as u32;
    self.slots.push(Slot {
      generation: 0,
      value: Some(value),
    });
    Handle { index, generation: 0 }
  }

  pub fn get(&self, handle: Handle) -> Option<&T> {
    self
      .slots
      .get(handle.index as usize)
      .filter(|slot| slot.generation == handle.generation)
      .and_then(|slot| slot.value.as_ref())
  }

  pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
    self
      .slots
      .get_mut(handle.index as usize)
      .filter(|slot| slot.generation == handle.generation)
      .and_then(|slot| slot.value.as_mut())
  }

  pub fn remove(&mut self, handle: Handle) -> Option<T> {
    let slot = self.slots.get_mut(handle.index as usize)?;
    if slot.generation != handle.generation {
      return None;
    }
    let value = slot.value.take()?;
    slot.generation = slot.generation.wrapping_add(1);
    self.free.push(handle.index);
    self.len -= 1;
    Some(value)
  }

  /// Drops every value. Outstanding handles all go stale.
  pub fn clear(&mut self) {
    for (index, slot) in self.slots.iter_mut().enumerate() {
      if slot.value.take().is_some() {
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index as u32);
      }
    }
    self.len = 0;
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
    self.slots.iter().enumerate().filter_map(|(index, slot)| {
      slot.value.as_ref().map(|value| {
        (
          Handle {
            index: index as u32,
            generation: slot.generation,
          },
          value,
        )
      })
    })
  }
}
