//! Reference-counted object pool with generation-checked handles
//!
//! Per-step scratch records (contact data, collision summaries) are
//! allocated here instead of on the heap. A handle may be retained by
//! several logical owners; the last release resets the value and puts
//! the slot back on the free list. Releasing a handle whose slot has
//! already been recycled is reported as an error, never silently
//! accepted.

use crate::error::{ArenaError, Result};

/// Values stored in a [`Pool`] are wiped before reuse
pub trait Recycle: Default {
    fn recycle(&mut self);
}

/// Opaque reference to a pooled value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot<T> {
    value: T,
    generation: u32,
    refs: u32,
}

#[derive(Debug)]
pub struct Pool<T: Recycle> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T: Recycle> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Recycle> Pool<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Take a value from the free list (or create one) with a single reference
    pub fn allocate(&mut self) -> Handle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.refs = 1;
            return Handle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            value: T::default(),
            generation: 0,
            refs: 1,
        });
        Handle {
            index,
            generation: 0,
        }
    }

    /// Add another owner to a live handle
    pub fn retain(&mut self, handle: Handle) -> Result<()> {
        let slot = self.live_slot_mut(handle, "retain")?;
        slot.refs += 1;
        Ok(())
    }

    /// Drop one owner; returns true when the value went back to the pool
    pub fn release(&mut self, handle: Handle) -> Result<bool> {
        let slot = self.live_slot_mut(handle, "release")?;
        slot.refs -= 1;
        if slot.refs > 0 {
            return Ok(false);
        }

        slot.value.recycle();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Ok(true)
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.refs > 0)
            .map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.refs > 0)
            .map(|slot| &mut slot.value)
    }

    /// Number of values waiting on the free list
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Number of values currently handed out
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn live_slot_mut(&mut self, handle: Handle, op: &str) -> Result<&mut Slot<T>> {
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            return Err(ArenaError::PoolMisuse(format!(
                "{op} of handle {} that was never allocated",
                handle.index
            )));
        };
        if slot.generation != handle.generation || slot.refs == 0 {
            return Err(ArenaError::PoolMisuse(format!(
                "{op} of stale handle {} (generation {}, slot is at {})",
                handle.index, handle.generation, slot.generation
            )));
        }
        Ok(slot)
    }
}

impl<T: Default> Recycle for Vec<T> {
    fn recycle(&mut self) {
        self.clear();
    }
}
