//! Fixed-capacity slot pool with a free list.
//!
//! Pool exhaustion is an ordinary outcome (callers queue); releasing a slot
//! that is already free is a caller defect and is reported as such.

use alloc::vec::Vec;

use thiserror::Error;

use super::buffer::DmaSlot;
use super::region::DmaRegion;
use super::SlotIndex;

/// Slot pool errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// No free slot left.
    #[error("slot pool exhausted")]
    Exhausted,
    /// Slot released while already on the free list.
    #[error("slot {index} released twice")]
    DoubleRelease { index: SlotIndex },
    /// Slot released while the device still owns it.
    #[error("slot {index} released while device-owned")]
    DeviceOwned { index: SlotIndex },
    /// Index outside the pool.
    #[error("slot index {index} out of range")]
    InvalidIndex { index: SlotIndex },
}

/// Free-list allocator over the slots of one [`DmaRegion`].
pub struct SlotPool {
    slots: Vec<DmaSlot>,
    /// Indices of free slots, most recently released last.
    free_list: Vec<SlotIndex>,
}

impl SlotPool {
    /// Build the pool for every slot of `region`.
    pub fn carve(region: &DmaRegion) -> Self {
        let count = region.slot_count();
        let mut slots = Vec::with_capacity(count);
        let mut free_list = Vec::with_capacity(count);
        for i in 0..count as SlotIndex {
            slots.push(DmaSlot::new(i, region.slot_bus_addr(i), region.slot_size()));
        }
        // LIFO free list: push in reverse so slot 0 is acquired first.
        for i in (0..count as SlotIndex).rev() {
            free_list.push(i);
        }
        Self { slots, free_list }
    }

    /// Take the next free slot (now `DriverOwned`).
    pub fn acquire(&mut self) -> Result<SlotIndex, PoolError> {
        let index = self.free_list.pop().ok_or(PoolError::Exhausted)?;
        self.slots[index as usize].mark_allocated();
        Ok(index)
    }

    /// Return a driver-owned slot to the free list.
    pub fn release(&mut self, index: SlotIndex) -> Result<(), PoolError> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(PoolError::InvalidIndex { index })?;
        let ownership = slot.ownership();
        if ownership.is_free() {
            return Err(PoolError::DoubleRelease { index });
        }
        if ownership.is_device_owned() {
            return Err(PoolError::DeviceOwned { index });
        }
        slot.mark_free();
        self.free_list.push(index);
        Ok(())
    }

    pub fn get(&self, index: SlotIndex) -> Option<&DmaSlot> {
        self.slots.get(index as usize)
    }

    pub(crate) fn get_mut(&mut self, index: SlotIndex) -> Option<&mut DmaSlot> {
        self.slots.get_mut(index as usize)
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        self.free_list.len()
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.total() - self.available()
    }

    pub fn is_empty(&self) -> bool {
        self.free_list.is_empty()
    }
}
