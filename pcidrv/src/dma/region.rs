//! A common buffer carved into equally sized slots.
//!
//! ```text
//! bus_addr                                              bus_addr + len
//! ├── slot 0 ──┼── slot 1 ──┼── ... ──┼── slot N-1 ──┤
//!   slot_size    slot_size               slot_size
//! ```

use dma_pool::CommonBuffer;

use super::SlotIndex;

/// Slots are cache-line aligned inside the region.
pub const SLOT_ALIGN: usize = 64;

/// A DMA region partitioned into `slot_count` slots of `slot_size` bytes.
#[derive(Debug)]
pub struct DmaRegion {
    buffer: CommonBuffer,
    slot_size: usize,
    slot_count: usize,
}

impl DmaRegion {
    /// Stride needed for slots holding `payload` bytes.
    pub const fn stride_for(payload: usize) -> usize {
        dma_pool::align_up(payload, SLOT_ALIGN)
    }

    /// Carve `buffer` into as many `slot_size` slots as fit (at most `max_slots`).
    pub fn carve(buffer: CommonBuffer, slot_size: usize, max_slots: usize) -> Self {
        assert!(slot_size > 0, "Slot size must be positive");
        let stride = Self::stride_for(slot_size);
        let slot_count = (buffer.len() / stride).min(max_slots).min(SlotIndex::MAX as usize);
        Self {
            buffer,
            slot_size,
            slot_count,
        }
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn offset(&self, index: SlotIndex) -> usize {
        let idx = index as usize;
        assert!(idx < self.slot_count, "Invalid slot index {}", idx);
        idx * Self::stride_for(self.slot_size)
    }

    /// Device-visible address of a slot.
    pub fn slot_bus_addr(&self, index: SlotIndex) -> u64 {
        self.buffer.bus_addr() + self.offset(index) as u64
    }

    /// First `len` bytes of a slot.
    ///
    /// # Safety
    /// The caller must hold the slot in `DriverOwned` state and no mutable
    /// view of the same slot may exist.
    pub unsafe fn slot_bytes(&self, index: SlotIndex, len: usize) -> &[u8] {
        assert!(len <= self.slot_size, "Length exceeds slot capacity");
        core::slice::from_raw_parts(self.buffer.cpu_ptr().add(self.offset(index)), len)
    }

    /// First `len` bytes of a slot, writable.
    ///
    /// # Safety
    /// The caller must hold the slot in `DriverOwned` state exclusively.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slot_bytes_mut(&self, index: SlotIndex, len: usize) -> &mut [u8] {
        assert!(len <= self.slot_size, "Length exceeds slot capacity");
        core::slice::from_raw_parts_mut(self.buffer.cpu_ptr().add(self.offset(index)), len)
    }

    /// Give the underlying common buffer back for freeing.
    pub fn into_buffer(self) -> CommonBuffer {
        self.buffer
    }
}
