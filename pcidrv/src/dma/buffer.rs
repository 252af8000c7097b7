//! Per-slot DMA descriptor with ownership tracking.

use super::ownership::BufferOwnership;
use super::SlotIndex;

/// A single slot of a carved DMA region.
///
/// Tracks the device-visible address and the ownership state; the bytes
/// themselves live in the [`DmaRegion`](super::DmaRegion).
#[derive(Debug, Clone)]
pub struct DmaSlot {
    index: SlotIndex,
    bus_addr: u64,
    capacity: usize,
    ownership: BufferOwnership,
}

impl DmaSlot {
    pub(crate) fn new(index: SlotIndex, bus_addr: u64, capacity: usize) -> Self {
        Self {
            index,
            bus_addr,
            capacity,
            ownership: BufferOwnership::Free,
        }
    }

    pub fn index(&self) -> SlotIndex {
        self.index
    }

    /// Device-visible address of the slot.
    pub fn bus_addr(&self) -> u64 {
        self.bus_addr
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ownership(&self) -> BufferOwnership {
        self.ownership
    }

    /// Free -> DriverOwned. Pool only.
    pub(crate) fn mark_allocated(&mut self) {
        debug_assert!(self.ownership.is_free(), "Slot must be free to allocate");
        self.ownership = BufferOwnership::DriverOwned;
    }

    /// DriverOwned -> DeviceOwned, immediately before handing to hardware.
    pub(crate) fn mark_device_owned(&mut self) {
        assert!(
            self.ownership == BufferOwnership::DriverOwned,
            "BUG: slot {} handed to device from state {:?}",
            self.index,
            self.ownership
        );
        self.ownership = BufferOwnership::DeviceOwned;
    }

    /// DeviceOwned -> DriverOwned, after the device reports completion.
    pub(crate) fn mark_driver_owned(&mut self) {
        assert!(
            self.ownership == BufferOwnership::DeviceOwned,
            "BUG: slot {} reclaimed from state {:?}",
            self.index,
            self.ownership
        );
        self.ownership = BufferOwnership::DriverOwned;
    }

    /// Back to Free. Pool only.
    pub(crate) fn mark_free(&mut self) {
        self.ownership = BufferOwnership::Free;
    }
}
