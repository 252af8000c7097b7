//! DMA buffer management.
//!
//! One common buffer per data path, carved into fixed-size slots that carry
//! an ownership state. TCBs and RFDs are indices into these slot arenas.

pub mod buffer;
pub mod ownership;
pub mod pool;
pub mod region;

pub use buffer::DmaSlot;
pub use ownership::BufferOwnership;
pub use pool::{PoolError, SlotPool};
pub use region::DmaRegion;

/// Index of a slot inside a pool (TCB or RFD number).
pub type SlotIndex = u16;
