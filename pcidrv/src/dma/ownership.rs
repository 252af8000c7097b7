//! Buffer ownership state machine.
//!
//! ```text
//!     FREE ──acquire()──> DRIVER_OWNED ──post/submit──> DEVICE_OWNED
//!       ▲                     │    ▲                         │
//!       └────release()────────┘    └──────completion─────────┘
//! ```
//!
//! INVARIANT: the CPU touches slot memory only while DRIVER_OWNED.

/// Who may touch a slot's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOwnership {
    /// In the pool's free list.
    Free,
    /// Held by the driver (being filled, being read, or buffered).
    DriverOwned,
    /// Handed to the device; the CPU must not touch it.
    DeviceOwned,
}

impl BufferOwnership {
    pub fn is_free(&self) -> bool {
        matches!(self, Self::Free)
    }

    /// Only driver-owned memory may be read or written by the CPU.
    pub fn can_access(&self) -> bool {
        matches!(self, Self::DriverOwned)
    }

    pub fn is_device_owned(&self) -> bool {
        matches!(self, Self::DeviceOwned)
    }
}

impl Default for BufferOwnership {
    fn default() -> Self {
        Self::Free
    }
}
