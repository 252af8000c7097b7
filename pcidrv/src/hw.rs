//! Collaborator contracts toward the hardware side.
//!
//! Register layout and bus access live behind [`NicHardware`]; the engine
//! only hands over buffer descriptors and receives completion calls.

use thiserror::Error;

use crate::dma::SlotIndex;

/// Errors reported by the hardware collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HwError {
    #[error("device not ready")]
    NotReady,
    #[error("hardware queue full")]
    QueueFull,
    #[error("device fault (status {0:#x})")]
    Fault(u32),
}

/// Transmit buffer handed to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcbDescriptor {
    pub index: SlotIndex,
    pub bus_addr: u64,
    /// Frame length in bytes.
    pub len: usize,
}

/// Receive buffer posted to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfdDescriptor {
    pub index: SlotIndex,
    pub bus_addr: u64,
    /// Hardware buffer size (`HwRfdSize`).
    pub size: usize,
}

/// Submission side of the device.
///
/// `submit_tcb` and `post_rfd` are called with the owning path lock held and
/// must not call back into the engine.
pub trait NicHardware: Send + Sync {
    /// Queue a transmit buffer. Completion arrives later, in submission order,
    /// through [`NicDevice::complete_send`](crate::NicDevice::complete_send).
    fn submit_tcb(&self, tcb: &TcbDescriptor) -> Result<(), HwError>;

    /// Give a receive buffer to the device.
    fn post_rfd(&self, rfd: &RfdDescriptor);

    /// Unregister hardware resources at teardown.
    fn release(&self) -> Result<(), HwError> {
        Ok(())
    }
}

/// How the CSR block is reached. Exactly one mode is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// CSRs mapped into memory at `csr`.
    MappedMemory { csr: u64 },
    /// CSRs reached through port I/O at the I/O base.
    PortIo,
}

/// Hardware resources assigned to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwResources {
    pub io_base: u64,
    pub io_range: u32,
    pub mem_phys: u64,
    pub access: AccessMode,
}

impl HwResources {
    /// True when the CSRs are memory mapped (`MappedPorts`).
    pub fn mapped_ports(&self) -> bool {
        matches!(self.access, AccessMode::MappedMemory { .. })
    }

    pub fn csr_address(&self) -> Option<u64> {
        match self.access {
            AccessMode::MappedMemory { csr } => Some(csr),
            AccessMode::PortIo => None,
        }
    }
}

/// PCI identity of the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PciIdentity {
    pub revision_id: u8,
    pub sub_vendor_id: u16,
    pub sub_system_id: u16,
}
