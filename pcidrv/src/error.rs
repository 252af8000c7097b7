//! Driver error types.

use alloc::vec::Vec;

use dma_pool::DmaError;
use thiserror::Error;

use crate::dma::SlotIndex;
use crate::hw::HwError;
use crate::request::RequestId;

/// Result type for engine operations.
pub type Result<T> = core::result::Result<T, DriverError>;

/// Errors returned by device operations.
///
/// Pool exhaustion never shows up here: it is resolved by queuing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// DMA common-buffer allocation failed at device start.
    #[error("DMA allocation failed: {0}")]
    Dma(#[from] DmaError),
    /// The device is being (or has been) torn down.
    #[error("device removed")]
    DeviceRemoved,
    /// The request already owns a TCB and is in the hardware's hands.
    #[error("request {0} is in flight and cannot be cancelled")]
    InFlight(RequestId),
    /// No queued request with this id.
    #[error("request {0} not found")]
    RequestNotFound(RequestId),
    /// The hardware reported a frame on an RFD that is not posted.
    #[error("RFD {0} is not posted to hardware")]
    RfdNotPosted(SlotIndex),
    /// Teardown ran to the end but some steps failed.
    #[error("resource teardown finished with {} failure(s)", .0.len())]
    Teardown(Vec<TeardownFailure>),
}

/// A single failed teardown step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TeardownFailure {
    /// The hardware collaborator refused to release.
    #[error("hardware release failed: {0}")]
    HardwareRelease(HwError),
    /// A DMA region was still referenced and could not be freed.
    #[error("{0} DMA region still referenced")]
    RegionInUse(&'static str),
}
