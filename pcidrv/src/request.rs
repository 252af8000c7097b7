//! I/O requests handed to the engine by the upper edge.
//!
//! A request is completed exactly once, always outside the path lock that
//! was protecting it.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use crate::queue::Queued;

/// Opaque request identity, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Failure statuses a request can complete with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Cancelled while waiting for a resource.
    Cancelled,
    /// Failed because the device is going away.
    DeviceRemoved,
    /// The hardware reported an error for this request.
    HardwareError,
    /// Payload does not fit a transmit buffer.
    InvalidBufferSize,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::DeviceRemoved => write!(f, "device removed"),
            Self::HardwareError => write!(f, "hardware error"),
            Self::InvalidBufferSize => write!(f, "invalid buffer size"),
        }
    }
}

/// Outbound packet request.
pub trait WriteRequest: Send {
    fn id(&self) -> RequestId;

    /// Frame bytes to transmit.
    fn payload(&self) -> &[u8];

    /// Complete with the number of bytes sent, or a failure status.
    fn complete(self: Box<Self>, result: Result<usize, CompletionStatus>);
}

/// Inbound packet request.
pub trait ReadRequest: Send {
    fn id(&self) -> RequestId;

    /// Complete with a view of the received frame, or a failure status.
    ///
    /// The slice points straight into the receive DMA buffer and is only
    /// valid for the duration of the call.
    fn complete(self: Box<Self>, result: Result<&[u8], CompletionStatus>);
}

impl Queued for Box<dyn WriteRequest> {
    fn request_id(&self) -> RequestId {
        self.id()
    }
}

impl Queued for Box<dyn ReadRequest> {
    fn request_id(&self) -> RequestId {
        self.id()
    }
}

/// Write completions gathered under the send lock, delivered after it drops.
#[derive(Default)]
pub(crate) struct WriteCompletions {
    entries: Vec<(Box<dyn WriteRequest>, Result<usize, CompletionStatus>)>,
}

impl WriteCompletions {
    pub(crate) fn push(&mut self, request: Box<dyn WriteRequest>, result: Result<usize, CompletionStatus>) {
        self.entries.push((request, result));
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Deliver in the order they were recorded.
    pub(crate) fn deliver(self) {
        for (request, result) in self.entries {
            request.complete(result);
        }
    }
}
