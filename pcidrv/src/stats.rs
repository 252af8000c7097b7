//! Device-wide counters and per-path snapshots.

/// Scalars protected by the general device lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStats {
    pub hw_err_count: u32,
    pub bytes_received: u64,
    pub bytes_transmitted: u64,
    /// Buffered frames dropped because no receive buffer was left.
    pub rx_overruns: u32,
}

/// Deltas computed under a path lock and applied under the general lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct StatsDelta {
    pub hw_errors: u32,
    pub bytes_received: u64,
    pub bytes_transmitted: u64,
    pub rx_overruns: u32,
}

impl StatsDelta {
    pub(crate) fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl DeviceStats {
    pub(crate) fn apply(&mut self, delta: &StatsDelta) {
        self.hw_err_count = self.hw_err_count.wrapping_add(delta.hw_errors);
        self.bytes_received = self.bytes_received.wrapping_add(delta.bytes_received);
        self.bytes_transmitted = self.bytes_transmitted.wrapping_add(delta.bytes_transmitted);
        self.rx_overruns = self.rx_overruns.wrapping_add(delta.rx_overruns);
    }
}

/// Send path counters (`SendLock`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendCounters {
    /// `nBusySend`: TCBs in the hardware's hands.
    pub busy: usize,
    /// `nWaitSend`: requests waiting for a TCB.
    pub waiting: usize,
    /// `nCancelSend`: requests cancelled while waiting.
    pub cancelled: usize,
    /// Requests that reached a final status after being accepted or queued.
    pub completed: usize,
    /// Length of the active-send list.
    pub active: usize,
    pub free_tcbs: usize,
    pub num_tcb: usize,
}

/// Receive path counters (`RcvLock`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecvCounters {
    /// `nReadyRecv`: RFDs posted and able to take a frame.
    pub ready: usize,
    /// `CurrNumRfd`.
    pub current: usize,
    /// `NumRfd`.
    pub target: usize,
    /// `MaxNumRfd`.
    pub max: usize,
    /// Frames holding an RFD while waiting for a read.
    pub buffered: usize,
    pub pending_reads: usize,
    /// `AllocNewRfd`.
    pub alloc_new_rfd: bool,
}

impl RecvCounters {
    /// `nReadyRecv <= CurrNumRfd <= MaxNumRfd`.
    pub fn holds_invariant(&self) -> bool {
        self.ready <= self.current && self.current <= self.max
    }
}
