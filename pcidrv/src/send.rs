//! Transmit engine.
//!
//! Owns the TCB pool, the active-send list (`CurrSendHead`..`CurrSendTail`)
//! and the pending write queue. Everything here runs under `SendLock`; request
//! completions are collected in a [`SendEffects`] and delivered by the device
//! after the lock is dropped.
//!
//! Hardware retires TCBs strictly in submission order, so completion always
//! pops the head of the active list.

use alloc::boxed::Box;

use crate::dma::{DmaRegion, PoolError, SlotIndex, SlotPool};
use crate::error::DriverError;
use crate::hw::{HwError, NicHardware, TcbDescriptor};
use crate::queue::{Queued, RequestQueue};
use crate::request::{CompletionStatus, RequestId, WriteCompletions, WriteRequest};
use crate::stats::{SendCounters, StatsDelta};

/// What happened to a send request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDisposition {
    /// Bound to a TCB and submitted to hardware.
    Accepted(SlotIndex),
    /// No TCB free; parked on the pending write queue.
    Deferred,
    /// Completed immediately with a failure status.
    Rejected(CompletionStatus),
}

/// A TCB bound to the request it carries.
pub(crate) struct ActiveSend {
    tcb: SlotIndex,
    len: usize,
    request: Box<dyn WriteRequest>,
}

impl Queued for ActiveSend {
    fn request_id(&self) -> RequestId {
        self.request.id()
    }
}

/// Side effects to apply once `SendLock` is released.
#[derive(Default)]
pub(crate) struct SendEffects {
    pub completions: WriteCompletions,
    pub delta: StatsDelta,
}

pub(crate) struct SendPath {
    region: Option<DmaRegion>,
    pool: SlotPool,
    active: RequestQueue<ActiveSend>,
    pending: RequestQueue<Box<dyn WriteRequest>>,
    n_busy: usize,
    n_wait: usize,
    n_cancel: usize,
    completed: usize,
    /// Set by teardown; later sends are refused under the lock.
    closed: bool,
}

impl SendPath {
    pub(crate) fn new(region: DmaRegion) -> Self {
        let pool = SlotPool::carve(&region);
        Self {
            region: Some(region),
            pool,
            active: RequestQueue::new("active-write"),
            pending: RequestQueue::new("pending-write"),
            n_busy: 0,
            n_wait: 0,
            n_cancel: 0,
            completed: 0,
            closed: false,
        }
    }

    /// `Enqueue`: bind to a free TCB or park on the pending queue.
    pub(crate) fn send(
        &mut self,
        request: Box<dyn WriteRequest>,
        hw: &dyn NicHardware,
        effects: &mut SendEffects,
    ) -> SendDisposition {
        if self.closed {
            log::debug!("pcidrv: send {} refused, device removed", request.id());
            effects
                .completions
                .push(request, Err(CompletionStatus::DeviceRemoved));
            return SendDisposition::Rejected(CompletionStatus::DeviceRemoved);
        }

        let len = request.payload().len();
        if len == 0 || len > self.tcb_capacity() {
            log::warn!("pcidrv: send {} rejected, {} bytes", request.id(), len);
            effects
                .completions
                .push(request, Err(CompletionStatus::InvalidBufferSize));
            return SendDisposition::Rejected(CompletionStatus::InvalidBufferSize);
        }

        match self.pool.acquire() {
            Ok(tcb) => self.bind(tcb, request, hw, effects),
            Err(PoolError::Exhausted) => {
                log::debug!(
                    "pcidrv: no free TCB, send {} deferred on {}",
                    request.id(),
                    self.pending.name()
                );
                self.pending.push_back(request);
                self.n_wait += 1;
                SendDisposition::Deferred
            }
            Err(e) => defect(e),
        }
    }

    /// `CompleteHead`: retire the oldest TCB, then hand it to the next waiter.
    pub(crate) fn complete_head(
        &mut self,
        status: Result<(), HwError>,
        hw: &dyn NicHardware,
        effects: &mut SendEffects,
    ) -> Option<RequestId> {
        // Spurious interrupts, and completions racing teardown, find the list empty.
        let Some(head) = self.active.pop_front() else {
            log::warn!("pcidrv: send completion with empty active list");
            return None;
        };
        let id = head.request.id();

        self.reclaim(head.tcb);
        self.n_busy -= 1;
        self.completed += 1;

        let result = match status {
            Ok(()) => {
                effects.delta.bytes_transmitted += head.len as u64;
                Ok(head.len)
            }
            Err(e) => {
                log::warn!("pcidrv: send {} failed in hardware: {}", id, e);
                effects.delta.hw_errors += 1;
                Err(CompletionStatus::HardwareError)
            }
        };
        log::debug!("pcidrv: send {} retired from TCB {}", id, head.tcb);
        effects.completions.push(head.request, result);

        self.drain_pending(hw, effects);
        Some(id)
    }

    /// `CancelWaiting`: only requests without a TCB can be cancelled.
    pub(crate) fn cancel_waiting(
        &mut self,
        id: RequestId,
        effects: &mut SendEffects,
    ) -> Result<(), DriverError> {
        if let Some(request) = self.pending.remove(id) {
            assert!(self.n_wait > 0, "BUG: nWaitSend underflow");
            self.n_wait -= 1;
            self.n_cancel += 1;
            log::debug!("pcidrv: send {} cancelled while waiting", id);
            effects.completions.push(request, Err(CompletionStatus::Cancelled));
            return Ok(());
        }
        if self.active.contains(id) {
            return Err(DriverError::InFlight(id));
        }
        Err(DriverError::RequestNotFound(id))
    }

    /// Teardown: cancel waiters and fail everything bound to hardware. Sends
    /// arriving afterwards are refused.
    pub(crate) fn abort_all(&mut self, effects: &mut SendEffects) {
        self.closed = true;
        for request in self.pending.drain() {
            effects.completions.push(request, Err(CompletionStatus::Cancelled));
            self.n_cancel += 1;
        }
        self.n_wait = 0;

        while let Some(entry) = self.active.pop_front() {
            self.reclaim(entry.tcb);
            self.n_busy -= 1;
            self.completed += 1;
            effects
                .completions
                .push(entry.request, Err(CompletionStatus::DeviceRemoved));
        }
    }

    /// Hand the TCB region back for freeing.
    pub(crate) fn release_dma(&mut self) -> Option<DmaRegion> {
        self.region.take()
    }

    pub(crate) fn counters(&self) -> SendCounters {
        SendCounters {
            busy: self.n_busy,
            waiting: self.n_wait,
            cancelled: self.n_cancel,
            completed: self.completed,
            active: self.active.len(),
            free_tcbs: self.pool.available(),
            num_tcb: self.pool.total(),
        }
    }

    fn tcb_capacity(&self) -> usize {
        self.region.as_ref().map_or(0, DmaRegion::slot_size)
    }

    /// Serve waiters with the TCBs that just came free, oldest first.
    fn drain_pending(&mut self, hw: &dyn NicHardware, effects: &mut SendEffects) {
        while self.pool.available() > 0 {
            let Some(request) = self.pending.pop_front() else {
                return;
            };
            self.n_wait -= 1;
            let tcb = match self.pool.acquire() {
                Ok(tcb) => tcb,
                Err(e) => defect(e),
            };
            // A failed submission frees the TCB again and retires the waiter.
            if let SendDisposition::Rejected(_) = self.bind(tcb, request, hw, effects) {
                self.completed += 1;
            }
        }
    }

    fn bind(
        &mut self,
        tcb: SlotIndex,
        request: Box<dyn WriteRequest>,
        hw: &dyn NicHardware,
        effects: &mut SendEffects,
    ) -> SendDisposition {
        let Some(region) = self.region.as_ref() else {
            defect(PoolError::InvalidIndex { index: tcb })
        };
        let payload = request.payload();
        let len = payload.len();

        // SAFETY: the TCB was just acquired, so it is driver-owned and ours alone.
        unsafe { region.slot_bytes_mut(tcb, len).copy_from_slice(payload) };

        let desc = TcbDescriptor {
            index: tcb,
            bus_addr: region.slot_bus_addr(tcb),
            len,
        };
        if let Some(slot) = self.pool.get_mut(tcb) {
            slot.mark_device_owned();
        }

        match hw.submit_tcb(&desc) {
            Ok(()) => {
                log::debug!("pcidrv: send {} on TCB {} ({} bytes)", request.id(), tcb, len);
                self.active.push_back(ActiveSend { tcb, len, request });
                self.n_busy += 1;
                SendDisposition::Accepted(tcb)
            }
            Err(e) => {
                log::warn!("pcidrv: submit of send {} failed: {}", request.id(), e);
                self.reclaim(tcb);
                effects.delta.hw_errors += 1;
                effects
                    .completions
                    .push(request, Err(CompletionStatus::HardwareError));
                SendDisposition::Rejected(CompletionStatus::HardwareError)
            }
        }
    }

    /// DeviceOwned TCB back to the free list.
    fn reclaim(&mut self, tcb: SlotIndex) {
        if let Some(slot) = self.pool.get_mut(tcb) {
            slot.mark_driver_owned();
        }
        if let Err(e) = self.pool.release(tcb) {
            defect(e);
        }
    }
}

/// List/pool inconsistency: a bug in the engine, never a runtime condition.
pub(crate) fn defect(e: PoolError) -> ! {
    log::error!("pcidrv: pool consistency violated: {}", e);
    panic!("pcidrv: pool consistency violated: {}", e);
}
