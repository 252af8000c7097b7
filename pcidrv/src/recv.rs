//! Receive engine.
//!
//! Owns the RFD pool, the ready list (RFDs posted to hardware, `RecvList`),
//! frames waiting for a reader, and the pending read queue. Runs under
//! `RcvLock`.
//!
//! ```text
//!   pool ──post_ready/replenish──> ready ──frame arrival──> buffered ──read──┐
//!    ▲                               ▲                  └──pending read──┐   │
//!    │                               │                                   ▼   ▼
//!    └──────shrink (CurrNumRfd > NumRfd)────────── recycle <──────── hand-off
//! ```
//!
//! A hand-off lends the DMA bytes to the reader without copying; the RFD is
//! driver-owned for the duration and is recycled once the reader returns.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::config::DeviceConfig;
use crate::dma::{DmaRegion, PoolError, SlotIndex, SlotPool};
use crate::error::DriverError;
use crate::hw::{NicHardware, RfdDescriptor};
use crate::queue::RequestQueue;
use crate::request::{CompletionStatus, ReadRequest, RequestId};
use crate::send::defect;
use crate::stats::{RecvCounters, StatsDelta};

/// A received frame still occupying its RFD.
#[derive(Debug, Clone, Copy)]
struct Frame {
    rfd: SlotIndex,
    len: usize,
}

/// A frame lent to a reader outside the lock.
pub(crate) struct Handoff {
    pub request: Box<dyn ReadRequest>,
    pub region: Arc<DmaRegion>,
    pub rfd: SlotIndex,
    pub len: usize,
}

/// Side effects to apply once `RcvLock` is released.
#[derive(Default)]
pub(crate) struct RecvEffects {
    pub handoffs: Vec<Handoff>,
    pub failed: Vec<(Box<dyn ReadRequest>, CompletionStatus)>,
    pub delta: StatsDelta,
}

pub(crate) struct RecvPath {
    region: Option<Arc<DmaRegion>>,
    pool: SlotPool,
    ready: VecDeque<SlotIndex>,
    buffered: VecDeque<Frame>,
    pending_reads: RequestQueue<Box<dyn ReadRequest>>,
    curr_num_rfd: usize,
    num_rfd: usize,
    max_num_rfd: usize,
    low_water: usize,
    alloc_new_rfd: bool,
    /// Set by teardown; RFDs coming back are retired, reads are refused.
    closed: bool,
}

impl RecvPath {
    pub(crate) fn new(region: DmaRegion, config: &DeviceConfig) -> Self {
        let pool = SlotPool::carve(&region);
        let max_num_rfd = config.max_num_rfd.min(pool.total());
        Self {
            region: Some(Arc::new(region)),
            pool,
            ready: VecDeque::with_capacity(max_num_rfd),
            buffered: VecDeque::new(),
            pending_reads: RequestQueue::new("pending-read"),
            curr_num_rfd: 0,
            num_rfd: config.num_rfd.min(max_num_rfd),
            max_num_rfd,
            low_water: config.rfd_low_water,
            alloc_new_rfd: false,
            closed: false,
        }
    }

    /// `PostReady`: bring the posted set up to `NumRfd`.
    pub(crate) fn post_ready(&mut self, hw: &dyn NicHardware) -> usize {
        let mut posted = 0;
        while self.curr_num_rfd < self.num_rfd {
            if !self.grow(hw) {
                break;
            }
            posted += 1;
        }
        self.check_invariant();
        posted
    }

    /// `OnFrameArrival`: the device filled `rfd` with `len` bytes.
    pub(crate) fn on_frame_arrival(
        &mut self,
        rfd: SlotIndex,
        len: usize,
        hw: &dyn NicHardware,
        effects: &mut RecvEffects,
    ) -> Result<(), DriverError> {
        self.take_from_ready(rfd)?;
        if self.closed {
            self.retire(rfd);
            return Ok(());
        }

        let capacity = self.pool.get(rfd).map_or(0, |slot| slot.capacity());
        if len == 0 || len > capacity {
            log::warn!("pcidrv: RFD {} reported bad length {}", rfd, len);
            effects.delta.hw_errors += 1;
            self.post(rfd, hw);
            self.check_invariant();
            return Ok(());
        }

        effects.delta.bytes_received += len as u64;
        let frame = Frame { rfd, len };

        match self.pending_reads.pop_front() {
            Some(request) => self.lend(request, frame, effects),
            None => {
                self.buffered.push_back(frame);
                self.drop_oldest_if_starved(hw, effects);
            }
        }

        if self.ready.len() < self.low_water && self.curr_num_rfd < self.max_num_rfd {
            self.alloc_new_rfd = true;
        }
        self.check_invariant();
        Ok(())
    }

    /// Hardware reported a receive error on `rfd`; give it straight back.
    pub(crate) fn on_receive_error(
        &mut self,
        rfd: SlotIndex,
        hw: &dyn NicHardware,
        effects: &mut RecvEffects,
    ) -> Result<(), DriverError> {
        self.take_from_ready(rfd)?;
        effects.delta.hw_errors += 1;
        if self.closed {
            self.retire(rfd);
        } else {
            self.post(rfd, hw);
        }
        self.check_invariant();
        Ok(())
    }

    /// Serve a read from the oldest buffered frame, or queue it.
    pub(crate) fn read(&mut self, request: Box<dyn ReadRequest>, effects: &mut RecvEffects) -> bool {
        if self.closed {
            effects.failed.push((request, CompletionStatus::DeviceRemoved));
            return false;
        }
        match self.buffered.pop_front() {
            Some(frame) => {
                self.lend(request, frame, effects);
                true
            }
            None => {
                log::debug!(
                    "pcidrv: read {} parked on {}",
                    request.id(),
                    self.pending_reads.name()
                );
                self.pending_reads.push_back(request);
                false
            }
        }
    }

    pub(crate) fn cancel_read(
        &mut self,
        id: RequestId,
        effects: &mut RecvEffects,
    ) -> Result<(), DriverError> {
        let request = self
            .pending_reads
            .remove(id)
            .ok_or(DriverError::RequestNotFound(id))?;
        effects.failed.push((request, CompletionStatus::Cancelled));
        Ok(())
    }

    /// `Replenish`: top up the posted set when `AllocNewRfd` is raised.
    pub(crate) fn replenish(&mut self, hw: &dyn NicHardware) -> usize {
        if !self.alloc_new_rfd {
            return 0;
        }
        let mut added = 0;
        while self.curr_num_rfd < self.max_num_rfd && self.ready.len() < self.num_rfd {
            if !self.grow(hw) {
                break;
            }
            added += 1;
        }
        self.alloc_new_rfd = false;
        log::debug!("pcidrv: replenished {} RFDs, now {}", added, self.curr_num_rfd);
        self.check_invariant();
        added
    }

    /// Return an RFD whose frame was consumed by a reader.
    pub(crate) fn recycle(&mut self, rfd: SlotIndex, hw: &dyn NicHardware) {
        if self.closed {
            self.retire(rfd);
        } else if self.curr_num_rfd > self.num_rfd && !self.alloc_new_rfd {
            self.retire(rfd);
            log::debug!("pcidrv: shrank RFD pool to {}", self.curr_num_rfd);
        } else {
            self.post(rfd, hw);
        }
        self.check_invariant();
    }

    /// Teardown: cancel readers and discard buffered frames. Reads and RFDs
    /// arriving afterwards are refused or retired.
    pub(crate) fn abort_all(&mut self, effects: &mut RecvEffects) {
        self.closed = true;
        for request in self.pending_reads.drain() {
            effects.failed.push((request, CompletionStatus::Cancelled));
        }
        while let Some(frame) = self.buffered.pop_front() {
            self.retire(frame.rfd);
        }
        self.alloc_new_rfd = false;
    }

    pub(crate) fn release_dma(&mut self) -> Option<Arc<DmaRegion>> {
        self.region.take()
    }

    pub(crate) fn counters(&self) -> RecvCounters {
        RecvCounters {
            ready: self.ready.len(),
            current: self.curr_num_rfd,
            target: self.num_rfd,
            max: self.max_num_rfd,
            buffered: self.buffered.len(),
            pending_reads: self.pending_reads.len(),
            alloc_new_rfd: self.alloc_new_rfd,
        }
    }

    /// Posted RFDs in posting order (the order hardware fills them).
    pub(crate) fn ready_rfds(&self) -> Vec<SlotIndex> {
        self.ready.iter().copied().collect()
    }

    fn take_from_ready(&mut self, rfd: SlotIndex) -> Result<(), DriverError> {
        let pos = self
            .ready
            .iter()
            .position(|r| *r == rfd)
            .ok_or(DriverError::RfdNotPosted(rfd))?;
        self.ready.remove(pos);
        if let Some(slot) = self.pool.get_mut(rfd) {
            slot.mark_driver_owned();
        }
        Ok(())
    }

    /// Acquire one fresh RFD and post it.
    fn grow(&mut self, hw: &dyn NicHardware) -> bool {
        if self.closed || self.region.is_none() {
            return false;
        }
        match self.pool.acquire() {
            Ok(rfd) => {
                self.curr_num_rfd += 1;
                self.post(rfd, hw);
                true
            }
            Err(PoolError::Exhausted) => false,
            Err(e) => defect(e),
        }
    }

    /// Driver-owned RFD back to the pool for good.
    fn retire(&mut self, rfd: SlotIndex) {
        if let Err(e) = self.pool.release(rfd) {
            defect(e);
        }
        self.curr_num_rfd -= 1;
    }

    fn post(&mut self, rfd: SlotIndex, hw: &dyn NicHardware) {
        let Some(slot) = self.pool.get_mut(rfd) else {
            defect(PoolError::InvalidIndex { index: rfd })
        };
        slot.mark_device_owned();
        let desc = RfdDescriptor {
            index: rfd,
            bus_addr: slot.bus_addr(),
            size: slot.capacity(),
        };
        hw.post_rfd(&desc);
        self.ready.push_back(rfd);
    }

    fn lend(&mut self, request: Box<dyn ReadRequest>, frame: Frame, effects: &mut RecvEffects) {
        let Some(region) = self.region.clone() else {
            effects.failed.push((request, CompletionStatus::DeviceRemoved));
            return;
        };
        effects.handoffs.push(Handoff {
            request,
            region,
            rfd: frame.rfd,
            len: frame.len,
        });
    }

    /// Every RFD is buffered and none can be added: sacrifice the oldest frame.
    fn drop_oldest_if_starved(&mut self, hw: &dyn NicHardware, effects: &mut RecvEffects) {
        if !self.ready.is_empty() || self.curr_num_rfd < self.max_num_rfd {
            return;
        }
        if let Some(oldest) = self.buffered.pop_front() {
            log::warn!("pcidrv: receive overrun, dropping frame on RFD {}", oldest.rfd);
            effects.delta.rx_overruns += 1;
            self.post(oldest.rfd, hw);
        }
    }

    fn check_invariant(&self) {
        debug_assert!(
            self.ready.len() <= self.curr_num_rfd && self.curr_num_rfd <= self.max_num_rfd,
            "BUG: nReadyRecv={} CurrNumRfd={} MaxNumRfd={}",
            self.ready.len(),
            self.curr_num_rfd,
            self.max_num_rfd
        );
    }
}
