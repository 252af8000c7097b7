//! Per-device context (`FDO_DATA`).
//!
//! Three independent locks guard three substructures:
//!
//! | lock       | protects                                          |
//! |------------|---------------------------------------------------|
//! | `SendLock` | TCB pool, active-send list, pending writes, counters |
//! | `RcvLock`  | RFD pool, ready list, buffered frames, pending reads |
//! | `Lock`     | hardware error count, byte counters               |
//!
//! No method holds two of them at once: work done under a path lock produces
//! effects (completions, stat deltas) that are applied after it is dropped.
//! The remove lock (`RefCount`) is atomic and outside all three.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use dma_pool::DmaAllocator;
use spin::Mutex;

use crate::config::DeviceConfig;
use crate::dma::{DmaRegion, SlotIndex};
use crate::error::{DriverError, Result, TeardownFailure};
use crate::hw::{HwError, HwResources, NicHardware, PciIdentity};
use crate::recv::{RecvEffects, RecvPath};
use crate::remove_lock::{RemoveGuard, RemoveLock};
use crate::request::{ReadRequest, RequestId, WriteRequest};
use crate::send::{SendDisposition, SendEffects, SendPath};
use crate::stats::{DeviceStats, RecvCounters, SendCounters, StatsDelta};

/// `'odFT'`, stamped on a live device context.
pub const FDO_SIGNATURE: u32 = 0x6F64_4654;

/// Written over the signature when the context is destroyed.
const FDO_SIGNATURE_DEAD: u32 = 0xDEAD_4654;

/// Everything needed to bring a device up.
pub struct DeviceParams {
    pub identity: PciIdentity,
    pub resources: HwResources,
    pub config: DeviceConfig,
}

pub struct NicDevice {
    signature: AtomicU32,
    identity: PciIdentity,
    resources: HwResources,
    config: DeviceConfig,
    hw: Box<dyn NicHardware>,
    allocator: Arc<dyn DmaAllocator>,
    remove_lock: RemoveLock,
    send: Mutex<SendPath>,
    recv: Mutex<RecvPath>,
    lock: Mutex<DeviceStats>,
}

impl NicDevice {
    /// Allocate both DMA regions, carve the pools and post the initial RFDs.
    pub fn start(
        params: DeviceParams,
        hw: Box<dyn NicHardware>,
        allocator: Arc<dyn DmaAllocator>,
    ) -> Result<Self> {
        let DeviceParams {
            identity,
            resources,
            config,
        } = params;

        let tcb_bytes = config.num_tcb * DmaRegion::stride_for(config.tcb_buffer_size);
        let tcb_buffer = allocator.alloc_common(tcb_bytes)?;

        let rfd_bytes = config.max_num_rfd * DmaRegion::stride_for(config.hw_rfd_size);
        let rfd_buffer = match allocator.alloc_common(rfd_bytes) {
            Ok(buffer) => buffer,
            Err(e) => {
                allocator.free_common(tcb_buffer);
                return Err(e.into());
            }
        };

        let send = SendPath::new(DmaRegion::carve(
            tcb_buffer,
            config.tcb_buffer_size,
            config.num_tcb,
        ));
        let mut recv = RecvPath::new(
            DmaRegion::carve(rfd_buffer, config.hw_rfd_size, config.max_num_rfd),
            &config,
        );
        let posted = recv.post_ready(&*hw);

        log::info!(
            "pcidrv: device {:04x}:{:04x} rev {} started, {} TCBs, {} RFDs posted (max {}), {}",
            identity.sub_vendor_id,
            identity.sub_system_id,
            identity.revision_id,
            config.num_tcb,
            posted,
            config.max_num_rfd,
            if resources.mapped_ports() { "memory mapped" } else { "port I/O" }
        );

        Ok(Self {
            signature: AtomicU32::new(FDO_SIGNATURE),
            identity,
            resources,
            config,
            hw,
            allocator,
            remove_lock: RemoveLock::new(),
            send: Mutex::new(send),
            recv: Mutex::new(recv),
            lock: Mutex::new(DeviceStats::default()),
        })
    }

    // ------------------------------------------------------------------
    // Transmit
    // ------------------------------------------------------------------

    /// Accept an outbound request: bind it to a TCB or queue it.
    pub fn send(&self, request: Box<dyn WriteRequest>) -> Result<SendDisposition> {
        let _ref = self.enter()?;
        let mut effects = SendEffects::default();
        let disposition = self.send.lock().send(request, &*self.hw, &mut effects);
        self.settle_send(effects);
        Ok(disposition)
    }

    /// Hardware retired the oldest submitted TCB with `status`.
    ///
    /// Returns the id of the completed request, or `None` for a spurious
    /// completion on an empty list.
    pub fn complete_send(&self, status: core::result::Result<(), HwError>) -> Result<Option<RequestId>> {
        let _ref = self.enter()?;
        let mut effects = SendEffects::default();
        let id = self.send.lock().complete_head(status, &*self.hw, &mut effects);
        self.settle_send(effects);
        Ok(id)
    }

    /// Cancel a send still waiting for a TCB.
    pub fn cancel_send(&self, id: RequestId) -> Result<()> {
        let _ref = self.enter()?;
        let mut effects = SendEffects::default();
        let outcome = self.send.lock().cancel_waiting(id, &mut effects);
        self.settle_send(effects);
        outcome
    }

    // ------------------------------------------------------------------
    // Receive
    // ------------------------------------------------------------------

    /// Hand a read request the oldest buffered frame, or park it.
    ///
    /// Returns `true` when the request was satisfied immediately.
    pub fn read(&self, request: Box<dyn ReadRequest>) -> Result<bool> {
        let _ref = self.enter()?;
        let mut effects = RecvEffects::default();
        let served = self.recv.lock().read(request, &mut effects);
        self.settle_recv(effects);
        Ok(served)
    }

    pub fn cancel_read(&self, id: RequestId) -> Result<()> {
        let _ref = self.enter()?;
        let mut effects = RecvEffects::default();
        let outcome = self.recv.lock().cancel_read(id, &mut effects);
        self.settle_recv(effects);
        outcome
    }

    /// The device wrote a `len`-byte frame into `rfd`.
    pub fn on_frame_arrival(&self, rfd: SlotIndex, len: usize) -> Result<()> {
        let _ref = self.enter()?;
        let mut effects = RecvEffects::default();
        let outcome = self
            .recv
            .lock()
            .on_frame_arrival(rfd, len, &*self.hw, &mut effects);
        self.settle_recv(effects);
        outcome
    }

    /// The device reported a receive error on `rfd`.
    pub fn on_receive_error(&self, rfd: SlotIndex) -> Result<()> {
        let _ref = self.enter()?;
        let mut effects = RecvEffects::default();
        let outcome = self.recv.lock().on_receive_error(rfd, &*self.hw, &mut effects);
        self.settle_recv(effects);
        outcome
    }

    /// Post RFDs until `NumRfd` are in use.
    pub fn post_ready(&self) -> Result<usize> {
        let _ref = self.enter()?;
        let posted = self.recv.lock().post_ready(&*self.hw);
        Ok(posted)
    }

    /// Background top-up; a no-op unless `AllocNewRfd` is raised.
    pub fn replenish(&self) -> Result<usize> {
        let _ref = self.enter()?;
        let added = self.recv.lock().replenish(&*self.hw);
        Ok(added)
    }

    /// RFDs currently posted, in the order the device will fill them.
    pub fn posted_rfds(&self) -> Vec<SlotIndex> {
        self.validate();
        self.recv.lock().ready_rfds()
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    /// Take a device reference for work outside the engine's own calls.
    pub fn acquire_ref(&self) -> Result<RemoveGuard<'_>> {
        self.enter()
    }

    /// Outstanding references (`RefCount`).
    pub fn ref_count(&self) -> usize {
        self.remove_lock.count()
    }

    pub fn is_removed(&self) -> bool {
        self.remove_lock.is_removing()
    }

    pub fn stats(&self) -> DeviceStats {
        self.validate();
        *self.lock.lock()
    }

    pub fn send_counters(&self) -> SendCounters {
        self.validate();
        self.send.lock().counters()
    }

    pub fn recv_counters(&self) -> RecvCounters {
        self.validate();
        self.recv.lock().counters()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn resources(&self) -> &HwResources {
        &self.resources
    }

    pub fn identity(&self) -> &PciIdentity {
        &self.identity
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Release everything the device holds (`PciDrvReturnResources`).
    ///
    /// Fails every outstanding request, waits for `RefCount` to drain, then
    /// frees DMA memory and releases the hardware. Every step runs even if an
    /// earlier one failed; the failures are returned together.
    pub fn return_resources(&self) -> Result<()> {
        self.validate();
        if !self.remove_lock.begin_removal() {
            return Err(DriverError::DeviceRemoved);
        }
        log::info!("pcidrv: returning resources, {} references outstanding", self.ref_count());

        let mut send_effects = SendEffects::default();
        self.send.lock().abort_all(&mut send_effects);
        let failed_sends = send_effects.completions.len();
        self.settle_send(send_effects);

        let mut recv_effects = RecvEffects::default();
        self.recv.lock().abort_all(&mut recv_effects);
        let failed_reads = recv_effects.failed.len();
        self.settle_recv(recv_effects);

        log::debug!("pcidrv: failed {} sends and {} reads", failed_sends, failed_reads);

        self.remove_lock.wait_for_zero();

        let mut failures = Vec::new();

        let tcb_region = self.send.lock().release_dma();
        if let Some(region) = tcb_region {
            self.allocator.free_common(region.into_buffer());
        }

        let rfd_region = self.recv.lock().release_dma();
        if let Some(region) = rfd_region {
            match Arc::try_unwrap(region) {
                Ok(region) => self.allocator.free_common(region.into_buffer()),
                Err(_) => {
                    log::error!("pcidrv: receive region still lent out at teardown");
                    failures.push(TeardownFailure::RegionInUse("receive"));
                }
            }
        }

        if let Err(e) = self.hw.release() {
            log::warn!("pcidrv: hardware release failed: {}", e);
            failures.push(TeardownFailure::HardwareRelease(e));
        }

        log::info!("pcidrv: resources returned, {} failure(s)", failures.len());
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DriverError::Teardown(failures))
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn enter(&self) -> Result<RemoveGuard<'_>> {
        let guard = self.remove_lock.acquire().ok_or(DriverError::DeviceRemoved)?;
        self.validate();
        Ok(guard)
    }

    /// A bad signature means the context memory is corrupt or already gone.
    fn validate(&self) {
        let signature = self.signature.load(Ordering::Acquire);
        if signature != FDO_SIGNATURE {
            log::error!("pcidrv: device context signature mismatch ({:#010x})", signature);
            panic!("pcidrv: device context signature mismatch ({:#010x})", signature);
        }
    }

    fn apply_stats(&self, delta: &StatsDelta) {
        if !delta.is_empty() {
            self.lock.lock().apply(delta);
        }
    }

    fn settle_send(&self, effects: SendEffects) {
        self.apply_stats(&effects.delta);
        effects.completions.deliver();
    }

    fn settle_recv(&self, effects: RecvEffects) {
        self.apply_stats(&effects.delta);

        for (request, status) in effects.failed {
            request.complete(Err(status));
        }

        for handoff in effects.handoffs {
            // SAFETY: the RFD left the ready list under RcvLock and is driver
            // owned; only this hand-off refers to it until it is recycled.
            let frame = unsafe { handoff.region.slot_bytes(handoff.rfd, handoff.len) };
            handoff.request.complete(Ok(frame));
            drop(handoff.region);
            self.recv.lock().recycle(handoff.rfd, &*self.hw);
        }
    }
}

impl Drop for NicDevice {
    fn drop(&mut self) {
        if !self.remove_lock.is_removing() {
            if let Err(e) = self.return_resources() {
                log::warn!("pcidrv: teardown on drop: {}", e);
            }
        }
        self.signature.store(FDO_SIGNATURE_DEAD, Ordering::Release);
    }
}
