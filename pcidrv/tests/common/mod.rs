#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dma_pool::HostAllocator;
use pcidrv::{
    AccessMode, CompletionStatus, DeviceConfig, DeviceParams, HwError, HwResources, NicDevice,
    NicHardware, PciIdentity, ReadRequest, RequestId, RfdDescriptor, SlotIndex, TcbDescriptor,
    WriteRequest,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ----------------------------------------------------------------------------
// Hardware
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct HwState {
    pub submitted: Mutex<Vec<TcbDescriptor>>,
    pub posted: Mutex<Vec<RfdDescriptor>>,
    pub fail_submit: AtomicBool,
    pub fail_release: AtomicBool,
    pub released: AtomicBool,
    /// While set, hardware calls block (with the path lock held).
    pub hold: AtomicBool,
    /// Callers currently blocked by `hold`.
    pub held: AtomicUsize,
}

impl HwState {
    pub fn submitted(&self) -> Vec<TcbDescriptor> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn post_count(&self) -> usize {
        self.posted.lock().unwrap().len()
    }

    /// Most recent posting of `rfd`.
    pub fn rfd(&self, rfd: SlotIndex) -> RfdDescriptor {
        *self
            .posted
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|d| d.index == rfd)
            .expect("rfd was never posted")
    }

    /// Park the calling thread here while `hold` is set.
    fn gate(&self) {
        if !self.hold.load(Ordering::SeqCst) {
            return;
        }
        self.held.fetch_add(1, Ordering::SeqCst);
        while self.hold.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
        self.held.fetch_sub(1, Ordering::SeqCst);
    }

    /// Spin until `n` callers are blocked in the hardware.
    pub fn wait_held(&self, n: usize) {
        while self.held.load(Ordering::SeqCst) < n {
            std::thread::yield_now();
        }
    }

    /// Bytes the engine copied into a submitted TCB.
    pub fn tcb_bytes(&self, desc: &TcbDescriptor) -> Vec<u8> {
        // HostAllocator is identity mapped.
        unsafe { std::slice::from_raw_parts(desc.bus_addr as *const u8, desc.len).to_vec() }
    }
}

pub struct MockHardware {
    pub state: Arc<HwState>,
}

impl NicHardware for MockHardware {
    fn submit_tcb(&self, tcb: &TcbDescriptor) -> Result<(), HwError> {
        self.state.gate();
        if self.state.fail_submit.load(Ordering::SeqCst) {
            return Err(HwError::QueueFull);
        }
        self.state.submitted.lock().unwrap().push(*tcb);
        Ok(())
    }

    fn post_rfd(&self, rfd: &RfdDescriptor) {
        self.state.gate();
        self.state.posted.lock().unwrap().push(*rfd);
    }

    fn release(&self) -> Result<(), HwError> {
        self.state.released.store(true, Ordering::SeqCst);
        if self.state.fail_release.load(Ordering::SeqCst) {
            return Err(HwError::Fault(0x42));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Requests
// ----------------------------------------------------------------------------

pub type WriteLog = Arc<Mutex<Vec<(RequestId, Result<usize, CompletionStatus>)>>>;
pub type ReadLog = Arc<Mutex<Vec<(RequestId, Result<Vec<u8>, CompletionStatus>)>>>;

pub struct TestWrite {
    pub id: RequestId,
    pub payload: Vec<u8>,
    pub log: WriteLog,
}

impl WriteRequest for TestWrite {
    fn id(&self) -> RequestId {
        self.id
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn complete(self: Box<Self>, result: Result<usize, CompletionStatus>) {
        self.log.lock().unwrap().push((self.id, result));
    }
}

pub struct TestRead {
    pub id: RequestId,
    pub log: ReadLog,
}

impl ReadRequest for TestRead {
    fn id(&self) -> RequestId {
        self.id
    }

    fn complete(self: Box<Self>, result: Result<&[u8], CompletionStatus>) {
        self.log.lock().unwrap().push((self.id, result.map(|b| b.to_vec())));
    }
}

pub fn write(id: u64, len: usize, log: &WriteLog) -> Box<TestWrite> {
    Box::new(TestWrite {
        id: RequestId(id),
        payload: vec![id as u8; len],
        log: log.clone(),
    })
}

pub fn read(id: u64, log: &ReadLog) -> Box<TestRead> {
    Box::new(TestRead {
        id: RequestId(id),
        log: log.clone(),
    })
}

pub fn ids<T>(log: &Mutex<Vec<(RequestId, T)>>) -> Vec<u64> {
    log.lock().unwrap().iter().map(|(id, _)| id.0).collect()
}

// ----------------------------------------------------------------------------
// Device
// ----------------------------------------------------------------------------

pub struct Rig {
    pub device: NicDevice,
    pub hw: Arc<HwState>,
    pub alloc: Arc<HostAllocator>,
    pub writes: WriteLog,
    pub reads: ReadLog,
}

pub fn resources() -> HwResources {
    HwResources {
        io_base: 0xE000,
        io_range: 0x40,
        mem_phys: 0xFEB0_0000,
        access: AccessMode::MappedMemory { csr: 0xFEB0_0000 },
    }
}

pub fn rig_with(config: DeviceConfig) -> Rig {
    init_logging();
    let hw = Arc::new(HwState::default());
    let alloc = Arc::new(HostAllocator::new());
    let params = DeviceParams {
        identity: PciIdentity {
            revision_id: 8,
            sub_vendor_id: 0x8086,
            sub_system_id: 0x0001,
        },
        resources: resources(),
        config,
    };
    let device = NicDevice::start(
        params,
        Box::new(MockHardware { state: hw.clone() }),
        alloc.clone(),
    )
    .unwrap();
    Rig {
        device,
        hw,
        alloc,
        writes: WriteLog::default(),
        reads: ReadLog::default(),
    }
}

pub fn rig(num_tcb: u32, num_rfd: u32, max_num_rfd: u32) -> Rig {
    rig_with(DeviceConfig::new(num_tcb, num_rfd, Some(max_num_rfd)))
}

impl Rig {
    /// Play the device: fill the oldest posted RFD with `data` and signal it.
    pub fn deliver(&self, data: &[u8]) -> SlotIndex {
        let rfd = *self
            .device
            .posted_rfds()
            .first()
            .expect("no RFD posted");
        let desc = self.hw.rfd(rfd);
        assert!(data.len() <= desc.size);
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), desc.bus_addr as *mut u8, data.len());
        }
        self.device.on_frame_arrival(rfd, data.len()).unwrap();
        rfd
    }
}
