//! Driver-wide context shared by every device.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use dma_pool::DmaAllocator;

use crate::config::{ConfigStore, DeviceConfig};
use crate::device::{DeviceParams, NicDevice};
use crate::error::{DriverError, Result};
use crate::hw::{HwResources, NicHardware, PciIdentity};

/// Holds the DMA allocator all devices draw from.
pub struct DriverContext {
    allocator: Arc<dyn DmaAllocator>,
    devices: AtomicUsize,
}

impl DriverContext {
    pub fn new(allocator: Arc<dyn DmaAllocator>) -> Self {
        Self {
            allocator,
            devices: AtomicUsize::new(0),
        }
    }

    /// Read the device's configuration and start it.
    pub fn add_device(
        &self,
        identity: PciIdentity,
        resources: HwResources,
        store: &dyn ConfigStore,
        hw: Box<dyn NicHardware>,
    ) -> Result<Arc<NicDevice>> {
        let config = DeviceConfig::load(store);
        let params = DeviceParams {
            identity,
            resources,
            config,
        };
        let device = NicDevice::start(params, hw, self.allocator.clone())?;
        self.devices.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(device))
    }

    /// Tear a device down. The device stops being counted even when teardown
    /// reports failures; removing it a second time changes nothing.
    pub fn remove_device(&self, device: &NicDevice) -> Result<()> {
        let outcome = device.return_resources();
        if outcome != Err(DriverError::DeviceRemoved) {
            let _ = self
                .devices
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
        outcome
    }

    pub fn device_count(&self) -> usize {
        self.devices.load(Ordering::Acquire)
    }

    pub fn allocator(&self) -> &Arc<dyn DmaAllocator> {
        &self.allocator
    }
}
