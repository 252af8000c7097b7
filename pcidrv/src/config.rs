//! Device configuration read from a registry-like key/value store.
//!
//! Values are read once at device start and never change afterwards.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};

use spin::Mutex;
use thiserror::Error;

/// Registry value names.
pub const NUM_TCB: &str = "NumTcb";
pub const NUM_RFD: &str = "NumRfd";
pub const MAX_NUM_RFD: &str = "MaxNumRfd";
pub const RFD_LOW_WATER: &str = "RfdLowWater";

pub const NIC_MIN_TCBS: u32 = 1;
pub const NIC_MAX_TCBS: u32 = 64;
pub const NIC_DEF_TCBS: u32 = 32;

pub const NIC_MIN_RFDS: u32 = 4;
pub const NIC_MAX_RFDS: u32 = 1024;
pub const NIC_DEF_RFDS: u32 = 20;

/// Default ceiling the RFD pool may grow to.
pub const NIC_MAX_GROW_RFDS: u32 = 128;

/// Transmit buffer size (one full Ethernet frame plus headroom).
pub const TCB_BUFFER_SIZE: usize = 2048;

/// Receive buffer size handed to hardware.
pub const HW_RFD_SIZE: usize = 1536;

/// Configuration store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("configuration store is read-only")]
    ReadOnly,
}

/// Registry-like source of per-device parameters.
pub trait ConfigStore: Send + Sync {
    fn read_value(&self, name: &str) -> Option<u32>;

    fn write_value(&self, name: &str, value: u32) -> Result<(), ConfigError>;
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, u32>>,
    read_only: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects writes.
    pub fn read_only() -> Self {
        Self {
            values: Mutex::new(BTreeMap::new()),
            read_only: true,
        }
    }

    /// Builder-style seeding, ignores `read_only`.
    pub fn with(self, name: &str, value: u32) -> Self {
        self.values.lock().insert(name.to_string(), value);
        self
    }
}

impl ConfigStore for MemoryStore {
    fn read_value(&self, name: &str) -> Option<u32> {
        self.values.lock().get(name).copied()
    }

    fn write_value(&self, name: &str, value: u32) -> Result<(), ConfigError> {
        if self.read_only {
            return Err(ConfigError::ReadOnly);
        }
        self.values.lock().insert(name.to_string(), value);
        Ok(())
    }
}

/// Effective, clamped device parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Raw `NumTcb` value found in the store, if any.
    pub reg_num_tcb: Option<u32>,
    pub num_tcb: usize,
    pub num_rfd: usize,
    pub max_num_rfd: usize,
    /// `AllocNewRfd` is raised when fewer RFDs than this are posted.
    pub rfd_low_water: usize,
    pub tcb_buffer_size: usize,
    pub hw_rfd_size: usize,
}

impl DeviceConfig {
    /// Build from explicit values, applying the same clamping as [`load`](Self::load).
    pub fn new(num_tcb: u32, num_rfd: u32, max_num_rfd: Option<u32>) -> Self {
        Self::clamp(Some(num_tcb), Some(num_rfd), max_num_rfd, None)
    }

    /// Read and clamp parameters from `store`.
    ///
    /// When the TCB count had to be corrected, the effective value is written
    /// back so the next start sees it; a failed write is only logged.
    pub fn load(store: &dyn ConfigStore) -> Self {
        let config = Self::clamp(
            store.read_value(NUM_TCB),
            store.read_value(NUM_RFD),
            store.read_value(MAX_NUM_RFD),
            store.read_value(RFD_LOW_WATER),
        );

        if config.reg_num_tcb != Some(config.num_tcb as u32) {
            if let Err(e) = store.write_value(NUM_TCB, config.num_tcb as u32) {
                log::warn!("pcidrv: could not persist {}={}: {}", NUM_TCB, config.num_tcb, e);
            }
        }

        log::debug!(
            "pcidrv: config tcb={} rfd={} max_rfd={} low_water={}",
            config.num_tcb,
            config.num_rfd,
            config.max_num_rfd,
            config.rfd_low_water
        );
        config
    }

    fn clamp(
        reg_num_tcb: Option<u32>,
        num_rfd: Option<u32>,
        max_num_rfd: Option<u32>,
        low_water: Option<u32>,
    ) -> Self {
        let num_tcb = clamp_value(NUM_TCB, reg_num_tcb, NIC_DEF_TCBS, NIC_MIN_TCBS, NIC_MAX_TCBS);
        let num_rfd = clamp_value(NUM_RFD, num_rfd, NIC_DEF_RFDS, NIC_MIN_RFDS, NIC_MAX_RFDS);
        let max_num_rfd = clamp_value(
            MAX_NUM_RFD,
            max_num_rfd,
            num_rfd.max(NIC_MAX_GROW_RFDS),
            num_rfd,
            NIC_MAX_RFDS,
        );
        let rfd_low_water = clamp_value(RFD_LOW_WATER, low_water, (num_rfd / 2).max(1), 1, num_rfd);

        Self {
            reg_num_tcb,
            num_tcb: num_tcb as usize,
            num_rfd: num_rfd as usize,
            max_num_rfd: max_num_rfd as usize,
            rfd_low_water: rfd_low_water as usize,
            tcb_buffer_size: TCB_BUFFER_SIZE,
            hw_rfd_size: HW_RFD_SIZE,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::clamp(None, None, None, None)
    }
}

fn clamp_value(name: &str, value: Option<u32>, default: u32, min: u32, max: u32) -> u32 {
    match value {
        None => default,
        Some(v) if v < min || v > max => {
            let clamped = v.clamp(min, max);
            log::warn!("pcidrv: {}={} out of range {}..={}, using {}", name, v, min, max, clamped);
            clamped
        }
        Some(v) => v,
    }
}
