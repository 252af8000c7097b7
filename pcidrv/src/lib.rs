//! PCI NIC transmit/receive resource engine.
//!
//! The per-device state behind a NIC's data paths: pooled transmit control
//! blocks (TCBs), pooled receive frame descriptors (RFDs) carved from DMA
//! common buffers, the request queues that bridge I/O requests to those
//! pools, and the lock discipline that keeps both pipelines consistent when
//! called concurrently from request threads and interrupt-time handlers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         DriverContext                            │
//! │                    (shared DmaAllocator)                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                           NicDevice                              │
//! │                                                                  │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌──────────────────┐  │
//! │  │  SendLock       │  │  RcvLock        │  │  Lock            │  │
//! │  │  TCB pool       │  │  RFD pool       │  │  HwErrCount      │  │
//! │  │  active list    │  │  ready list     │  │  byte counters   │  │
//! │  │  pending writes │  │  pending reads  │  │                  │  │
//! │  └─────────────────┘  └─────────────────┘  └──────────────────┘  │
//! │                 RemoveLock (RefCount, atomic)                    │
//! └──────────────────────────────────────────────────────────────────┘
//!          │ submit_tcb / post_rfd                  ▲ complete_send /
//!          ▼                                        │ on_frame_arrival
//!                          NicHardware
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let driver = DriverContext::new(Arc::new(HostAllocator::new()));
//! let device = driver.add_device(identity, resources, &store, Box::new(hw))?;
//!
//! device.send(Box::new(write))?;        // request thread
//! device.complete_send(Ok(()))?;        // interrupt side
//! device.on_frame_arrival(rfd, len)?;   // interrupt side
//! device.replenish()?;                  // background
//!
//! driver.remove_device(&device)?;
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod config;
pub mod device;
pub mod dma;
pub mod driver;
pub mod error;
pub mod hw;
pub mod queue;
mod recv;
pub mod remove_lock;
pub mod request;
mod send;
pub mod stats;

pub use config::{ConfigStore, DeviceConfig, MemoryStore};
pub use device::{DeviceParams, NicDevice, FDO_SIGNATURE};
pub use dma::SlotIndex;
pub use driver::DriverContext;
pub use error::{DriverError, Result, TeardownFailure};
pub use hw::{AccessMode, HwError, HwResources, NicHardware, PciIdentity, RfdDescriptor, TcbDescriptor};
pub use request::{CompletionStatus, ReadRequest, RequestId, WriteRequest};
pub use send::SendDisposition;
pub use stats::{DeviceStats, RecvCounters, SendCounters};
