//! DMA common-buffer allocation for bare-metal NIC drivers.
//!
//! A driver asks a [`DmaAllocator`] for one contiguous, zeroed, page-aligned
//! region per data path and carves it into fixed-size slots itself. The
//! allocator hands back a [`CommonBuffer`] carrying both the CPU pointer and
//! the device-visible bus address of the region.
//!
//! # Usage
//!
//! ```ignore
//! use dma_pool::{DmaAllocator, HostAllocator};
//!
//! let alloc = HostAllocator::with_budget(2 * 1024 * 1024);
//! let buf = alloc.alloc_common(64 * 2048)?;
//! // ... program buf.bus_addr() into the device ...
//! alloc.free_common(buf);
//! ```

#![no_std]

extern crate alloc;

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

/// Page size (4KB).
pub const PAGE_SIZE: usize = 4096;

/// Default allocation budget for a host allocator (2MB).
pub const DEFAULT_POOL_SIZE: usize = 2 * 1024 * 1024;

// ============================================================================
// Utility functions
// ============================================================================

/// Align a value up to the given alignment.
#[inline]
pub const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

/// Align a value down to the given alignment.
#[inline]
pub const fn align_down(val: usize, align: usize) -> usize {
    val & !(align - 1)
}

/// Convert pages to bytes.
#[inline]
pub const fn pages_to_bytes(pages: usize) -> usize {
    pages * PAGE_SIZE
}

/// Convert bytes to pages (rounded up).
#[inline]
pub const fn bytes_to_pages(bytes: usize) -> usize {
    align_up(bytes, PAGE_SIZE) / PAGE_SIZE
}

// ============================================================================
// Error types
// ============================================================================

/// DMA allocation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DmaError {
    /// Requested a zero-length region.
    #[error("zero-length DMA allocation")]
    ZeroSize,
    /// Not enough memory left in the allocator budget.
    #[error("out of DMA memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Bytes requested (page rounded).
        requested: usize,
        /// Bytes still available.
        available: usize,
    },
    /// Layout could not be built for the request.
    #[error("invalid DMA region layout")]
    InvalidRegion,
}

/// Result type for DMA operations.
pub type Result<T> = core::result::Result<T, DmaError>;

// ============================================================================
// Common buffer
// ============================================================================

/// A contiguous, cache-coherent DMA region.
///
/// Owned by whoever allocated it until handed back through
/// [`DmaAllocator::free_common`]. Dropping it without freeing leaks the
/// memory, which is what hardware still holding the bus address requires.
#[derive(Debug)]
pub struct CommonBuffer {
    cpu: NonNull<u8>,
    bus: u64,
    len: usize,
    layout: Layout,
}

impl CommonBuffer {
    /// Build a buffer descriptor from raw parts.
    ///
    /// # Safety
    /// - `cpu` must point to `layout.size()` bytes of DMA-capable memory
    /// - `bus` must be the device-visible address of the same memory
    /// - `len <= layout.size()`
    pub unsafe fn from_raw_parts(cpu: NonNull<u8>, bus: u64, len: usize, layout: Layout) -> Self {
        debug_assert!(len <= layout.size());
        Self { cpu, bus, len, layout }
    }

    /// CPU-visible base pointer.
    pub fn cpu_ptr(&self) -> *mut u8 {
        self.cpu.as_ptr()
    }

    /// Device-visible base address.
    pub fn bus_addr(&self) -> u64 {
        self.bus
    }

    /// Usable length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes actually reserved (page rounded).
    pub fn reserved(&self) -> usize {
        self.layout.size()
    }
}

// The region is plain memory shared with a device; access discipline is the
// owner's responsibility (slot ownership in the driver).
unsafe impl Send for CommonBuffer {}
unsafe impl Sync for CommonBuffer {}

// ============================================================================
// Allocator collaborator
// ============================================================================

/// Source of DMA-capable common buffers.
pub trait DmaAllocator: Send + Sync {
    /// Allocate a zeroed, page-aligned region of at least `size` bytes.
    fn alloc_common(&self, size: usize) -> Result<CommonBuffer>;

    /// Return a region obtained from [`alloc_common`](Self::alloc_common).
    fn free_common(&self, buffer: CommonBuffer);
}

/// Identity-mapped allocator backed by the global heap.
///
/// Bus address == CPU address, as on the firmware paths that run with paging
/// identity mapped. A byte budget bounds the total outstanding allocation.
pub struct HostAllocator {
    budget: usize,
    outstanding: AtomicUsize,
    allocations: AtomicUsize,
}

impl HostAllocator {
    /// Allocator with the default 2MB budget.
    pub const fn new() -> Self {
        Self::with_budget(DEFAULT_POOL_SIZE)
    }

    /// Allocator that refuses to hand out more than `budget` bytes at once.
    pub const fn with_budget(budget: usize) -> Self {
        Self {
            budget,
            outstanding: AtomicUsize::new(0),
            allocations: AtomicUsize::new(0),
        }
    }

    /// Bytes currently allocated and not yet freed.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Number of live allocations.
    pub fn live_allocations(&self) -> usize {
        self.allocations.load(Ordering::Acquire)
    }

    /// Remaining budget in bytes.
    pub fn available(&self) -> usize {
        self.budget.saturating_sub(self.outstanding())
    }

    fn reserve(&self, bytes: usize) -> Result<()> {
        let mut current = self.outstanding.load(Ordering::Relaxed);
        loop {
            let next = current.checked_add(bytes).filter(|n| *n <= self.budget).ok_or(
                DmaError::OutOfMemory {
                    requested: bytes,
                    available: self.budget.saturating_sub(current),
                },
            )?;
            match self.outstanding.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(seen) => current = seen,
            }
        }
    }
}

impl Default for HostAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaAllocator for HostAllocator {
    fn alloc_common(&self, size: usize) -> Result<CommonBuffer> {
        if size == 0 {
            return Err(DmaError::ZeroSize);
        }
        let reserved = pages_to_bytes(bytes_to_pages(size));
        let layout =
            Layout::from_size_align(reserved, PAGE_SIZE).map_err(|_| DmaError::InvalidRegion)?;

        self.reserve(reserved)?;

        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc::alloc_zeroed(layout) };
        let Some(cpu) = NonNull::new(raw) else {
            self.outstanding.fetch_sub(reserved, Ordering::AcqRel);
            return Err(DmaError::OutOfMemory {
                requested: reserved,
                available: self.available(),
            });
        };
        self.allocations.fetch_add(1, Ordering::AcqRel);

        // SAFETY: freshly allocated with `layout`; identity mapped.
        Ok(unsafe { CommonBuffer::from_raw_parts(cpu, cpu.as_ptr() as u64, size, layout) })
    }

    fn free_common(&self, buffer: CommonBuffer) {
        let reserved = buffer.layout.size();
        // SAFETY: every CommonBuffer reaching here came from alloc_common.
        unsafe { alloc::alloc::dealloc(buffer.cpu.as_ptr(), buffer.layout) };
        self.outstanding.fetch_sub(reserved, Ordering::AcqRel);
        self.allocations.fetch_sub(1, Ordering::AcqRel);
    }
}
