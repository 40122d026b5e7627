//! Shared test utilities for page-source failure and accounting tests.

#![allow(dead_code)]

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use oxicov::allocator::{PageSource, PageSourceError, SystemPageSource};
use oxicov::{AlignedBuffer, Fingerprint, Payload};

/// A fault-injection wrapper around the system page source.
///
/// Allows deterministic injection of an out-of-memory failure at the Nth
/// allocation, and counts allocations and bytes handed out.
pub struct FaultInjectionPageSource {
    inner: SystemPageSource,
    /// Total number of allocate_zeroed calls observed so far.
    alloc_count: AtomicU64,
    /// When non-zero, the Nth allocation (1-based) fails.
    fail_from: AtomicU64,
    /// Only the Nth allocation fails; later ones succeed again.
    fail_once: AtomicBool,
    /// Bytes handed out.
    bytes: AtomicUsize,
}

impl FaultInjectionPageSource {
    pub fn new() -> Self {
        Self {
            inner: SystemPageSource::new(),
            alloc_count: AtomicU64::new(0),
            fail_from: AtomicU64::new(0),
            fail_once: AtomicBool::new(false),
            bytes: AtomicUsize::new(0),
        }
    }

    /// Make the Nth allocation (1-based) and every later one fail.
    pub fn fail_from(self, operation_n: u64) -> Self {
        self.fail_from.store(operation_n, Ordering::SeqCst);
        self
    }

    /// Make only the Nth allocation (1-based) fail.
    pub fn fail_at(self, operation_n: u64) -> Self {
        self.fail_once.store(true, Ordering::SeqCst);
        self.fail_from(operation_n)
    }

    /// Total allocate_zeroed calls observed.
    pub fn alloc_count(&self) -> u64 {
        self.alloc_count.load(Ordering::SeqCst)
    }

    /// Bytes successfully handed out.
    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::SeqCst)
    }
}

// SAFETY: every buffer comes from `SystemPageSource`.
unsafe impl PageSource for FaultInjectionPageSource {
    fn allocate_zeroed(&self, size: usize, align: usize) -> Result<AlignedBuffer, PageSourceError> {
        let n = self.alloc_count.fetch_add(1, Ordering::SeqCst) + 1;
        let target = self.fail_from.load(Ordering::SeqCst);
        let failing = if self.fail_once.load(Ordering::SeqCst) {
            n == target
        } else {
            n >= target
        };
        if target != 0 && failing {
            return Err(PageSourceError::OutOfMemory { size });
        }
        let buffer = self.inner.allocate_zeroed(size, align)?;
        self.bytes.fetch_add(buffer.size(), Ordering::SeqCst);
        Ok(buffer)
    }
}

/// A page source that carves blocks out of one pre-allocated region.
///
/// Blocks are never reused, so every block handed out is still zero. Each
/// block keeps the region alive until it is released.
pub struct BumpPageSource {
    region: Arc<AlignedBuffer>,
    offset: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl BumpPageSource {
    pub fn new(capacity: usize) -> Self {
        Self {
            region: Arc::new(AlignedBuffer::zeroed(4096, capacity).expect("region allocates")),
            offset: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bytes carved out so far, including alignment padding.
    pub fn used(&self) -> usize {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.region.size()
    }

    /// Blocks given back through their release callback.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Whether `ptr` lies inside the region.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let start = self.region.as_ptr() as usize;
        (start..start + self.region.size()).contains(&(ptr as usize))
    }
}

// SAFETY: the region comes zeroed from the global allocator, blocks never
// overlap and are never handed out twice, and each block holds an `Arc` on
// the region until it is released.
unsafe impl PageSource for BumpPageSource {
    fn allocate_zeroed(&self, size: usize, align: usize) -> Result<AlignedBuffer, PageSourceError> {
        if size == 0 || !align.is_power_of_two() || align > 4096 {
            return Err(PageSourceError::InvalidLayout { size, align });
        }
        let mut start = 0;
        self.offset
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |offset| {
                start = (offset + align - 1) & !(align - 1);
                let end = start.checked_add(size)?;
                (end <= self.region.size()).then_some(end)
            })
            .map_err(|_| PageSourceError::OutOfMemory { size })?;

        let region = Arc::clone(&self.region);
        let released = Arc::clone(&self.released);
        let ptr = NonNull::new(unsafe { self.region.as_ptr().add(start) } as *mut u8)
            .expect("region pointer is non-null");
        // SAFETY: `start..start + size` lies inside the region, is aligned and
        // belongs to this block alone; the closure keeps the region alive.
        Ok(unsafe {
            AlignedBuffer::from_raw_parts(
                ptr,
                size,
                align,
                Box::new(move |_: NonNull<u8>, _: usize| {
                    released.fetch_add(1, Ordering::SeqCst);
                    drop(region);
                }),
            )
        })
    }
}

pub fn fp(raw: u128) -> Fingerprint {
    Fingerprint::new(raw).expect("test fingerprints are nonzero")
}

pub fn payload(value: u64) -> Payload {
    Payload::new(value).expect("test payloads are in range")
}

/// Spread a small key index over all 128 bits so keys exercise both halves.
pub fn key_for(index: u64) -> Fingerprint {
    let low = (index + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let high = index.rotate_left(29) ^ 0xD6E8_FEB8_6659_FD93;
    Fingerprint::from_halves(low | 1, high).expect("low half is odd")
}

/// The payload every writer publishes for `index`.
pub fn payload_for(index: u64) -> Payload {
    Payload::new(index).expect("key indices are below Payload::MAX")
}
