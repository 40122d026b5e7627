//! Page source capability
//!
//! The page source is the only memory dependency of the tables. It is assumed
//! never to fail in production (capacity is planned at deployment time); when
//! it does, the failure is propagated unmodified.

use crate::utility::{is_power_of_two, AlignedBuffer};

/// Errors returned by a page source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageSourceError {
    /// The underlying allocator had no memory for the request
    #[error("out of memory allocating {size} bytes")]
    OutOfMemory {
        /// Requested size in bytes
        size: usize,
    },
    /// The request itself was not a valid layout
    #[error("invalid layout: {size} bytes aligned to {align}")]
    InvalidLayout {
        /// Requested size in bytes
        size: usize,
        /// Requested alignment
        align: usize,
    },
    /// The source returned a buffer that does not satisfy the request
    #[error("page source returned {got} bytes aligned to {got_align}, wanted {size} aligned to {align}")]
    ShortAllocation {
        /// Requested size in bytes
        size: usize,
        /// Requested alignment
        align: usize,
        /// Size actually returned
        got: usize,
        /// Alignment actually returned
        got_align: usize,
    },
}

/// Supplier of zero-initialized memory blocks
///
/// Sources backed by memory the global allocator does not own (a pre-mapped
/// region, shared memory) hand blocks out with [`AlignedBuffer::from_raw_parts`]
/// and take them back in its release callback.
///
/// # Safety
/// Implementations must return buffers whose bytes are all zero, that are at
/// least `size` bytes long, and whose address is a multiple of `align`. The
/// tables lay atomics over the returned memory and rely on the zero pattern
/// being the empty state of every slot.
pub unsafe trait PageSource: Send + Sync {
    /// Allocate `size` zeroed bytes aligned to `align`
    fn allocate_zeroed(&self, size: usize, align: usize) -> Result<AlignedBuffer, PageSourceError>;
}

/// Page source backed by the global allocator
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPageSource;

impl SystemPageSource {
    /// Create a new system page source
    pub const fn new() -> Self {
        Self
    }
}

// SAFETY: `AlignedBuffer::zeroed` uses `alloc_zeroed` with the exact layout
// requested.
unsafe impl PageSource for SystemPageSource {
    fn allocate_zeroed(&self, size: usize, align: usize) -> Result<AlignedBuffer, PageSourceError> {
        if size == 0 || !is_power_of_two(align as u64) {
            return Err(PageSourceError::InvalidLayout { size, align });
        }
        AlignedBuffer::zeroed(align, size).ok_or(PageSourceError::OutOfMemory { size })
    }
}
