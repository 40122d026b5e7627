//! Utility functions
//!
//! Power-of-two helpers and the aligned, zero-initialized buffer handed out by
//! page sources.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

/// Check if a value is a power of two
#[inline]
pub const fn is_power_of_two(n: u64) -> bool {
    n != 0 && (n & (n - 1)) == 0
}

/// Pad a size to the specified alignment
#[inline]
pub const fn pad_alignment(size: usize, alignment: usize) -> usize {
    debug_assert!(is_power_of_two(alignment as u64));
    (size + alignment - 1) & !(alignment - 1)
}

/// Aligned zeroed memory allocation
///
/// # Safety
/// The caller must ensure that:
/// - `alignment` is a power of two
/// - `size` is non-zero
/// - The returned memory must be deallocated with `aligned_free`
pub unsafe fn aligned_alloc_zeroed(alignment: usize, size: usize) -> Option<NonNull<u8>> {
    debug_assert!(is_power_of_two(alignment as u64));
    debug_assert!(size > 0);

    let layout = Layout::from_size_align(size, alignment).ok()?;
    let ptr = alloc_zeroed(layout);
    NonNull::new(ptr)
}

/// Free aligned memory
///
/// # Safety
/// The caller must ensure that:
/// - `ptr` was allocated with `aligned_alloc_zeroed`
/// - `alignment` and `size` match the original allocation
pub unsafe fn aligned_free(ptr: NonNull<u8>, alignment: usize, size: usize) {
    // The layout was validated when the block was allocated.
    let layout = Layout::from_size_align_unchecked(size, alignment);
    dealloc(ptr.as_ptr(), layout);
}

/// Callback that gives an externally owned block back to its owner
///
/// Receives the block's start pointer and size.
pub type ReleaseFn = Box<dyn FnOnce(NonNull<u8>, usize) + Send + Sync>;

/// RAII wrapper for aligned, zero-initialized memory
///
/// Blocks either come from the global allocator ([`AlignedBuffer::zeroed`]) or
/// from an external owner ([`AlignedBuffer::from_raw_parts`]), which gets them
/// back through its release callback on drop.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    size: usize,
    alignment: usize,
    /// `None` for blocks owned by the global allocator
    release: Option<ReleaseFn>,
}

impl AlignedBuffer {
    /// Allocate a new zeroed aligned buffer
    ///
    /// Returns `None` for an invalid layout (zero size, alignment not a power of
    /// two) or when the global allocator fails.
    pub fn zeroed(alignment: usize, size: usize) -> Option<Self> {
        if size == 0 || !is_power_of_two(alignment as u64) {
            return None;
        }
        // SAFETY: alignment is a power of two and size is non-zero; the block is
        // freed with the same layout in `Drop`.
        unsafe {
            aligned_alloc_zeroed(alignment, size).map(|ptr| Self {
                ptr,
                size,
                alignment,
                release: None,
            })
        }
    }

    /// Wrap a block owned by someone else
    ///
    /// `release` runs exactly once, when the buffer is dropped.
    ///
    /// # Safety
    /// The caller must ensure that:
    /// - `ptr` is valid for reads and writes of `size` bytes until `release` runs
    /// - `ptr` is aligned to `alignment`, which is a power of two
    /// - nothing else reads or writes the block until `release` runs
    /// - every byte of the block is zero when it is handed to a page-source caller
    pub unsafe fn from_raw_parts(
        ptr: NonNull<u8>,
        size: usize,
        alignment: usize,
        release: ReleaseFn,
    ) -> Self {
        debug_assert!(is_power_of_two(alignment as u64));
        debug_assert_eq!(ptr.as_ptr() as usize % alignment, 0);
        Self {
            ptr,
            size,
            alignment,
            release: Some(release),
        }
    }

    /// Get a pointer to the buffer
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr() as *const u8
    }

    /// Get the size of the buffer
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the alignment of the buffer
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Get a slice view of the buffer
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the block is valid for `size` bytes while `self` lives, and the
        // returned borrow cannot outlive `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .field("external", &self.release.is_some())
            .finish()
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        match self.release.take() {
            Some(release) => release(self.ptr, self.size),
            // SAFETY: blocks without a release callback come from
            // `aligned_alloc_zeroed` with this exact layout.
            None => unsafe { aligned_free(self.ptr, self.alignment, self.size) },
        }
    }
}

// Safety: AlignedBuffer owns its memory; shared access goes through atomics
// laid over it.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_power_of_two() {
        assert!(!is_power_of_two(0));
        assert!(is_power_of_two(1));
        assert!(is_power_of_two(2));
        assert!(!is_power_of_two(3));
        assert!(is_power_of_two(4));
        assert!(is_power_of_two(1024));
        assert!(!is_power_of_two(1023));
    }

    #[test]
    fn test_pad_alignment() {
        assert_eq!(pad_alignment(1, 8), 8);
        assert_eq!(pad_alignment(8, 8), 8);
        assert_eq!(pad_alignment(9, 8), 16);
        assert_eq!(pad_alignment(100, 64), 128);
    }

    #[test]
    fn test_aligned_buffer_is_zeroed() {
        let buf = AlignedBuffer::zeroed(64, 1024).unwrap();
        assert_eq!(buf.size(), 1024);
        assert_eq!(buf.alignment(), 64);
        assert_eq!(buf.as_ptr() as usize % 64, 0);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_external_buffer_runs_release_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let backing = AlignedBuffer::zeroed(64, 256).unwrap();
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let start = NonNull::new(backing.as_ptr() as *mut u8).unwrap();
        let start_addr = start.as_ptr() as usize;

        // SAFETY: `backing` outlives `external` and nothing else touches it.
        let external = unsafe {
            AlignedBuffer::from_raw_parts(
                start,
                128,
                64,
                Box::new(move |ptr: NonNull<u8>, size: usize| {
                    assert_eq!(size, 128);
                    assert_eq!(ptr.as_ptr() as usize, start_addr);
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };
        assert_eq!(external.size(), 128);
        assert!(external.as_slice().iter().all(|&b| b == 0));
        assert!(format!("{external:?}").contains("external: true"));

        drop(external);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_aligned_buffer_rejects_bad_layout() {
        assert!(AlignedBuffer::zeroed(64, 0).is_none());
        assert!(AlignedBuffer::zeroed(48, 1024).is_none());
    }
}
