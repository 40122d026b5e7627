use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;

use bytemuck::Zeroable;

use crate::allocator::{PageSource, PageSourceError};
use crate::constants::CACHE_LINE_BYTES;
use crate::utility::{pad_alignment, AlignedBuffer};

/// Fixed-length array of `T` laid over a zeroed page-source buffer
///
/// The array is aligned to at least a cache line. Elements are only ever
/// reached through `&T`, so `T` is expected to be an atomic cell.
pub struct ZeroedArray<T: Zeroable> {
    buffer: AlignedBuffer,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: Zeroable> ZeroedArray<T> {
    /// Allocate `len` zeroed elements from `source`
    pub fn new_in<S: PageSource + ?Sized>(source: &S, len: usize) -> Result<Self, PageSourceError> {
        let align = mem::align_of::<T>().max(CACHE_LINE_BYTES);
        let size = len
            .checked_mul(mem::size_of::<T>())
            .filter(|&size| size > 0 && size <= isize::MAX as usize - align)
            .map(|size| pad_alignment(size, align))
            .ok_or(PageSourceError::InvalidLayout {
                size: len.saturating_mul(mem::size_of::<T>()),
                align,
            })?;

        let buffer = source.allocate_zeroed(size, align)?;
        if buffer.size() < size || buffer.as_ptr() as usize % align != 0 {
            return Err(PageSourceError::ShortAllocation {
                size,
                align,
                got: buffer.size(),
                got_align: 1 << (buffer.as_ptr() as usize).trailing_zeros().min(63),
            });
        }

        Ok(Self {
            buffer,
            len,
            _marker: PhantomData,
        })
    }

    /// Number of elements
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the array has no elements
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes backing the array
    #[inline]
    pub fn byte_size(&self) -> usize {
        self.buffer.size()
    }
}

impl<T: Zeroable> Deref for ZeroedArray<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &[T] {
        // SAFETY: the buffer is at least `len * size_of::<T>()` bytes, aligned for
        // `T`, and was zeroed by the page source; `T: Zeroable` makes the zero
        // pattern a valid `T`. The buffer lives as long as `self`.
        unsafe { std::slice::from_raw_parts(self.buffer.as_ptr() as *const T, self.len) }
    }
}

impl<T: Zeroable> std::fmt::Debug for ZeroedArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeroedArray")
            .field("len", &self.len)
            .field("bytes", &self.buffer.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::allocator::SystemPageSource;
    use crate::slot::{AtomicSlot, SlotState};

    #[test]
    fn test_zeroed_array_starts_empty() {
        let array = ZeroedArray::<AtomicSlot>::new_in(&SystemPageSource, 100).unwrap();
        assert_eq!(array.len(), 100);
        assert!(!array.is_empty());
        assert!(array.byte_size() >= 100 * mem::size_of::<AtomicSlot>());
        assert_eq!(array.as_ptr() as usize % CACHE_LINE_BYTES, 0);
        for slot in array.iter() {
            assert_eq!(slot.load(Ordering::Acquire), SlotState::Empty);
        }
    }

    #[test]
    fn test_zeroed_array_rejects_zero_length() {
        let err = ZeroedArray::<AtomicSlot>::new_in(&SystemPageSource, 0).unwrap_err();
        assert!(matches!(err, PageSourceError::InvalidLayout { .. }));
    }

    #[test]
    fn test_zeroed_array_rejects_overflow() {
        let err = ZeroedArray::<AtomicSlot>::new_in(&SystemPageSource, usize::MAX).unwrap_err();
        assert!(matches!(err, PageSourceError::InvalidLayout { .. }));
    }
}
