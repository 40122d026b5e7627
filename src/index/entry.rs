//! Hash table entry layout
//!
//! Each entry pairs a 128-bit key word with a payload slot. The key word is
//! both the claim and the key: zero means empty, and the thread whose
//! compare-and-swap moves it from zero to its fingerprint owns the entry and
//! publishes the payload afterwards.

use std::fmt;
use std::sync::atomic::Ordering;

use bytemuck::Zeroable;
use portable_atomic::AtomicU128;

use crate::fingerprint::Fingerprint;
use crate::slot::AtomicSlot;

/// Atomic 128-bit fingerprint cell (zero = empty)
#[repr(transparent)]
pub struct AtomicFingerprint {
    raw: AtomicU128,
}

// SAFETY: `AtomicU128` has the same in-memory representation as `u128`, and
// zero is the empty key.
unsafe impl Zeroable for AtomicFingerprint {}

impl AtomicFingerprint {
    /// Create an empty cell
    #[inline]
    pub const fn empty() -> Self {
        Self {
            raw: AtomicU128::new(0),
        }
    }

    /// Load the raw key word (zero when empty)
    #[inline]
    pub fn load_raw(&self, ordering: Ordering) -> u128 {
        self.raw.load(ordering)
    }

    /// Load the key, `None` when empty
    #[inline]
    pub fn load(&self, ordering: Ordering) -> Option<Fingerprint> {
        Fingerprint::new(self.load_raw(ordering))
    }

    /// Store a key into a cell nobody else writes
    #[inline]
    pub fn store(&self, key: Fingerprint, ordering: Ordering) {
        self.raw.store(key.get(), ordering);
    }

    /// Install `key` if the cell is still empty, in a single 128-bit CAS
    ///
    /// On failure returns the raw key that occupies the cell.
    #[inline]
    pub fn claim(&self, key: Fingerprint) -> Result<(), u128> {
        self.raw
            .compare_exchange(0, key.get(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
    }
}

impl Default for AtomicFingerprint {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for AtomicFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicFingerprint")
            .field(&self.load(Ordering::Relaxed))
            .finish()
    }
}

/// Hash table entry
#[repr(C)]
#[derive(Debug, Default)]
pub struct TableEntry {
    /// Committed key, zero while the entry is free
    pub key: AtomicFingerprint,
    /// Payload, written once by the thread that committed `key`
    pub payload: AtomicSlot,
}

// SAFETY: both fields are `Zeroable`; `repr(C)` padding carries no invariant.
unsafe impl Zeroable for TableEntry {}
