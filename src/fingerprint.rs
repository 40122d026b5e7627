//! Fingerprint keys
//!
//! A fingerprint is a pre-hashed 128-bit observation (code, register or memory
//! coverage event). The all-zero pattern marks an empty slot in every table of
//! this crate, so it is not a valid fingerprint.

use std::fmt;
use std::num::NonZeroU128;

use crate::status::IndexError;

/// A nonzero 128-bit fingerprint.
///
/// Equality is bitwise. Bits are consumed least significant first: the hash
/// table indexes buckets with the low bits and the trie walks the low 64 bits
/// before moving on to the high 64 bits.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(NonZeroU128);

impl Fingerprint {
    /// Create a fingerprint, returning `None` for the reserved zero value
    #[inline]
    pub const fn new(raw: u128) -> Option<Self> {
        match NonZeroU128::new(raw) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Create a fingerprint from its low and high 64-bit halves
    #[inline]
    pub const fn from_halves(low: u64, high: u64) -> Option<Self> {
        Self::new(((high as u128) << 64) | low as u128)
    }

    /// Get the raw 128-bit value
    #[inline]
    pub const fn get(&self) -> u128 {
        self.0.get()
    }

    /// Low 64 bits
    #[inline]
    pub const fn low(&self) -> u64 {
        self.0.get() as u64
    }

    /// High 64 bits
    #[inline]
    pub const fn high(&self) -> u64 {
        (self.0.get() >> 64) as u64
    }

    /// Bucket index for a table whose capacity mask is `mask` (capacity - 1)
    #[inline]
    pub const fn bucket_index(&self, mask: u64) -> usize {
        (self.low() & mask) as usize
    }
}

impl TryFrom<u128> for Fingerprint {
    type Error = IndexError;

    fn try_from(raw: u128) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or(IndexError::ZeroFingerprint)
    }
}

impl From<Fingerprint> for u128 {
    #[inline]
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.get()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:#034x})", self.get())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.get())
    }
}

impl fmt::LowerHex for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.get(), f)
    }
}
