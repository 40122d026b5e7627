//! Error codes for table and trie operations
//!
//! Transient sampling misses are not errors: sampling returns `Ok(None)` and
//! leaves the retry to the caller.

use std::time::Duration;

use crate::allocator::PageSourceError;

/// Errors returned by `FingerprintTable` and `LookupTrie` operations
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Table bit width outside the supported range
    #[error("invalid table bit width {bit_width} (supported: {min}..={max})")]
    InvalidBitWidth {
        /// Requested bit width
        bit_width: u32,
        /// Smallest supported bit width
        min: u32,
        /// Largest supported bit width
        max: u32,
    },
    /// Trie bin width outside the supported range
    #[error("invalid trie bin width {bin_bits} (supported: {min}..={max})")]
    InvalidBinBits {
        /// Requested bin width
        bin_bits: u32,
        /// Smallest supported bin width
        min: u32,
        /// Largest supported bin width
        max: u32,
    },
    /// Other invalid construction parameter
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The all-zero fingerprint is reserved for empty slots
    #[error("the zero fingerprint is reserved")]
    ZeroFingerprint,
    /// Linear probing visited `probe_limit` buckets without a free or matching one
    #[error("fingerprint table is full (capacity {capacity}, probe limit {probe_limit})")]
    TableFull {
        /// Table capacity
        capacity: u64,
        /// Number of buckets probed before giving up
        probe_limit: u64,
    },
    /// The trie level arena has handed out all of its levels
    #[error("trie level arena exhausted ({max_levels} levels)")]
    ArenaExhausted {
        /// Arena capacity in levels
        max_levels: u64,
    },
    /// A claimed slot was not published within the spin policy's stall timeout
    #[error("claimed slot not published after {waited:?}")]
    ClaimStalled {
        /// Time spent waiting
        waited: Duration,
    },
    /// The page source could not supply memory
    #[error("page source failure: {0}")]
    PageSource(#[from] PageSourceError),
    /// Internal invariant violation
    #[error("invariant violated: {0}")]
    Invariant(&'static str),
}

impl IndexError {
    /// Check if the error reflects a capacity decision made at creation time
    #[inline]
    pub const fn is_capacity(&self) -> bool {
        matches!(
            self,
            IndexError::TableFull { .. } | IndexError::ArenaExhausted { .. }
        )
    }

    /// Check if the error comes from an invalid construction parameter
    #[inline]
    pub const fn is_config(&self) -> bool {
        matches!(
            self,
            IndexError::InvalidBitWidth { .. }
                | IndexError::InvalidBinBits { .. }
                | IndexError::InvalidConfig(_)
        )
    }
}

/// Result alias used throughout the crate
pub type Result<T, E = IndexError> = std::result::Result<T, E>;
