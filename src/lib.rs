//! oxicov - Lock-free fingerprint deduplication for parallel fuzzing
//!
//! Execution workers observe coverage events as pre-hashed 128-bit
//! fingerprints, tens of billions per second across all threads. This crate
//! provides the two structures that deduplicate and sample them:
//!
//! - **`FingerprintTable`**: a fixed-capacity, open-addressed hash table with
//!   lock-free fetch-or-claim and uniform sampling of committed entries
//! - **`LookupTrie`**: a sparse fixed-radix trie with lazily allocated,
//!   pointer-stable levels and random leaf sampling
//!
//! # Features
//!
//! - Exactly one thread wins the claim for a new fingerprint; every other
//!   thread sees the existing payload or spins until the winner publishes it
//! - No locks on any operation path
//! - Memory comes from an injected [`PageSource`](allocator::PageSource)
//!
//! # Quick Start
//!
//! ```rust
//! use oxicov::{Claim, Fingerprint, FingerprintTable, Payload};
//!
//! let table = FingerprintTable::new(16)?;
//! let key = Fingerprint::new(0x5eed_f00d).unwrap();
//!
//! match table.fetch_or_claim(key)? {
//!     Claim::New(pending) => pending.publish(Payload::new(1).unwrap()),
//!     Claim::Existing(payload) => println!("seen before: {payload}"),
//! }
//!
//! let mut rng = rand::thread_rng();
//! assert_eq!(table.random_entry(&mut rng)?, Payload::new(1));
//! # Ok::<(), oxicov::IndexError>(())
//! ```

#![warn(missing_docs)]

pub mod allocator;
pub mod config;
pub mod fingerprint;
pub mod index;
pub mod slot;
pub mod stats;
pub mod status;
pub mod trie;
mod utility;

// Re-exports for convenience
pub use fingerprint::Fingerprint;
pub use index::{FingerprintTable, TableConfig};
pub use slot::{Claim, Payload, PendingSlot, SlotState, SpinPolicy};
pub use status::IndexError;
pub use trie::{LookupTrie, TrieConfig};
pub use utility::{AlignedBuffer, ReleaseFn};

/// Constants used throughout the library
pub mod constants {
    /// Size of a cache line in bytes
    pub const CACHE_LINE_BYTES: usize = 64;
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::allocator::{PageSource, SystemPageSource};
    pub use crate::fingerprint::Fingerprint;
    pub use crate::index::{FingerprintTable, TableConfig};
    pub use crate::slot::{Claim, Payload, SpinPolicy};
    pub use crate::status::IndexError;
    pub use crate::trie::{LookupTrie, TrieConfig};
}
