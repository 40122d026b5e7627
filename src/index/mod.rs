//! Fingerprint hash table
//!
//! This module provides the open-addressed table used to deduplicate
//! fingerprints and to sample previously seen ones.

mod entry;
mod hash_table;

pub use entry::{AtomicFingerprint, TableEntry};
pub use hash_table::{FingerprintTable, TableConfig};
