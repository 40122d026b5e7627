//! Statistics for tables and tries
//!
//! Operation counters are plain relaxed atomics. They are compiled in with the
//! `stats` feature (on by default); without it every `record_*` call is a
//! no-op and snapshots read zero.

pub mod metrics;

pub use metrics::{OperationStats, OperationStatsSnapshot, TableStats, TrieStats};
