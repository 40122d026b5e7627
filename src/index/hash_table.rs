//! Concurrent fingerprint hash table
//!
//! Open addressing with linear probing over `2^bit_width` entries. Keys are
//! committed with a single 128-bit compare-and-swap; the winner bumps
//! `entry_count`, appends the key to the insertion-ordered key list and then
//! publishes the payload. Losers for the same key spin on the payload slot.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use rand::Rng;

use crate::allocator::{PageSource, SystemPageSource, ZeroedArray};
use crate::fingerprint::Fingerprint;
use crate::index::entry::{AtomicFingerprint, TableEntry};
use crate::slot::{Claim, PendingSlot, Payload, SlotState, SpinPolicy};
use crate::stats::{OperationStats, TableStats};
use crate::status::{IndexError, Result};

/// Configuration for a fingerprint table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    /// Capacity is `2^bit_width` entries
    pub bit_width: u32,
    /// Buckets visited before reporting `TableFull` (`None` = capacity)
    pub probe_limit: Option<u64>,
    /// Waiting policy for entries claimed but not yet published
    pub spin: SpinPolicy,
}

impl TableConfig {
    /// Smallest supported bit width
    pub const MIN_BIT_WIDTH: u32 = 1;
    /// Largest supported bit width
    pub const MAX_BIT_WIDTH: u32 = 32;

    /// Create a configuration for `2^bit_width` entries
    pub fn new(bit_width: u32) -> Self {
        Self {
            bit_width,
            probe_limit: None,
            spin: SpinPolicy::default(),
        }
    }

    /// Set the probe limit
    pub fn with_probe_limit(mut self, probe_limit: u64) -> Self {
        self.probe_limit = Some(probe_limit);
        self
    }

    /// Set the spin policy
    pub fn with_spin(mut self, spin: SpinPolicy) -> Self {
        self.spin = spin;
        self
    }

    /// Capacity in entries
    pub fn capacity(&self) -> u64 {
        1u64 << self.bit_width
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if !(Self::MIN_BIT_WIDTH..=Self::MAX_BIT_WIDTH).contains(&self.bit_width) {
            return Err(IndexError::InvalidBitWidth {
                bit_width: self.bit_width,
                min: Self::MIN_BIT_WIDTH,
                max: Self::MAX_BIT_WIDTH,
            });
        }
        if self.probe_limit == Some(0) {
            return Err(IndexError::InvalidConfig(
                "table probe_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self::new(20) // 1M entries
    }
}

/// Lock-free table from fingerprints to payloads
///
/// Fixed capacity: the table never grows, and probing stops with
/// [`IndexError::TableFull`] after `probe_limit` buckets. Size it with headroom
/// above the expected number of distinct fingerprints.
pub struct FingerprintTable {
    /// Entry array
    entries: ZeroedArray<TableEntry>,
    /// Keys in commit order; slot `i` holds the `i`-th committed key
    key_list: ZeroedArray<AtomicFingerprint>,
    /// Committed entries
    entry_count: CachePadded<AtomicU64>,
    bit_width: u32,
    /// `capacity - 1`
    mask: u64,
    probe_limit: u64,
    spin: SpinPolicy,
    /// Entry count that triggers the one-shot high load warning
    load_warn_threshold: u64,
    load_warned: AtomicBool,
    stats: OperationStats,
}

impl FingerprintTable {
    /// Load factor above which a warning is logged once
    pub const HIGH_LOAD_FACTOR: f64 = 0.9;

    /// Create a table with `2^bit_width` entries and default settings
    pub fn new(bit_width: u32) -> Result<Self> {
        Self::with_config(TableConfig::new(bit_width))
    }

    /// Create a table from a configuration, allocating from the system allocator
    pub fn with_config(config: TableConfig) -> Result<Self> {
        Self::with_page_source(config, Arc::new(SystemPageSource::new()))
    }

    /// Create a table from a configuration, allocating from `source`
    pub fn with_page_source(config: TableConfig, source: Arc<dyn PageSource>) -> Result<Self> {
        config.validate()?;

        let capacity = config.capacity();
        let len = usize::try_from(capacity).map_err(|_| {
            IndexError::InvalidConfig(format!("capacity {capacity} exceeds the address space"))
        })?;

        let entries = ZeroedArray::<TableEntry>::new_in(source.as_ref(), len)?;
        let key_list = ZeroedArray::<AtomicFingerprint>::new_in(source.as_ref(), len)?;

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                bit_width = config.bit_width,
                capacity,
                bytes = entries.byte_size() + key_list.byte_size(),
                "fingerprint table created"
            );
        }

        Ok(Self {
            entries,
            key_list,
            entry_count: CachePadded::new(AtomicU64::new(0)),
            bit_width: config.bit_width,
            mask: capacity - 1,
            probe_limit: config.probe_limit.unwrap_or(capacity).min(capacity),
            spin: config.spin,
            load_warn_threshold: ((capacity as f64) * Self::HIGH_LOAD_FACTOR).ceil() as u64,
            load_warned: AtomicBool::new(false),
            stats: OperationStats::new(),
        })
    }

    /// Find `key`, or claim a free entry for it
    ///
    /// Returns [`Claim::New`] to exactly one caller per key; that caller must
    /// publish the payload right away. Every other caller gets
    /// [`Claim::Existing`], after waiting for the winner's publish if needed.
    pub fn fetch_or_claim(&self, key: Fingerprint) -> Result<Claim<'_>> {
        let mut index = key.bucket_index(self.mask);

        for probe in 0..self.probe_limit {
            let entry = &self.entries[index];

            let occupant = match entry.key.load_raw(Ordering::Acquire) {
                0 => match entry.key.claim(key) {
                    Ok(()) => {
                        self.commit(key);
                        self.stats.record_probes(probe);
                        self.stats.record_claim();
                        return Ok(Claim::New(PendingSlot::new(&entry.payload)));
                    }
                    // Lost the race; the winner may have been inserting this same key.
                    Err(occupant) => occupant,
                },
                occupant => occupant,
            };

            if occupant == key.get() {
                self.stats.record_probes(probe);
                return self.await_payload(entry).map(Claim::Existing);
            }

            index = (index + 1) & self.mask as usize;
        }

        tracing::warn!(
            capacity = self.capacity(),
            entries = self.len(),
            probe_limit = self.probe_limit,
            "fingerprint table full"
        );
        Err(IndexError::TableFull {
            capacity: self.capacity(),
            probe_limit: self.probe_limit,
        })
    }

    /// Look `key` up without claiming
    ///
    /// Waits for the payload if the key is committed but not yet published.
    pub fn get(&self, key: Fingerprint) -> Result<Option<Payload>> {
        let mut index = key.bucket_index(self.mask);

        for _ in 0..self.probe_limit {
            let entry = &self.entries[index];
            match entry.key.load_raw(Ordering::Acquire) {
                0 => return Ok(None),
                occupant if occupant == key.get() => return self.await_payload(entry).map(Some),
                _ => index = (index + 1) & self.mask as usize,
            }
        }
        Ok(None)
    }

    /// Sample the payload of a uniformly chosen committed entry
    ///
    /// Returns `Ok(None)` when the table is empty, or when the chosen key-list
    /// slot has been counted but not yet written by its committer. Retrying is
    /// up to the caller.
    pub fn random_entry<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Option<Payload>> {
        let count = self.entry_count.load(Ordering::Acquire);
        if count == 0 {
            self.stats.record_sample(false);
            return Ok(None);
        }

        let slot = rng.gen_range(0..count) as usize;
        let Some(key) = self.key_list[slot].load(Ordering::Acquire) else {
            self.stats.record_sample(false);
            return Ok(None);
        };

        match self.get(key)? {
            Some(payload) => {
                self.stats.record_sample(true);
                Ok(Some(payload))
            }
            None => Err(IndexError::Invariant(
                "key list names a fingerprint missing from the table",
            )),
        }
    }

    /// Committed keys in commit order
    ///
    /// Key-list slots that are counted but not yet written are skipped.
    pub fn keys(&self) -> Vec<Fingerprint> {
        let count = self.len() as usize;
        self.key_list[..count]
            .iter()
            .filter_map(|key| key.load(Ordering::Acquire))
            .collect()
    }

    /// Number of committed entries
    #[inline]
    pub fn len(&self) -> u64 {
        self.entry_count.load(Ordering::Acquire)
    }

    /// Check if no entry has been committed
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries the table can hold
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.mask + 1
    }

    /// Bit width the table was created with
    #[inline]
    pub fn bit_width(&self) -> u32 {
        self.bit_width
    }

    /// Buckets visited before reporting `TableFull`
    #[inline]
    pub fn probe_limit(&self) -> u64 {
        self.probe_limit
    }

    /// Committed entries over capacity
    pub fn load_factor(&self) -> f64 {
        self.len() as f64 / self.capacity() as f64
    }

    /// Take a statistics snapshot
    pub fn stats(&self) -> TableStats {
        TableStats {
            capacity: self.capacity(),
            entries: self.len(),
            load_factor: self.load_factor(),
            operations: self.stats.snapshot(),
        }
    }

    /// Account for a key whose CAS just succeeded
    fn commit(&self, key: Fingerprint) {
        let slot = self.entry_count.fetch_add(1, Ordering::AcqRel);
        // Every committed key owns a distinct entry, so `slot < capacity`.
        self.key_list[slot as usize].store(key, Ordering::Release);

        if slot + 1 >= self.load_warn_threshold && !self.load_warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                entries = slot + 1,
                capacity = self.capacity(),
                "fingerprint table above {:.0}% load",
                Self::HIGH_LOAD_FACTOR * 100.0
            );
        }
    }

    fn await_payload(&self, entry: &TableEntry) -> Result<Payload> {
        let payload = match entry.payload.load(Ordering::Acquire) {
            SlotState::Populated(payload) => {
                self.stats.record_existing(false);
                return Ok(payload);
            }
            _ => entry.payload.wait_populated(&self.spin)?,
        };
        self.stats.record_existing(true);
        Ok(payload)
    }
}

impl std::fmt::Debug for FingerprintTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintTable")
            .field("bit_width", &self.bit_width)
            .field("entries", &self.len())
            .field("probe_limit", &self.probe_limit)
            .finish()
    }
}
