//! Statistics metrics definitions

use std::fmt;
#[cfg(feature = "stats")]
use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters shared by a table or trie
#[derive(Debug, Default)]
pub struct OperationStats {
    /// Claims won (new keys)
    #[cfg(feature = "stats")]
    claims_won: AtomicU64,
    /// Lookups that found an existing key
    #[cfg(feature = "stats")]
    existing_hits: AtomicU64,
    /// Lookups that had to wait on a claimed slot
    #[cfg(feature = "stats")]
    claim_waits: AtomicU64,
    /// Extra buckets visited by linear probing
    #[cfg(feature = "stats")]
    probe_steps: AtomicU64,
    /// Sampling calls that returned a payload
    #[cfg(feature = "stats")]
    sample_hits: AtomicU64,
    /// Sampling calls that returned nothing
    #[cfg(feature = "stats")]
    sample_misses: AtomicU64,
}

impl OperationStats {
    /// Create new operation stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a won claim
    #[inline]
    pub fn record_claim(&self) {
        #[cfg(feature = "stats")]
        self.claims_won.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a hit on an existing key
    #[inline]
    pub fn record_existing(&self, waited: bool) {
        #[cfg(feature = "stats")]
        {
            self.existing_hits.fetch_add(1, Ordering::Relaxed);
            if waited {
                self.claim_waits.fetch_add(1, Ordering::Relaxed);
            }
        }
        #[cfg(not(feature = "stats"))]
        let _ = waited;
    }

    /// Record probe steps beyond the home bucket
    #[inline]
    pub fn record_probes(&self, steps: u64) {
        #[cfg(feature = "stats")]
        {
            if steps > 0 {
                self.probe_steps.fetch_add(steps, Ordering::Relaxed);
            }
        }
        #[cfg(not(feature = "stats"))]
        let _ = steps;
    }

    /// Record a sampling call
    #[inline]
    pub fn record_sample(&self, hit: bool) {
        #[cfg(feature = "stats")]
        {
            if hit {
                self.sample_hits.fetch_add(1, Ordering::Relaxed);
            } else {
                self.sample_misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        #[cfg(not(feature = "stats"))]
        let _ = hit;
    }

    /// Take a snapshot of the counters
    pub fn snapshot(&self) -> OperationStatsSnapshot {
        #[cfg(feature = "stats")]
        {
            OperationStatsSnapshot {
                claims_won: self.claims_won.load(Ordering::Relaxed),
                existing_hits: self.existing_hits.load(Ordering::Relaxed),
                claim_waits: self.claim_waits.load(Ordering::Relaxed),
                probe_steps: self.probe_steps.load(Ordering::Relaxed),
                sample_hits: self.sample_hits.load(Ordering::Relaxed),
                sample_misses: self.sample_misses.load(Ordering::Relaxed),
            }
        }
        #[cfg(not(feature = "stats"))]
        {
            OperationStatsSnapshot::default()
        }
    }
}

/// Point-in-time copy of [`OperationStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationStatsSnapshot {
    /// Claims won (new keys)
    pub claims_won: u64,
    /// Lookups that found an existing key
    pub existing_hits: u64,
    /// Lookups that had to wait on a claimed slot
    pub claim_waits: u64,
    /// Extra buckets visited by linear probing
    pub probe_steps: u64,
    /// Sampling calls that returned a payload
    pub sample_hits: u64,
    /// Sampling calls that returned nothing
    pub sample_misses: u64,
}

impl OperationStatsSnapshot {
    /// Fraction of sampling calls that returned a payload
    pub fn sample_hit_rate(&self) -> f64 {
        let total = self.sample_hits + self.sample_misses;
        if total == 0 {
            0.0
        } else {
            self.sample_hits as f64 / total as f64
        }
    }
}

impl fmt::Display for OperationStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  claims won:     {}", self.claims_won)?;
        writeln!(f, "  existing hits:  {}", self.existing_hits)?;
        writeln!(f, "  claim waits:    {}", self.claim_waits)?;
        writeln!(f, "  probe steps:    {}", self.probe_steps)?;
        write!(
            f,
            "  samples:        {} hit / {} miss ({:.1}%)",
            self.sample_hits,
            self.sample_misses,
            self.sample_hit_rate() * 100.0
        )
    }
}

/// Statistics for a `FingerprintTable`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableStats {
    /// Number of buckets
    pub capacity: u64,
    /// Committed entries
    pub entries: u64,
    /// `entries / capacity`
    pub load_factor: f64,
    /// Operation counters
    pub operations: OperationStatsSnapshot,
}

impl fmt::Display for TableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Fingerprint table: {}/{} entries ({:.1}% full)",
            self.entries,
            self.capacity,
            self.load_factor * 100.0
        )?;
        write!(f, "{}", self.operations)
    }
}

/// Statistics for a `LookupTrie`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrieStats {
    /// Key bits consumed per level
    pub bin_bits: u32,
    /// Number of levels
    pub depth: u32,
    /// Level arrays handed out, including the root
    pub levels_allocated: u64,
    /// Arena capacity in levels
    pub max_levels: u64,
    /// Leaves claimed
    pub leaves: u64,
    /// Operation counters
    pub operations: OperationStatsSnapshot,
}

impl fmt::Display for TrieStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Lookup trie: {} leaves, {}/{} levels (bin bits {}, depth {})",
            self.leaves, self.levels_allocated, self.max_levels, self.bin_bits, self.depth
        )?;
        write!(f, "{}", self.operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "stats")]
    #[test]
    fn test_operation_stats_counts() {
        let stats = OperationStats::new();
        stats.record_claim();
        stats.record_existing(false);
        stats.record_existing(true);
        stats.record_probes(0);
        stats.record_probes(3);
        stats.record_sample(true);
        stats.record_sample(false);
        stats.record_sample(true);

        let snap = stats.snapshot();
        assert_eq!(snap.claims_won, 1);
        assert_eq!(snap.existing_hits, 2);
        assert_eq!(snap.claim_waits, 1);
        assert_eq!(snap.probe_steps, 3);
        assert_eq!(snap.sample_hits, 2);
        assert_eq!(snap.sample_misses, 1);
        assert!((snap.sample_hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_display() {
        let snap = OperationStatsSnapshot {
            claims_won: 4,
            sample_hits: 1,
            sample_misses: 1,
            ..Default::default()
        };
        let text = snap.to_string();
        assert!(text.contains("claims won:     4"));
        assert!(text.contains("(50.0%)"));

        assert_eq!(OperationStatsSnapshot::default().sample_hit_rate(), 0.0);
    }
}
