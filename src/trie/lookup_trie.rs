use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use rand::Rng;

use crate::allocator::{PageSource, SystemPageSource};
use crate::fingerprint::Fingerprint;
use crate::slot::{AtomicSlot, Claim, PendingSlot, Payload, SlotState, SpinPolicy};
use crate::stats::{OperationStats, TrieStats};
use crate::status::{IndexError, Result};
use crate::trie::level_arena::{LevelArena, LevelId};

/// Root level id; allocated first by every trie
const ROOT: LevelId = 0;

/// Configuration for a lookup trie
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrieConfig {
    /// Key bits consumed per level; each level has `2^bin_bits` slots
    pub bin_bits: u32,
    /// Arena capacity in levels, root included (`None` = as many as the
    /// level directory can address)
    pub max_levels: Option<u64>,
    /// Levels carved out of one page-source allocation
    pub levels_per_page: usize,
    /// Waiting policy for slots claimed but not yet published
    pub spin: SpinPolicy,
}

impl TrieConfig {
    /// Smallest supported bin width
    pub const MIN_BIN_BITS: u32 = 1;
    /// Largest supported bin width
    pub const MAX_BIN_BITS: u32 = 16;

    /// Create a configuration with `bin_bits` bits per level
    pub fn new(bin_bits: u32) -> Self {
        Self {
            bin_bits,
            ..Self::default()
        }
    }

    /// Set the arena capacity
    pub fn with_max_levels(mut self, max_levels: u64) -> Self {
        self.max_levels = Some(max_levels);
        self
    }

    /// Set the number of levels per page
    pub fn with_levels_per_page(mut self, levels_per_page: usize) -> Self {
        self.levels_per_page = levels_per_page;
        self
    }

    /// Set the spin policy
    pub fn with_spin(mut self, spin: SpinPolicy) -> Self {
        self.spin = spin;
        self
    }

    /// Number of levels a key walks through: `ceil(128 / bin_bits)`
    pub fn depth(&self) -> u32 {
        128u32.div_ceil(self.bin_bits.max(1))
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if !(Self::MIN_BIN_BITS..=Self::MAX_BIN_BITS).contains(&self.bin_bits) {
            return Err(IndexError::InvalidBinBits {
                bin_bits: self.bin_bits,
                min: Self::MIN_BIN_BITS,
                max: Self::MAX_BIN_BITS,
            });
        }
        if self.levels_per_page == 0 {
            return Err(IndexError::InvalidConfig(
                "trie levels_per_page must be at least 1".to_string(),
            ));
        }
        if let Some(max_levels) = self.max_levels {
            if max_levels < self.depth() as u64 {
                return Err(IndexError::InvalidConfig(format!(
                    "trie max_levels {max_levels} cannot hold a single key path of {} levels",
                    self.depth()
                )));
            }
        }
        Ok(())
    }
}

impl Default for TrieConfig {
    fn default() -> Self {
        Self {
            bin_bits: 2,
            max_levels: None,
            levels_per_page: 256,
            spin: SpinPolicy::default(),
        }
    }
}

/// Sparse fixed-radix trie from fingerprints to payloads
///
/// A key walks `ceil(128 / bin_bits)` levels, using `bin_bits` key bits per
/// level, least significant first. Interior slots hold the id of the next
/// level; last-level slots hold the leaf payload. Levels are allocated lazily
/// by whichever thread links them into the parent slot, and are never moved
/// or freed while the trie lives.
pub struct LookupTrie {
    arena: LevelArena,
    bin_bits: u32,
    bins: usize,
    bin_mask: u128,
    depth: u32,
    spin: SpinPolicy,
    /// Levels reachable from the root, root included
    linked: CachePadded<AtomicU64>,
    leaves: CachePadded<AtomicU64>,
    stats: OperationStats,
}

impl LookupTrie {
    /// Create a trie with `bin_bits` bits per level and default settings
    pub fn new(bin_bits: u32) -> Result<Self> {
        Self::with_config(TrieConfig::new(bin_bits))
    }

    /// Create a trie from a configuration, allocating from the system allocator
    pub fn with_config(config: TrieConfig) -> Result<Self> {
        Self::with_page_source(config, Arc::new(SystemPageSource::new()))
    }

    /// Create a trie from a configuration, allocating from `source`
    pub fn with_page_source(config: TrieConfig, source: Arc<dyn PageSource>) -> Result<Self> {
        config.validate()?;

        let bins = 1usize << config.bin_bits;
        let arena = LevelArena::new(bins, config.levels_per_page, config.max_levels, source)?;
        let root = arena.alloc_level()?;
        debug_assert_eq!(root, ROOT);

        tracing::debug!(
            bin_bits = config.bin_bits,
            depth = config.depth(),
            max_levels = arena.max_levels(),
            levels_per_page = config.levels_per_page,
            "lookup trie created"
        );

        Ok(Self {
            arena,
            bin_bits: config.bin_bits,
            bins,
            bin_mask: (bins - 1) as u128,
            depth: config.depth(),
            spin: config.spin,
            linked: CachePadded::new(AtomicU64::new(1)),
            leaves: CachePadded::new(AtomicU64::new(0)),
            stats: OperationStats::new(),
        })
    }

    /// Find `key`, or claim its leaf
    ///
    /// Interior levels missing on the way are reserved from the arena before
    /// the parent slot is raced for, and linked with a single compare-and-swap,
    /// so a failed allocation never leaves a slot behind that other threads
    /// would wait on. A reservation that loses the race is carried to the next
    /// level and handed back to the arena if the walk does not use it.
    ///
    /// Returns [`Claim::New`] to exactly one caller per key, which must publish
    /// the leaf payload right away.
    pub fn fetch_or_claim(&self, key: Fingerprint) -> Result<Claim<'_>> {
        let mut spare = None;
        let claim = self.walk_or_claim(key, &mut spare);
        if let Some(id) = spare {
            self.arena.release_level(id);
        }
        claim
    }

    fn walk_or_claim(&self, key: Fingerprint, spare: &mut Option<LevelId>) -> Result<Claim<'_>> {
        let last = self.depth - 1;
        let mut level = self.arena.level(ROOT)?;
        let mut waited = false;

        for depth in 0..last {
            let slot = &level[self.bin(key.get(), depth)];

            let next = match slot.load(Ordering::Acquire) {
                SlotState::Populated(next) => next,
                SlotState::Claimed => {
                    waited = true;
                    slot.wait_populated(&self.spin)?
                }
                SlotState::Empty => {
                    let child = match spare.take() {
                        Some(id) => id,
                        None => self.arena.alloc_level()?,
                    };
                    *spare = Some(child);
                    let link = Payload::new(child)
                        .ok_or(IndexError::Invariant("level id exceeds payload range"))?;

                    match slot.try_populate(link) {
                        Ok(()) => {
                            *spare = None;
                            self.linked.fetch_add(1, Ordering::Relaxed);
                            link
                        }
                        Err(SlotState::Populated(next)) => next,
                        Err(SlotState::Claimed) => {
                            waited = true;
                            slot.wait_populated(&self.spin)?
                        }
                        Err(SlotState::Empty) => {
                            return Err(IndexError::Invariant("slot link failed on an empty slot"))
                        }
                    }
                }
            };
            level = self.arena.level(next.get())?;
        }

        let leaf = &level[self.bin(key.get(), last)];
        let payload = match leaf.try_claim() {
            Ok(()) => {
                self.leaves.fetch_add(1, Ordering::Relaxed);
                self.stats.record_claim();
                return Ok(Claim::New(PendingSlot::new(leaf)));
            }
            Err(SlotState::Populated(payload)) => payload,
            Err(SlotState::Claimed) => {
                waited = true;
                leaf.wait_populated(&self.spin)?
            }
            Err(SlotState::Empty) => {
                return Err(IndexError::Invariant("slot claim failed on an empty slot"))
            }
        };
        self.stats.record_existing(waited);
        Ok(Claim::Existing(payload))
    }

    /// Look `key` up without claiming anything
    pub fn get(&self, key: Fingerprint) -> Result<Option<Payload>> {
        let mut level = self.arena.level(ROOT)?;
        for depth in 0..self.depth {
            let next = match self.resolve(&level[self.bin(key.get(), depth)])? {
                Some(next) => next,
                None => return Ok(None),
            };
            if depth == self.depth - 1 {
                return Ok(Some(next));
            }
            level = self.arena.level(next.get())?;
        }
        Ok(None)
    }

    /// Slot contents along the path of `key`
    ///
    /// Entry `d` is what the depth-`d` slot holds: a level id for interior
    /// levels, the leaf payload for the last one. The walk stops at the first
    /// empty slot, so a fully inserted key yields `depth()` entries.
    pub fn path(&self, key: Fingerprint) -> Result<Vec<Payload>> {
        let mut path = Vec::with_capacity(self.depth as usize);
        let mut level = self.arena.level(ROOT)?;
        for depth in 0..self.depth {
            let Some(next) = self.resolve(&level[self.bin(key.get(), depth)])? else {
                break;
            };
            path.push(next);
            if depth + 1 < self.depth {
                level = self.arena.level(next.get())?;
            }
        }
        Ok(path)
    }

    /// Sample a populated leaf
    ///
    /// Draws a random 128-bit word; at every level the scan starts at the
    /// word's bits for that level and moves forward (wrapping) to the first
    /// populated slot. Returns `Ok(None)` when the root has no populated slot
    /// (empty trie) or a deeper level has none yet (a concurrent insert is
    /// still linking it). Claimed slots are skipped, never returned.
    pub fn random_leaf<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Option<Payload>> {
        let bits: u128 = rng.gen();
        let mut level = self.arena.level(ROOT)?;

        for depth in 0..self.depth {
            let start = self.bin(bits, depth);
            let found = (0..self.bins)
                .map(|offset| &level[(start + offset) & (self.bins - 1)])
                .find_map(|slot| slot.load(Ordering::Acquire).payload());

            let Some(next) = found else {
                self.stats.record_sample(false);
                return Ok(None);
            };
            if depth == self.depth - 1 {
                self.stats.record_sample(true);
                return Ok(Some(next));
            }
            level = self.arena.level(next.get())?;
        }

        self.stats.record_sample(false);
        Ok(None)
    }

    /// Key bits consumed per level
    #[inline]
    pub fn bin_bits(&self) -> u32 {
        self.bin_bits
    }

    /// Number of levels a key walks through
    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Levels linked into the trie so far, root included
    #[inline]
    pub fn levels_allocated(&self) -> u64 {
        self.linked.load(Ordering::Relaxed)
    }

    /// Levels handed out by the arena, including reservations not linked yet
    #[inline]
    pub fn levels_reserved(&self) -> u64 {
        self.arena.allocated()
    }

    /// Leaves claimed so far
    #[inline]
    pub fn leaf_count(&self) -> u64 {
        self.leaves.load(Ordering::Relaxed)
    }

    /// Check if no leaf has been claimed
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.leaf_count() == 0
    }

    /// Take a statistics snapshot
    pub fn stats(&self) -> TrieStats {
        TrieStats {
            bin_bits: self.bin_bits,
            depth: self.depth,
            levels_allocated: self.levels_allocated(),
            max_levels: self.arena.max_levels(),
            leaves: self.leaf_count(),
            operations: self.stats.snapshot(),
        }
    }

    #[inline]
    fn bin(&self, bits: u128, depth: u32) -> usize {
        ((bits >> (depth * self.bin_bits)) & self.bin_mask) as usize
    }

    /// Read a slot for lookup, waiting out a pending claim
    fn resolve(&self, slot: &AtomicSlot) -> Result<Option<Payload>> {
        match slot.load(Ordering::Acquire) {
            SlotState::Empty => Ok(None),
            SlotState::Claimed => slot.wait_populated(&self.spin).map(Some),
            SlotState::Populated(next) => Ok(Some(next)),
        }
    }
}

impl std::fmt::Debug for LookupTrie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupTrie")
            .field("bin_bits", &self.bin_bits)
            .field("depth", &self.depth)
            .field("levels_allocated", &self.levels_allocated())
            .field("leaves", &self.leaf_count())
            .finish()
    }
}
