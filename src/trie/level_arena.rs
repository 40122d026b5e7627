//! Arena of trie levels
//!
//! Levels are handed out by a lock-free bump counter. Each page holds
//! `levels_per_page` consecutive levels and is allocated from the page source
//! by the first thread that needs it. Pages are reached through a two-level
//! directory: a fixed top directory of chunk pointers, each chunk holding
//! `CHUNK_PAGES` page pointers. Chunks and pages are installed with a
//! compare-and-swap; a thread that loses an install drops what it built.
//! Levels are addressed by id, never by pointer, and pages stay put until the
//! arena is dropped.
//!
//! A level that was handed out but never linked into the trie is still all
//! zero. It goes back to the spare queue and is handed out again before the
//! bump counter moves.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use crossbeam::utils::CachePadded;

use crate::allocator::{PageSource, ZeroedArray};
use crate::slot::{AtomicSlot, Payload};
use crate::status::{IndexError, Result};

type LevelPage = ZeroedArray<AtomicSlot>;

/// Page pointers per directory chunk
const CHUNK_PAGES: usize = 1 << 12;
/// Chunk pointers in the top directory
const DIRECTORY_CHUNKS: usize = 1 << 12;

/// Identifier of a level inside a [`LevelArena`]
pub type LevelId = u64;

struct PageChunk {
    pages: Box<[AtomicPtr<LevelPage>]>,
}

impl PageChunk {
    fn new() -> Self {
        Self {
            pages: (0..CHUNK_PAGES)
                .map(|_| AtomicPtr::new(ptr::null_mut()))
                .collect(),
        }
    }
}

impl Drop for PageChunk {
    fn drop(&mut self) {
        for entry in self.pages.iter_mut() {
            let page = std::mem::replace(entry.get_mut(), ptr::null_mut());
            if !page.is_null() {
                // SAFETY: installed pages come from `Box::into_raw` and are freed once.
                drop(unsafe { Box::from_raw(page) });
            }
        }
    }
}

pub(crate) struct LevelArena {
    directory: Box<[AtomicPtr<PageChunk>]>,
    next: CachePadded<AtomicU64>,
    spares: SegQueue<LevelId>,
    slots_per_level: usize,
    levels_per_page: usize,
    max_levels: u64,
    source: Arc<dyn PageSource>,
}

impl LevelArena {
    /// Create an arena; `max_levels = None` is bounded only by what the
    /// directory can address.
    pub(crate) fn new(
        slots_per_level: usize,
        levels_per_page: usize,
        max_levels: Option<u64>,
        source: Arc<dyn PageSource>,
    ) -> Result<Self> {
        if slots_per_level == 0 || levels_per_page == 0 || max_levels == Some(0) {
            return Err(IndexError::InvalidConfig(
                "level arena dimensions must be non-zero".to_string(),
            ));
        }
        let addressable = ((CHUNK_PAGES * DIRECTORY_CHUNKS) as u64)
            .saturating_mul(levels_per_page as u64)
            .min(Payload::MAX);
        let max_levels = max_levels.map_or(addressable, |max| max.min(addressable));

        Ok(Self {
            directory: (0..DIRECTORY_CHUNKS)
                .map(|_| AtomicPtr::new(ptr::null_mut()))
                .collect(),
            next: CachePadded::new(AtomicU64::new(0)),
            spares: SegQueue::new(),
            slots_per_level,
            levels_per_page,
            max_levels,
            source,
        })
    }

    /// Hand out a zeroed level that nothing links to yet
    ///
    /// A failed page allocation puts the id back on the spare queue, so a
    /// later call retries the same page.
    pub(crate) fn alloc_level(&self) -> Result<LevelId> {
        let id = match self.spares.pop() {
            Some(id) => id,
            None => {
                let id = self.next.fetch_add(1, Ordering::Relaxed);
                if id >= self.max_levels {
                    return Err(IndexError::ArenaExhausted {
                        max_levels: self.max_levels,
                    });
                }
                id
            }
        };

        if let Err(err) = self.ensure_page(id / self.levels_per_page as u64) {
            self.spares.push(id);
            return Err(err);
        }
        Ok(id)
    }

    /// Return a level from `alloc_level` that was never linked or written
    pub(crate) fn release_level(&self, id: LevelId) {
        self.spares.push(id);
    }

    /// Slots of level `id`
    pub(crate) fn level(&self, id: LevelId) -> Result<&[AtomicSlot]> {
        let page_index = id / self.levels_per_page as u64;
        let page = self
            .page_entry(page_index)
            .map(|entry| entry.load(Ordering::Acquire))
            .filter(|page| !page.is_null())
            .ok_or(IndexError::Invariant("level id refers to an unallocated page"))?;

        // SAFETY: non-null page entries come from `Box::into_raw` in
        // `ensure_page` and are only freed in `Drop`, which needs `&mut self`.
        let page = unsafe { &*page };
        let start = (id % self.levels_per_page as u64) as usize * self.slots_per_level;
        Ok(&page[start..start + self.slots_per_level])
    }

    /// Ids handed out by the bump counter so far
    pub(crate) fn allocated(&self) -> u64 {
        self.next.load(Ordering::Relaxed).min(self.max_levels)
    }

    /// Most levels the arena will hand out
    pub(crate) fn max_levels(&self) -> u64 {
        self.max_levels
    }

    pub(crate) fn pages_installed(&self) -> usize {
        self.directory
            .iter()
            .map(|chunk| chunk.load(Ordering::Acquire))
            .filter(|chunk| !chunk.is_null())
            // SAFETY: installed chunks live until `Drop`.
            .map(|chunk| unsafe { &*chunk })
            .map(|chunk| {
                chunk
                    .pages
                    .iter()
                    .filter(|page| !page.load(Ordering::Acquire).is_null())
                    .count()
            })
            .sum()
    }

    /// Page-pointer cell for `page_index`, if its chunk is installed
    fn page_entry(&self, page_index: u64) -> Option<&AtomicPtr<LevelPage>> {
        let chunk_index = usize::try_from(page_index / CHUNK_PAGES as u64).ok()?;
        let chunk = self.directory.get(chunk_index)?.load(Ordering::Acquire);
        if chunk.is_null() {
            return None;
        }
        // SAFETY: installed chunks come from `Box::into_raw` and are only freed
        // in `Drop`.
        let chunk = unsafe { &*chunk };
        Some(&chunk.pages[(page_index % CHUNK_PAGES as u64) as usize])
    }

    fn ensure_chunk(&self, chunk_index: usize) -> Result<()> {
        let entry = self
            .directory
            .get(chunk_index)
            .ok_or(IndexError::Invariant("page index beyond the level directory"))?;
        if !entry.load(Ordering::Acquire).is_null() {
            return Ok(());
        }

        let fresh = Box::into_raw(Box::new(PageChunk::new()));
        if entry
            .compare_exchange(ptr::null_mut(), fresh, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // SAFETY: `fresh` was never published, this thread still owns it.
            drop(unsafe { Box::from_raw(fresh) });
        }
        Ok(())
    }

    fn ensure_page(&self, page_index: u64) -> Result<()> {
        let chunk_index = usize::try_from(page_index / CHUNK_PAGES as u64)
            .map_err(|_| IndexError::Invariant("page index beyond the level directory"))?;
        self.ensure_chunk(chunk_index)?;

        let entry = self
            .page_entry(page_index)
            .ok_or(IndexError::Invariant("level chunk missing after install"))?;
        if !entry.load(Ordering::Acquire).is_null() {
            return Ok(());
        }

        let page = LevelPage::new_in(
            self.source.as_ref(),
            self.levels_per_page * self.slots_per_level,
        )?;
        let bytes = page.byte_size();
        let fresh = Box::into_raw(Box::new(page));

        match entry.compare_exchange(ptr::null_mut(), fresh, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                tracing::trace!(page_index, bytes, "trie level page installed");
            }
            Err(_) => {
                // SAFETY: `fresh` was never published, this thread still owns it.
                drop(unsafe { Box::from_raw(fresh) });
            }
        }
        Ok(())
    }
}

impl Drop for LevelArena {
    fn drop(&mut self) {
        for entry in self.directory.iter_mut() {
            let chunk = std::mem::replace(entry.get_mut(), ptr::null_mut());
            if !chunk.is_null() {
                // SAFETY: installed chunks come from `Box::into_raw` and are freed once.
                drop(unsafe { Box::from_raw(chunk) });
            }
        }
    }
}
