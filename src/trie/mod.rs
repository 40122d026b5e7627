//! Sparse lookup trie
//!
//! A pointer-stable, allocation-lazy alternative to the hash table for sparse
//! 128-bit keys. Capacity is bounded by the level arena instead of a bucket
//! count.

mod level_arena;
mod lookup_trie;

pub use level_arena::LevelId;
pub use lookup_trie::{LookupTrie, TrieConfig};
