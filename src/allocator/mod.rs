//! Memory sources for tables and tries
//!
//! Every array in this crate (hash table entries, the insertion-ordered key
//! list, trie level pages) comes from a [`PageSource`] and is viewed through a
//! [`ZeroedArray`]. Arrays are zero-initialized on arrival, live until their
//! owning structure is dropped, and never move.
//!
//! # Overview
//!
//! ```text
//! PageSource::allocate_zeroed ──> AlignedBuffer ──> ZeroedArray<T> ──> &[T]
//! ```
//!
//! `T` is always an atomic type whose all-zero bit pattern is its empty state,
//! which is what `bytemuck::Zeroable` asserts.

mod page_source;
mod zeroed;

pub use page_source::{PageSource, PageSourceError, SystemPageSource};
pub use zeroed::ZeroedArray;
