#![forbid(unsafe_code)]

//! Block cache contract and the in-memory implementation.
//!
//! The cache stores fully decrypted [`Block`](veilfs_block::Block) values
//! keyed by pointer, tagged with:
//!
//! - a **lifetime** ([`CacheLifetime`]): transient entries compete for a
//!   bounded LRU, permanent entries are pinned;
//! - a **prefetch flag**: whether a speculative fetch round has been
//!   triggered for the block's children.
//!
//! The retrieval queue writes entries; the prefetcher only performs
//! membership checks to avoid re-fetching blocks that already landed.

mod cache;
mod mem;

pub use cache::{BlockCache, CacheError, CacheLifetime, CacheResult};
pub use mem::MemBlockCache;
