#![forbid(unsafe_code)]

//! # Veilfs
//!
//! Facade crate for the veilfs client core: the block data model, the block
//! cache, and the retrieval/prefetch pipeline.
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use veilfs::prelude::*;
//!
//! let queue = BlockRetrievalQueue::new(4, config, getter);
//! let completion = queue
//!     .request(
//!         DEFAULT_ON_DEMAND_REQUEST_PRIORITY,
//!         kmd,
//!         ptr,
//!         Block::empty_dir(),
//!         CacheLifetime::Transient,
//!         cancel,
//!     )
//!     .await;
//! let block = completion.await??;
//! // Children of `block` are now being prefetched into the cache.
//! ```

// ── Re-export sub-crates ────────────────────────────────────────────────

pub mod block {
    pub use veilfs_block::*;
}

pub mod cache {
    pub use veilfs_cache::*;
}

pub mod fetch {
    pub use veilfs_fetch::*;
}

// ── Prelude ─────────────────────────────────────────────────────────────

pub mod prelude {
    pub use veilfs_block::{
        Block, BlockPointer, DirBlock, DirEntry, EntryType, FileBlock, KeyMetadata, TlfId,
    };
    pub use veilfs_cache::{BlockCache, CacheLifetime, MemBlockCache};
    pub use veilfs_fetch::{
        BlockGetter, BlockPrefetcher, BlockRetrievalQueue, DoneSignal, FetchConfig, FetchError,
        FetchResult, DEFAULT_ON_DEMAND_REQUEST_PRIORITY,
    };
}
