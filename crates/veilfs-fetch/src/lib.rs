#![forbid(unsafe_code)]

//! Block retrieval and speculative prefetching for the veilfs client.
//!
//! Two cooperating halves:
//!
//! - **[`BlockRetrievalQueue`]**: the priority-ordered pipeline that turns
//!   pointers into cached blocks through a pluggable [`BlockGetter`].
//!   Requests for one pointer coalesce; successful fetches land in the
//!   block cache.
//! - **[`BlockPrefetcher`]**: when a retrieval was urgent enough, the queue
//!   hands the fresh block to the prefetcher, which speculatively enqueues
//!   the block's direct children (indirect pointers, directory entries)
//!   back into the queue at sub-on-demand priorities.
//!
//! Speculation is best-effort by design: child failures are logged and
//! forgotten, shutdown cancels and then drains every in-flight request, and
//! nothing here ever fails an on-demand read.

mod config;
mod error;
mod fanout;
mod prefetcher;
mod queue;
mod traits;
mod worker;

pub mod testing;

pub use config::FetchConfig;
pub use error::{FetchError, FetchResult};
pub use fanout::{DoneSignal, Fanout};
pub use prefetcher::{
    BlockPrefetcher, PrefetchRequest, DEFAULT_PREFETCH_PRIORITY, DIR_ENTRY_PREFETCH_PRIORITY,
    FILE_INDIRECT_BLOCK_PREFETCH_PRIORITY, PREFETCH_TIMEOUT, UPDATE_POINTER_PREFETCH_PRIORITY,
};
pub use queue::{
    BlockRetrievalQueue, DEFAULT_ON_DEMAND_REQUEST_PRIORITY, LOWEST_TRIGGER_PREFETCH_PRIORITY,
};
pub use traits::{BlockGetter, BlockRetriever};
