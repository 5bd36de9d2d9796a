use thiserror::Error;
use veilfs_block::{BlockId, DataVer};

pub type FetchResult<T> = Result<T, FetchError>;

/// Centralized error type for veilfs-fetch.
///
/// `Clone` because one retrieval outcome may be delivered to several
/// coalesced waiters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("unsupported data version {data_ver} for block {id}")]
    UnsupportedDataVersion { id: BlockId, data_ver: DataVer },

    #[error("prefetcher is shut down, skipping prefetch for block {0}")]
    PrefetcherShutDown(BlockId),

    #[error("retrieval queue is shut down")]
    QueueShutDown,

    #[error("retrieval cancelled")]
    Cancelled,

    #[error("block getter failed: {0}")]
    Getter(String),
}
