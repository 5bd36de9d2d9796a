use thiserror::Error;
use veilfs_block::{Block, BlockId, BlockPointer, TlfId};

pub type CacheResult<T> = Result<T, CacheError>;

/// Centralized error type for veilfs-cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("no such block {0}")]
    NoSuchBlock(BlockId),
}

/// How long a cached block is expected to live.
///
/// Ordered so that the strongest lifetime wins when two requests for the
/// same block disagree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CacheLifetime {
    /// May be evicted at any time to reclaim space.
    Transient,
    /// Pinned by a user reference; never evicted by capacity pressure.
    Permanent,
}

/// The block cache contract consumed by the retrieval layer.
///
/// Alongside each block the cache remembers whether a prefetch round has
/// been triggered for the block's *children*. The flag is orthogonal to
/// whether those child retrievals succeeded; it only records that the
/// speculation happened, so the next on-demand read of the block knows not
/// to repeat it.
///
/// Implementations are internally synchronized; all operations are cheap
/// and non-blocking.
pub trait BlockCache: Send + Sync + 'static {
    /// Look up a block by pointer.
    fn get(&self, ptr: &BlockPointer) -> CacheResult<Block>;

    /// Look up a block along with its prefetch flag and lifetime.
    fn get_with_prefetch(&self, ptr: &BlockPointer) -> CacheResult<(Block, bool, CacheLifetime)>;

    /// Insert a block, recording whether its children have been speculated
    /// on. Overwrites any existing entry for the pointer.
    fn put_with_prefetch(
        &self,
        ptr: BlockPointer,
        tlf: TlfId,
        block: Block,
        lifetime: CacheLifetime,
        has_prefetched: bool,
    ) -> CacheResult<()>;

    /// Drop a transient entry, if present. Permanent entries are untouched.
    fn delete_transient(&self, ptr: &BlockPointer, tlf: TlfId) -> CacheResult<()>;
}
