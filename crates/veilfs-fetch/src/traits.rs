use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use veilfs_block::{Block, BlockPointer, KeyMetadata};
use veilfs_cache::CacheLifetime;

use crate::error::FetchResult;

/// The layer that materializes one block from a pointer: network fetch,
/// decryption, decode. External to this crate; faked in tests.
///
/// `block` is an empty target of the variant the caller expects the pointer
/// to decode into. Implementations must honour `cancel`: a cancelled fetch
/// should drain promptly and return a cancellation error.
#[async_trait]
pub trait BlockGetter: Send + Sync + 'static {
    async fn get_block(
        &self,
        kmd: &KeyMetadata,
        ptr: BlockPointer,
        block: Block,
        cancel: CancellationToken,
    ) -> FetchResult<Block>;
}

/// Contract between the prefetcher and the retrieval pipeline.
///
/// `request` must not block past admission; the returned receiver is the
/// sole synchronization point and resolves exactly once. Higher priorities
/// are served sooner, but ordering across independent requests is a hint,
/// not a guarantee. On success the retriever is responsible for inserting
/// the block into the cache and, when the request priority warrants it, for
/// running the prefetch policy over the block's children.
///
/// A dropped sender is equivalent to cancellation.
pub trait BlockRetriever: Send + Sync + 'static {
    fn request(
        &self,
        priority: i32,
        kmd: KeyMetadata,
        ptr: BlockPointer,
        block: Block,
        lifetime: CacheLifetime,
        cancel: CancellationToken,
    ) -> oneshot::Receiver<FetchResult<Block>>;
}
