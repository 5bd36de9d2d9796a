use std::sync::Arc;

use veilfs_block::{BlockPointer, DataVer, TlfId, FIRST_VALID_DATA_VER};
use veilfs_cache::BlockCache;

use crate::error::{FetchError, FetchResult};

/// Capability bundle consumed by the retrieval queue and the prefetcher.
///
/// A struct-of-capabilities rather than global state: the engine takes one
/// `Arc<dyn FetchConfig>` and asks it for the cache, the folder sync state,
/// and the highest block data version this client understands.
pub trait FetchConfig: Send + Sync + 'static {
    /// The shared block cache.
    fn block_cache(&self) -> Arc<dyn BlockCache>;

    /// Whether the user keeps this folder fully synced locally. Prefetches
    /// inside synced folders are prioritized as if on-demand.
    fn is_synced_tlf(&self, tlf: TlfId) -> bool;

    /// Highest data version this client can decode.
    fn data_version(&self) -> DataVer;

    /// Reject pointers this client cannot decode.
    fn check_data_version(&self, ptr: &BlockPointer) -> FetchResult<()> {
        if ptr.data_ver < FIRST_VALID_DATA_VER || ptr.data_ver > self.data_version() {
            return Err(FetchError::UnsupportedDataVersion {
                id: ptr.id,
                data_ver: ptr.data_ver,
            });
        }
        Ok(())
    }
}
