//! Test doubles for exercising the retrieval queue and the prefetcher.
//!
//! The central piece is [`FakeBlockGetter`]: every scripted pointer gets a
//! [`ReleaseHandle`], and the corresponding `get_block` call parks until the
//! test releases (or fails) it. That makes retrieval completion order fully
//! test-controlled, which the prefetcher scenarios depend on.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use veilfs_block::{
    Block, BlockId, BlockInfo, BlockPointer, DataVer, DirEntry, EntryType, FileBlock,
    IndirectDirPtr, IndirectFilePtr, KeyGen, KeyMetadata, TlfId, FIRST_VALID_DATA_VER,
};
use veilfs_cache::{BlockCache, CacheLifetime, MemBlockCache};

use crate::config::FetchConfig;
use crate::error::{FetchError, FetchResult};
use crate::traits::{BlockGetter, BlockRetriever};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A fresh, unique block pointer at the current data version.
pub fn make_block_pointer() -> BlockPointer {
    let mut bytes = [0u8; BlockId::LEN];
    bytes[..8].copy_from_slice(&next_id().to_be_bytes());
    BlockPointer::new(BlockId::from_bytes(bytes), KeyGen(1), FIRST_VALID_DATA_VER)
}

/// A fresh block info with a fixed nominal encoded size.
pub fn make_block_info() -> BlockInfo {
    BlockInfo::new(make_block_pointer(), 150)
}

/// Key metadata for a fresh, unique folder.
pub fn make_kmd() -> KeyMetadata {
    let mut bytes = [0u8; TlfId::LEN];
    bytes[..8].copy_from_slice(&next_id().to_be_bytes());
    KeyMetadata::new(TlfId::from_bytes(bytes), KeyGen(1))
}

/// A direct file block with unique contents.
pub fn make_file_block() -> Block {
    Block::File(FileBlock::direct(Bytes::from(
        next_id().to_be_bytes().to_vec(),
    )))
}

pub fn make_dir_entry(entry_type: EntryType, size: u64) -> DirEntry {
    DirEntry::new(make_block_info(), entry_type, size)
}

pub fn make_indirect_file_ptr(off: u64) -> IndirectFilePtr {
    IndirectFilePtr {
        info: make_block_info(),
        off,
        holes: false,
    }
}

pub fn make_indirect_dir_ptr(off: &str) -> IndirectDirPtr {
    IndirectDirPtr {
        info: make_block_info(),
        off: off.to_string(),
    }
}

/// [`FetchConfig`] over a [`MemBlockCache`] with settable folder sync state.
pub struct TestFetchConfig {
    cache: Arc<MemBlockCache>,
    synced: Mutex<HashSet<TlfId>>,
    data_ver: DataVer,
}

impl TestFetchConfig {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(MemBlockCache::new(100)),
            synced: Mutex::new(HashSet::new()),
            data_ver: FIRST_VALID_DATA_VER,
        }
    }

    pub fn cache(&self) -> Arc<MemBlockCache> {
        self.cache.clone()
    }

    pub fn set_tlf_sync_state(&self, tlf: TlfId, synced: bool) {
        let mut set = self.synced.lock().expect("sync state mutex poisoned");
        if synced {
            set.insert(tlf);
        } else {
            set.remove(&tlf);
        }
    }
}

impl Default for TestFetchConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchConfig for TestFetchConfig {
    fn block_cache(&self) -> Arc<dyn BlockCache> {
        self.cache.clone()
    }

    fn is_synced_tlf(&self, tlf: TlfId) -> bool {
        self.synced
            .lock()
            .expect("sync state mutex poisoned")
            .contains(&tlf)
    }

    fn data_version(&self) -> DataVer {
        self.data_ver
    }
}

/// Releases one scripted retrieval. Sends never block, so tests can release
/// blocks before or after the getter reaches them.
pub struct ReleaseHandle {
    tx: mpsc::UnboundedSender<FetchResult<()>>,
    started_rx: mpsc::UnboundedReceiver<()>,
    ack_rx: mpsc::UnboundedReceiver<()>,
}

impl ReleaseHandle {
    /// Let the retrieval complete successfully.
    pub fn release(&self) {
        let _ = self.tx.send(Ok(()));
    }

    /// Fail the retrieval with `err`.
    pub fn fail(&self, err: FetchError) {
        let _ = self.tx.send(Err(err));
    }

    /// Wait until the getter has picked the retrieval up (and is now parked
    /// on the release).
    pub async fn started(&mut self) {
        let _ = self.started_rx.recv().await;
    }

    /// Wait until the getter has consumed the release, i.e. the retrieval
    /// actually reached the getter and is about to finalize. Lets tests
    /// order a shutdown after a released fetch was really served.
    pub async fn served(&mut self) {
        let _ = self.ack_rx.recv().await;
    }
}

struct ScriptedBlock {
    block: Block,
    release: Option<mpsc::UnboundedReceiver<FetchResult<()>>>,
    started_tx: mpsc::UnboundedSender<()>,
    ack_tx: mpsc::UnboundedSender<()>,
}

/// A [`BlockGetter`] that serves pre-scripted blocks, each gated on its
/// [`ReleaseHandle`]. Each pointer may be fetched at most once; a second
/// fetch fails loudly, which is how tests detect duplicate retrievals.
///
/// With `respect_cancel = false` the getter ignores cancellation and waits
/// for its release regardless, so a shutdown's done signal proves that the
/// retrievals actually finished.
pub struct FakeBlockGetter {
    blocks: Mutex<HashMap<BlockPointer, ScriptedBlock>>,
    fetched: Mutex<Vec<BlockPointer>>,
    respect_cancel: bool,
}

impl FakeBlockGetter {
    pub fn new(respect_cancel: bool) -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
            fetched: Mutex::new(Vec::new()),
            respect_cancel,
        }
    }

    /// Script the block returned for `ptr`, gated on the returned handle.
    pub fn set_block_to_return(&self, ptr: BlockPointer, block: Block) -> ReleaseHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        self.blocks
            .lock()
            .expect("fake getter mutex poisoned")
            .insert(
                ptr,
                ScriptedBlock {
                    block,
                    release: Some(rx),
                    started_tx,
                    ack_tx,
                },
            );
        ReleaseHandle {
            tx,
            started_rx,
            ack_rx,
        }
    }

    /// Pointers in the order `get_block` was called with them.
    pub fn fetched_order(&self) -> Vec<BlockPointer> {
        self.fetched
            .lock()
            .expect("fake getter mutex poisoned")
            .clone()
    }
}

#[async_trait]
impl BlockGetter for FakeBlockGetter {
    async fn get_block(
        &self,
        _kmd: &KeyMetadata,
        ptr: BlockPointer,
        _block: Block,
        cancel: CancellationToken,
    ) -> FetchResult<Block> {
        self.fetched
            .lock()
            .expect("fake getter mutex poisoned")
            .push(ptr);
        let (block, mut release, ack_tx) = {
            let mut blocks = self.blocks.lock().expect("fake getter mutex poisoned");
            let Some(scripted) = blocks.get_mut(&ptr) else {
                return Err(FetchError::Getter(format!("no scripted block for {ptr}")));
            };
            let _ = scripted.started_tx.send(());
            let Some(release) = scripted.release.take() else {
                return Err(FetchError::Getter(format!(
                    "block {ptr} requested more than once"
                )));
            };
            (scripted.block.clone(), release, scripted.ack_tx.clone())
        };

        let released = if self.respect_cancel {
            tokio::select! {
                released = release.recv() => released,
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
            }
        } else {
            release.recv().await
        };
        let _ = ack_tx.send(());
        match released {
            Some(Ok(())) => Ok(block),
            Some(Err(err)) => Err(err),
            None => Err(FetchError::Getter("release handle dropped".to_string())),
        }
    }
}

/// A [`BlockRetriever`] that accepts every request and never completes any.
pub struct NullBlockRetriever;

impl BlockRetriever for NullBlockRetriever {
    fn request(
        &self,
        _priority: i32,
        _kmd: KeyMetadata,
        _ptr: BlockPointer,
        _block: Block,
        _lifetime: CacheLifetime,
        _cancel: CancellationToken,
    ) -> oneshot::Receiver<FetchResult<Block>> {
        let (tx, rx) = oneshot::channel();
        // Park the sender forever so the completion never resolves.
        tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });
        rx
    }
}
