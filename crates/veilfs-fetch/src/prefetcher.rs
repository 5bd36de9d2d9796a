//! Speculative block prefetching.
//!
//! When a block lands from the server, the policy here decides which of its
//! children are worth fetching ahead of demand and at what priority, and the
//! engine dispatches those fetches through the retrieval pipeline with
//! bounded lifetimes: every speculative request carries a 60-second budget
//! and is cancelled (then drained) on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use veilfs_block::{Block, BlockPointer, DirBlock, DirEntry, EntryType, FileBlock, KeyMetadata, TlfId};
use veilfs_cache::CacheLifetime;

use crate::config::FetchConfig;
use crate::error::{FetchError, FetchResult};
use crate::fanout::{DoneSignal, Fanout};
use crate::queue::DEFAULT_ON_DEMAND_REQUEST_PRIORITY;
use crate::traits::BlockRetriever;

/// Base priority for the children of an indirect file or directory block.
pub const FILE_INDIRECT_BLOCK_PREFETCH_PRIORITY: i32 = -100;
/// Base priority for the entries of a direct directory block.
pub const DIR_ENTRY_PREFETCH_PRIORITY: i32 = -200;
/// Priority for refreshing a block behind an updated pointer.
pub const UPDATE_POINTER_PREFETCH_PRIORITY: i32 = 0;
/// Priority for prefetches with no better classification.
pub const DEFAULT_PREFETCH_PRIORITY: i32 = -1024;

/// Budget for one speculative retrieval, timeout included in cancellation.
pub const PREFETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// One speculative fetch: what to get, how urgently, and which parent
/// fan-out to report completion to. Created by the policy, consumed exactly
/// once by the engine.
pub struct PrefetchRequest {
    pub priority: i32,
    pub kmd: KeyMetadata,
    pub ptr: BlockPointer,
    /// Empty target of the variant the pointer decodes into.
    pub block: Block,
    pub fanout: Fanout,
}

/// The prefetcher: a run loop accepting [`PrefetchRequest`]s, dispatching
/// them to the retriever, and tracking every in-flight request so that
/// shutdown can report true quiescence.
///
/// Lifecycle: `Running -> ShuttingDown -> Drained`, one-way. [`Self::shutdown`]
/// is idempotent; the returned [`DoneSignal`] fires only once every accepted
/// request has completed or been cancelled *and drained*.
///
/// Constructed inside a Tokio runtime (the run loop is spawned immediately).
pub struct BlockPrefetcher {
    config: Arc<dyn FetchConfig>,
    progress_tx: mpsc::Sender<PrefetchRequest>,
    shutdown: CancellationToken,
    done: CancellationToken,
}

impl BlockPrefetcher {
    pub fn new(retriever: Arc<dyn BlockRetriever>, config: Arc<dyn FetchConfig>) -> Self {
        let (progress_tx, progress_rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let done = CancellationToken::new();
        tokio::spawn(run(progress_rx, retriever, shutdown.clone(), done.clone()));
        Self {
            config,
            progress_tx,
            shutdown,
            done,
        }
    }

    /// A prefetcher that is born shut down: every admission fails with
    /// [`FetchError::PrefetcherShutDown`] and the done signal has already
    /// fired. Installed by the toggle when prefetching is disabled.
    pub fn new_disabled(config: Arc<dyn FetchConfig>) -> Self {
        let (progress_tx, _) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let done = CancellationToken::new();
        done.cancel();
        Self {
            config,
            progress_tx,
            shutdown,
            done,
        }
    }

    /// Admit one request. Skips pointers already in the cache (counting the
    /// fan-out slot as done), rejects unsupported data versions, and fails
    /// once shutdown has been signalled. An accepted request's slot is
    /// decremented later by its tracking task.
    async fn request(
        &self,
        priority: i32,
        kmd: KeyMetadata,
        ptr: BlockPointer,
        block: Block,
        fanout: Fanout,
    ) -> FetchResult<()> {
        if self.config.block_cache().get(&ptr).is_ok() {
            fanout.complete_one();
            return Ok(());
        }
        if let Err(err) = self.config.check_data_version(&ptr) {
            fanout.complete_one();
            return Err(err);
        }
        let req = PrefetchRequest {
            priority,
            kmd,
            ptr,
            block,
            fanout: fanout.clone(),
        };
        tokio::select! {
            sent = self.progress_tx.send(req) => match sent {
                Ok(()) => Ok(()),
                Err(_) => {
                    fanout.complete_one();
                    Err(FetchError::PrefetcherShutDown(ptr.id))
                }
            },
            () = self.shutdown.cancelled() => {
                fanout.complete_one();
                Err(FetchError::PrefetcherShutDown(ptr.id))
            }
        }
    }

    /// Base priority for an unsynced folder; elevated to compete with
    /// on-demand requests when the folder is synced.
    fn calculate_priority(&self, base_priority: i32, tlf: TlfId) -> i32 {
        if self.config.is_synced_tlf(tlf) {
            return DEFAULT_ON_DEMAND_REQUEST_PRIORITY - 1;
        }
        base_priority
    }

    async fn prefetch_indirect_file_block(&self, b: &FileBlock, kmd: &KeyMetadata) -> DoneSignal {
        let iptrs = b.indirect_ptrs();
        debug!(
            num_ptrs = iptrs.len(),
            "prefetching pointers for indirect file block"
        );
        let fanout = Fanout::new(iptrs.len());
        let starting_priority =
            self.calculate_priority(FILE_INDIRECT_BLOCK_PREFETCH_PRIORITY, kmd.tlf_id());
        for (i, iptr) in iptrs.iter().enumerate() {
            let _ = self
                .request(
                    starting_priority - i as i32,
                    kmd.clone(),
                    iptr.info.ptr,
                    Block::File(b.new_empty()),
                    fanout.clone(),
                )
                .await;
        }
        fanout.signal()
    }

    async fn prefetch_indirect_dir_block(&self, b: &DirBlock, kmd: &KeyMetadata) -> DoneSignal {
        let iptrs = b.indirect_ptrs();
        debug!(
            num_ptrs = iptrs.len(),
            "prefetching pointers for indirect dir block"
        );
        let fanout = Fanout::new(iptrs.len());
        let starting_priority =
            self.calculate_priority(FILE_INDIRECT_BLOCK_PREFETCH_PRIORITY, kmd.tlf_id());
        for (i, iptr) in iptrs.iter().enumerate() {
            let _ = self
                .request(
                    starting_priority - i as i32,
                    kmd.clone(),
                    iptr.info.ptr,
                    Block::Dir(b.new_empty()),
                    fanout.clone(),
                )
                .await;
        }
        fanout.signal()
    }

    async fn prefetch_direct_dir_block(
        &self,
        ptr: BlockPointer,
        b: &DirBlock,
        kmd: &KeyMetadata,
    ) -> DoneSignal {
        let Some(children) = b.children() else {
            return DoneSignal::already_done();
        };
        debug!(
            id = %ptr.id,
            num_entries = children.len(),
            "prefetching entries for directory block"
        );
        // Small files first: many-small-files workloads dominate, so the
        // cheap wins land in the cache earliest. Name breaks size ties to
        // keep submission order deterministic.
        let mut entries: Vec<(&String, &DirEntry)> = children.iter().collect();
        entries.sort_by(|(a_name, a), (b_name, b)| {
            a.size.cmp(&b.size).then_with(|| a_name.cmp(b_name))
        });

        let fanout = Fanout::new(entries.len());
        let starting_priority = self.calculate_priority(DIR_ENTRY_PREFETCH_PRIORITY, kmd.tlf_id());
        for (i, (name, entry)) in entries.iter().enumerate() {
            let priority = starting_priority - i as i32;
            let block = match entry.entry_type {
                EntryType::Dir => Block::empty_dir(),
                EntryType::File | EntryType::Exec => Block::empty_file(),
                other => {
                    debug!(entry = %name, entry_type = %other, "skipping prefetch for entry type");
                    fanout.complete_one();
                    continue;
                }
            };
            let _ = self
                .request(priority, kmd.clone(), entry.info.ptr, block, fanout.clone())
                .await;
        }
        fanout.signal()
    }

    /// Speculate on one block by explicit upstream request.
    pub async fn prefetch_block(
        &self,
        block: Block,
        ptr: BlockPointer,
        kmd: KeyMetadata,
        priority: i32,
    ) -> FetchResult<()> {
        self.prefetch_block_with_signal(block, ptr, kmd, priority)
            .await
            .map(|_| ())
    }

    /// As [`Self::prefetch_block`], returning the signal that fires when the
    /// retrieval reaches a terminal outcome.
    pub async fn prefetch_block_with_signal(
        &self,
        block: Block,
        ptr: BlockPointer,
        kmd: KeyMetadata,
        priority: i32,
    ) -> FetchResult<DoneSignal> {
        debug!(%ptr, priority, "prefetching block by upstream request");
        let fanout = Fanout::new(1);
        let signal = fanout.signal();
        self.request(priority, kmd, ptr, block, fanout).await?;
        Ok(signal)
    }

    /// Run the prefetch policy over a freshly retrieved block: enqueue its
    /// directly attached children, one level deep. The returned signal fires
    /// once every triggered child request has completed, failed, or been
    /// cancelled; blocks with no prefetchable children get an already-fired
    /// signal.
    ///
    /// Descent deeper than one level happens only when a child's own
    /// retrieval comes back through this hook.
    pub async fn on_block_retrieved(
        &self,
        block: &Block,
        ptr: BlockPointer,
        kmd: &KeyMetadata,
    ) -> DoneSignal {
        match block {
            Block::File(b) if b.is_indirect() => self.prefetch_indirect_file_block(b, kmd).await,
            Block::Dir(b) if b.is_indirect() => self.prefetch_indirect_dir_block(b, kmd).await,
            Block::Dir(b) => self.prefetch_direct_dir_block(ptr, b, kmd).await,
            // Direct file blocks and unknown variants are leaves.
            _ => DoneSignal::already_done(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting requests and begin draining. Idempotent: every call
    /// returns the same done signal, which fires once all accepted requests
    /// have terminated.
    pub fn shutdown(&self) -> DoneSignal {
        self.shutdown.cancel();
        DoneSignal::from_token(self.done.clone())
    }
}

/// The engine run loop: accept requests until shutdown, spawn one tracking
/// task per dispatch, then wait for every tracking task before firing `done`.
async fn run(
    mut progress_rx: mpsc::Receiver<PrefetchRequest>,
    retriever: Arc<dyn BlockRetriever>,
    shutdown: CancellationToken,
    done: CancellationToken,
) {
    let (pending_tx, mut pending_rx) = watch::channel(0usize);
    let pending_tx = Arc::new(pending_tx);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            req = progress_rx.recv() => {
                let Some(req) = req else { break };
                dispatch(req, &retriever, &shutdown, &pending_tx);
            }
        }
    }

    // An accepted send is a promise: requests still sitting in the channel
    // buffer when shutdown fired are dispatched anyway, and their tracking
    // tasks observe the shutdown immediately.
    while let Ok(req) = progress_rx.try_recv() {
        dispatch(req, &retriever, &shutdown, &pending_tx);
    }

    let _ = pending_rx.wait_for(|pending| *pending == 0).await;
    done.cancel();
}

/// Hand one request to the retriever and spawn its tracking task.
fn dispatch(
    req: PrefetchRequest,
    retriever: &Arc<dyn BlockRetriever>,
    shutdown: &CancellationToken,
    pending_tx: &Arc<watch::Sender<usize>>,
) {
    let cancel = CancellationToken::new();
    let completion = retriever.request(
        req.priority,
        req.kmd,
        req.ptr,
        req.block,
        CacheLifetime::Transient,
        cancel.clone(),
    );
    pending_tx.send_modify(|n| *n += 1);
    tokio::spawn(track(
        req.ptr,
        req.fanout,
        completion,
        cancel,
        shutdown.clone(),
        pending_tx.clone(),
    ));
}

/// Watch one in-flight retrieval. On shutdown or timeout, cancel and *still
/// wait* for the completion channel to drain, so that the engine's done
/// signal truly means no straggler can touch the cache afterwards.
async fn track(
    ptr: BlockPointer,
    fanout: Fanout,
    mut completion: oneshot::Receiver<FetchResult<Block>>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    pending_tx: Arc<watch::Sender<usize>>,
) {
    tokio::select! {
        res = &mut completion => {
            if let Ok(Err(err)) = res {
                debug!(%ptr, error = %err, "prefetch finished with error");
            }
        }
        () = shutdown.cancelled() => {
            cancel.cancel();
            let _ = completion.await;
        }
        () = tokio::time::sleep(PREFETCH_TIMEOUT) => {
            debug!(%ptr, "prefetch timed out");
            cancel.cancel();
            let _ = completion.await;
        }
    }
    fanout.complete_one();
    pending_tx.send_modify(|n| *n -= 1);
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::testing::{
        make_block_pointer, make_dir_entry, make_kmd, NullBlockRetriever, TestFetchConfig,
    };

    fn test_prefetcher(config: Arc<TestFetchConfig>) -> BlockPrefetcher {
        BlockPrefetcher::new(Arc::new(NullBlockRetriever), config)
    }

    #[tokio::test]
    async fn priority_is_elevated_for_synced_folders() {
        let config = Arc::new(TestFetchConfig::new());
        let p = test_prefetcher(config.clone());
        let kmd = make_kmd();

        assert_eq!(
            p.calculate_priority(DIR_ENTRY_PREFETCH_PRIORITY, kmd.tlf_id()),
            DIR_ENTRY_PREFETCH_PRIORITY
        );

        config.set_tlf_sync_state(kmd.tlf_id(), true);
        assert_eq!(
            p.calculate_priority(DIR_ENTRY_PREFETCH_PRIORITY, kmd.tlf_id()),
            DEFAULT_ON_DEMAND_REQUEST_PRIORITY - 1
        );
    }

    #[tokio::test]
    async fn disabled_prefetcher_rejects_requests() {
        let config = Arc::new(TestFetchConfig::new());
        let p = BlockPrefetcher::new_disabled(config);
        let ptr = make_block_pointer();

        let err = p
            .prefetch_block(Block::empty_file(), ptr, make_kmd(), DEFAULT_PREFETCH_PRIORITY)
            .await
            .expect_err("disabled prefetcher should reject");
        assert_eq!(err, FetchError::PrefetcherShutDown(ptr.id));
        assert!(p.is_shut_down());
        assert!(p.shutdown().is_done());
    }

    #[tokio::test]
    async fn unsupported_data_version_is_rejected_and_counted() {
        let config = Arc::new(TestFetchConfig::new());
        let p = test_prefetcher(config);
        let mut ptr = make_block_pointer();
        ptr.data_ver = veilfs_block::DataVer(0);

        let fanout = Fanout::new(1);
        let signal = fanout.signal();
        let err = p
            .request(
                DEFAULT_PREFETCH_PRIORITY,
                make_kmd(),
                ptr,
                Block::empty_file(),
                fanout,
            )
            .await
            .expect_err("version 0 should be rejected");
        assert!(matches!(err, FetchError::UnsupportedDataVersion { .. }));
        assert!(signal.is_done());
    }

    #[tokio::test]
    async fn leaf_blocks_produce_an_already_fired_signal() {
        let config = Arc::new(TestFetchConfig::new());
        let p = test_prefetcher(config);
        let kmd = make_kmd();

        let leaf = Block::File(FileBlock::default());
        let signal = p.on_block_retrieved(&leaf, make_block_pointer(), &kmd).await;
        assert!(signal.is_done());

        let empty_dir = Block::Dir(DirBlock::direct(BTreeMap::new()));
        let signal = p
            .on_block_retrieved(&empty_dir, make_block_pointer(), &kmd)
            .await;
        assert!(signal.is_done());
    }

    #[tokio::test]
    async fn symlink_entries_are_skipped_without_stalling_the_fanout() {
        let config = Arc::new(TestFetchConfig::new());
        let p = test_prefetcher(config);
        let kmd = make_kmd();

        let mut children = BTreeMap::new();
        children.insert("link".to_string(), make_dir_entry(EntryType::Sym, 10));
        let block = Block::Dir(DirBlock::direct(children));

        // The only entry is skipped, so the round is done on return even
        // though the null retriever never completes anything.
        let signal = p.on_block_retrieved(&block, make_block_pointer(), &kmd).await;
        assert!(signal.is_done());
    }
}
