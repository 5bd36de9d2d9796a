//! Priority-ordered block retrieval queue.
//!
//! On-demand readers and the prefetcher both funnel through here. Requests
//! for the same pointer coalesce into one retrieval; a worker pool serves
//! retrievals highest-priority first through a pluggable [`BlockGetter`];
//! successful fetches land in the block cache and, when the request was
//! urgent enough, trigger the prefetch policy for the block's children.

use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use veilfs_block::{Block, BlockPointer, KeyMetadata};
use veilfs_cache::CacheLifetime;

use crate::config::FetchConfig;
use crate::error::{FetchError, FetchResult};
use crate::fanout::DoneSignal;
use crate::prefetcher::BlockPrefetcher;
use crate::traits::{BlockGetter, BlockRetriever};
use crate::worker::RetrievalWorker;

/// Priority assigned to retrievals triggered by an application read.
pub const DEFAULT_ON_DEMAND_REQUEST_PRIORITY: i32 = 100;

/// Lowest priority at which a successful retrieval still triggers a prefetch
/// round for the block's children. Speculative child fetches sit far below
/// this, so speculation does not compound; synced-folder prefetches sit just
/// above it, so it does. The pointer-update priority (0) deliberately does
/// not qualify.
pub const LOWEST_TRIGGER_PREFETCH_PRIORITY: i32 = 1;

/// Heap key: highest priority first, then submission order.
struct HeapEntry {
    priority: i32,
    seq: u64,
    ptr: BlockPointer,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for HeapEntry {}

/// One pending or in-flight retrieval, shared by every coalesced waiter.
struct Retrieval {
    priority: i32,
    kmd: KeyMetadata,
    /// Empty target from the first request.
    block: Block,
    /// Strongest lifetime any waiter asked for.
    lifetime: CacheLifetime,
    /// Cancellation of the first waiter; later coalescers cannot cancel an
    /// already-queued retrieval.
    cancel: CancellationToken,
    waiters: Vec<oneshot::Sender<FetchResult<Block>>>,
    /// Taken by a worker; stale heap entries for claimed retrievals are
    /// skipped on pop.
    claimed: bool,
}

struct QueueState {
    heap: BinaryHeap<HeapEntry>,
    retrievals: HashMap<BlockPointer, Retrieval>,
    next_seq: u64,
    shut_down: bool,
}

pub(crate) struct ClaimedRetrieval {
    pub(crate) ptr: BlockPointer,
    pub(crate) kmd: KeyMetadata,
    pub(crate) block: Block,
    pub(crate) cancel: CancellationToken,
}

pub(crate) struct QueueShared {
    config: Arc<dyn FetchConfig>,
    pub(crate) getter: Arc<dyn BlockGetter>,
    state: Mutex<QueueState>,
    /// One permit per queued heap entry; workers park here.
    pub(crate) work: Semaphore,
    pub(crate) shutdown: CancellationToken,
    prefetcher: RwLock<Arc<BlockPrefetcher>>,
}

impl QueueShared {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().expect("queue state mutex poisoned")
    }

    pub(crate) fn prefetcher(&self) -> Arc<BlockPrefetcher> {
        self.prefetcher
            .read()
            .expect("prefetcher lock poisoned")
            .clone()
    }

    /// Admit one request: serve from cache, reject bad versions, coalesce
    /// onto an existing retrieval, or enqueue a fresh one. Never blocks.
    fn submit(
        &self,
        priority: i32,
        kmd: KeyMetadata,
        ptr: BlockPointer,
        block: Block,
        lifetime: CacheLifetime,
        cancel: CancellationToken,
        tx: oneshot::Sender<FetchResult<Block>>,
    ) {
        if self.shutdown.is_cancelled() {
            let _ = tx.send(Err(FetchError::QueueShutDown));
            return;
        }
        if let Ok(cached) = self.config.block_cache().get(&ptr) {
            let _ = tx.send(Ok(cached));
            return;
        }
        if let Err(err) = self.config.check_data_version(&ptr) {
            let _ = tx.send(Err(err));
            return;
        }

        let mut guard = self.lock_state();
        let state = &mut *guard;
        if state.shut_down {
            drop(guard);
            let _ = tx.send(Err(FetchError::QueueShutDown));
            return;
        }
        if let Some(retrieval) = state.retrievals.get_mut(&ptr) {
            retrieval.waiters.push(tx);
            if lifetime > retrieval.lifetime {
                retrieval.lifetime = lifetime;
            }
            // Raise a still-queued retrieval; the old heap entry goes stale
            // and is skipped when popped.
            if !retrieval.claimed && priority > retrieval.priority {
                retrieval.priority = priority;
                let seq = state.next_seq;
                state.next_seq += 1;
                state.heap.push(HeapEntry { priority, seq, ptr });
                self.work.add_permits(1);
            }
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.retrievals.insert(
            ptr,
            Retrieval {
                priority,
                kmd,
                block,
                lifetime,
                cancel,
                waiters: vec![tx],
                claimed: false,
            },
        );
        state.heap.push(HeapEntry { priority, seq, ptr });
        self.work.add_permits(1);
    }

    /// Pop the highest-priority unclaimed retrieval, if any.
    pub(crate) fn claim_next(&self) -> Option<ClaimedRetrieval> {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        while let Some(entry) = state.heap.pop() {
            let Some(retrieval) = state.retrievals.get_mut(&entry.ptr) else {
                continue;
            };
            if retrieval.claimed || retrieval.priority != entry.priority {
                continue;
            }
            retrieval.claimed = true;
            return Some(ClaimedRetrieval {
                ptr: entry.ptr,
                kmd: retrieval.kmd.clone(),
                block: retrieval.block.clone(),
                cancel: retrieval.cancel.clone(),
            });
        }
        None
    }

    /// Settle a finished retrieval: cache the block, run the prefetch policy
    /// if the request priority warrants it, then wake every waiter.
    ///
    /// On success the retrieval stays in the map until the block is cached,
    /// so a concurrent request for the same pointer either coalesces here or
    /// hits the cache — never starts a duplicate fetch.
    pub(crate) async fn finalize(&self, ptr: BlockPointer, result: FetchResult<Block>) {
        match result {
            Ok(block) => {
                let snapshot = {
                    let state = self.lock_state();
                    state
                        .retrievals
                        .get(&ptr)
                        .map(|r| (r.kmd.clone(), r.lifetime, r.priority))
                };
                let Some((kmd, lifetime, priority)) = snapshot else {
                    return;
                };
                let prefetcher = self.prefetcher();
                let triggered =
                    priority >= LOWEST_TRIGGER_PREFETCH_PRIORITY && !prefetcher.is_shut_down();
                if let Err(err) = self.config.block_cache().put_with_prefetch(
                    ptr,
                    kmd.tlf_id(),
                    block.clone(),
                    lifetime,
                    triggered,
                ) {
                    debug!(%ptr, error = %err, "failed to cache retrieved block");
                }
                if triggered {
                    let _done = prefetcher.on_block_retrieved(&block, ptr, &kmd).await;
                }
                let Some(retrieval) = self.lock_state().retrievals.remove(&ptr) else {
                    return;
                };
                for tx in retrieval.waiters {
                    let _ = tx.send(Ok(block.clone()));
                }
            }
            Err(err) => {
                let Some(retrieval) = self.lock_state().retrievals.remove(&ptr) else {
                    return;
                };
                debug!(%ptr, error = %err, "block retrieval failed");
                for tx in retrieval.waiters {
                    let _ = tx.send(Err(err.clone()));
                }
            }
        }
    }
}

/// Retriever handle the prefetcher holds. `Weak` so the queue/prefetcher
/// reference cycle cannot keep either alive; requests against a dead queue
/// resolve to [`FetchError::QueueShutDown`].
pub(crate) struct QueueRetriever {
    shared: Weak<QueueShared>,
}

impl BlockRetriever for QueueRetriever {
    fn request(
        &self,
        priority: i32,
        kmd: KeyMetadata,
        ptr: BlockPointer,
        block: Block,
        lifetime: CacheLifetime,
        cancel: CancellationToken,
    ) -> oneshot::Receiver<FetchResult<Block>> {
        let (tx, rx) = oneshot::channel();
        match self.shared.upgrade() {
            Some(shared) => shared.submit(priority, kmd, ptr, block, lifetime, cancel, tx),
            None => {
                let _ = tx.send(Err(FetchError::QueueShutDown));
            }
        }
        rx
    }
}

/// The retrieval queue plus its worker pool and the current prefetcher.
///
/// Constructed inside a Tokio runtime (workers and the prefetch engine are
/// spawned immediately).
pub struct BlockRetrievalQueue {
    shared: Arc<QueueShared>,
}

impl BlockRetrievalQueue {
    pub fn new(
        num_workers: usize,
        config: Arc<dyn FetchConfig>,
        getter: Arc<dyn BlockGetter>,
    ) -> Self {
        let shared = Arc::new(QueueShared {
            getter,
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                retrievals: HashMap::new(),
                next_seq: 0,
                shut_down: false,
            }),
            work: Semaphore::new(0),
            shutdown: CancellationToken::new(),
            prefetcher: RwLock::new(Arc::new(BlockPrefetcher::new_disabled(config.clone()))),
            config,
        });
        let queue = Self { shared };
        let _ = queue.toggle_prefetcher(true);
        for _ in 0..num_workers.max(1) {
            tokio::spawn(RetrievalWorker::new(queue.shared.clone()).run());
        }
        queue
    }

    /// Retrieve one block, on demand or speculatively depending on
    /// `priority`. The returned receiver resolves exactly once.
    ///
    /// A cache hit resolves immediately. If the hit block has never had a
    /// prefetch round and this request is urgent enough to deserve one, the
    /// round runs now (before delivery) and the cached entry is re-marked —
    /// this is how blocks fetched while prefetching was disabled catch up.
    pub async fn request(
        &self,
        priority: i32,
        kmd: KeyMetadata,
        ptr: BlockPointer,
        block: Block,
        lifetime: CacheLifetime,
        cancel: CancellationToken,
    ) -> oneshot::Receiver<FetchResult<Block>> {
        let (tx, rx) = oneshot::channel();
        let cache = self.shared.config.block_cache();
        if let Ok((cached, has_prefetched, cached_lifetime)) = cache.get_with_prefetch(&ptr) {
            if !has_prefetched && priority >= LOWEST_TRIGGER_PREFETCH_PRIORITY {
                let prefetcher = self.shared.prefetcher();
                if !prefetcher.is_shut_down() {
                    if let Err(err) = cache.put_with_prefetch(
                        ptr,
                        kmd.tlf_id(),
                        cached.clone(),
                        cached_lifetime,
                        true,
                    ) {
                        debug!(%ptr, error = %err, "failed to re-mark cached block");
                    }
                    let _done = prefetcher.on_block_retrieved(&cached, ptr, &kmd).await;
                }
            }
            let _ = tx.send(Ok(cached));
            return rx;
        }
        self.shared
            .submit(priority, kmd, ptr, block, lifetime, cancel, tx);
        rx
    }

    /// The currently installed prefetcher.
    pub fn prefetcher(&self) -> Arc<BlockPrefetcher> {
        self.shared.prefetcher()
    }

    /// Replace the prefetcher with a fresh engine (or a disabled one). The
    /// outgoing engine is shut down; its done signal is returned so callers
    /// can await the drain.
    pub fn toggle_prefetcher(&self, enable: bool) -> DoneSignal {
        let fresh = if enable && !self.shared.shutdown.is_cancelled() {
            Arc::new(BlockPrefetcher::new(
                Arc::new(QueueRetriever {
                    shared: Arc::downgrade(&self.shared),
                }),
                self.shared.config.clone(),
            ))
        } else {
            Arc::new(BlockPrefetcher::new_disabled(self.shared.config.clone()))
        };
        let old = {
            let mut slot = self
                .shared
                .prefetcher
                .write()
                .expect("prefetcher lock poisoned");
            std::mem::replace(&mut *slot, fresh)
        };
        old.shutdown()
    }

    /// Stop the workers, fail queued retrievals, cancel in-flight ones, and
    /// shut the prefetcher down. Returns the prefetcher's done signal.
    /// Idempotent.
    pub fn shutdown(&self) -> DoneSignal {
        self.shared.shutdown.cancel();
        self.shared.work.close();
        let drained = {
            let mut state = self.shared.lock_state();
            state.shut_down = true;
            state.heap.clear();
            let unclaimed: Vec<BlockPointer> = state
                .retrievals
                .iter()
                .filter(|(_, r)| !r.claimed)
                .map(|(ptr, _)| *ptr)
                .collect();
            let drained: Vec<Retrieval> = unclaimed
                .into_iter()
                .filter_map(|ptr| state.retrievals.remove(&ptr))
                .collect();
            for retrieval in state.retrievals.values() {
                retrieval.cancel.cancel();
            }
            drained
        };
        for retrieval in drained {
            for tx in retrieval.waiters {
                let _ = tx.send(Err(FetchError::QueueShutDown));
            }
        }
        self.prefetcher().shutdown()
    }
}

impl Drop for BlockRetrievalQueue {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        self.shared.work.close();
    }
}
