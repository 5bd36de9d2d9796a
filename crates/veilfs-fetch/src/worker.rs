//! Retrieval worker: pops the highest-priority queued retrieval, drives the
//! block getter, and hands the outcome back to the queue for finalization.

use std::sync::Arc;

use tracing::trace;

use crate::queue::{ClaimedRetrieval, QueueShared};

pub(crate) struct RetrievalWorker {
    shared: Arc<QueueShared>,
}

impl RetrievalWorker {
    pub(crate) fn new(shared: Arc<QueueShared>) -> Self {
        Self { shared }
    }

    pub(crate) async fn run(self) {
        trace!("retrieval worker started");
        loop {
            tokio::select! {
                () = self.shared.shutdown.cancelled() => break,
                permit = self.shared.work.acquire() => {
                    match permit {
                        Ok(permit) => permit.forget(),
                        Err(_) => break,
                    }
                    // Permits can outnumber live entries when a priority
                    // bump re-queues a retrieval; an empty claim is fine.
                    let Some(claim) = self.shared.claim_next() else {
                        continue;
                    };
                    self.process(claim).await;
                }
            }
        }
        trace!("retrieval worker stopped");
    }

    async fn process(&self, claim: ClaimedRetrieval) {
        let ClaimedRetrieval {
            ptr,
            kmd,
            block,
            cancel,
        } = claim;
        trace!(%ptr, "retrieving block");
        let result = self.shared.getter.get_block(&kmd, ptr, block, cancel).await;
        self.shared.finalize(ptr, result).await;
    }
}
