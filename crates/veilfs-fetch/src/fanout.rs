//! Fan-in completion counting for sibling prefetches.
//!
//! One parent block's prefetch round spawns N child requests sharing one
//! [`Fanout`]. Every child decrements the counter exactly once on terminal
//! outcome (success, failure, cache hit, rejected admission); at zero the
//! round's [`DoneSignal`] fires, once, for every listener.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

struct FanoutInner {
    remaining: AtomicUsize,
    done: CancellationToken,
}

/// Decrement-to-zero counter for one batch of sibling prefetches.
///
/// Cloning shares the counter. Each request holds a clone; the counter holds
/// no references back to requests, so there is no cycle to break.
#[derive(Clone)]
pub struct Fanout {
    inner: Arc<FanoutInner>,
}

impl Fanout {
    /// Counter pre-set to the fan-out size. A zero-sized fan-out is done
    /// immediately.
    pub fn new(count: usize) -> Self {
        let done = CancellationToken::new();
        if count == 0 {
            done.cancel();
        }
        Self {
            inner: Arc::new(FanoutInner {
                remaining: AtomicUsize::new(count),
                done,
            }),
        }
    }

    /// The signal that fires when the counter reaches zero.
    pub fn signal(&self) -> DoneSignal {
        DoneSignal {
            done: self.inner.done.clone(),
        }
    }

    /// Record one terminal outcome. Must be called exactly once per slot.
    pub fn complete_one(&self) {
        let prev = self.inner.remaining.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "fanout decremented below zero");
        if prev == 1 {
            self.inner.done.cancel();
        }
    }
}

/// Broadcast one-shot: fires once, observable by any number of clones, and
/// stays fired forever.
#[derive(Clone)]
pub struct DoneSignal {
    done: CancellationToken,
}

impl DoneSignal {
    /// A signal that has already fired, for fan-outs with nothing to do.
    pub fn already_done() -> Self {
        let done = CancellationToken::new();
        done.cancel();
        Self { done }
    }

    pub(crate) fn from_token(done: CancellationToken) -> Self {
        Self { done }
    }

    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Wait for the signal to fire. Returns immediately if it already has.
    pub async fn wait(&self) {
        self.done.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_count_is_done_immediately() {
        let fanout = Fanout::new(0);
        assert!(fanout.signal().is_done());
    }

    #[test]
    fn fires_exactly_at_zero() {
        let fanout = Fanout::new(3);
        let signal = fanout.signal();
        fanout.complete_one();
        fanout.complete_one();
        assert!(!signal.is_done());
        fanout.complete_one();
        assert!(signal.is_done());
    }

    #[test]
    fn clones_share_the_counter() {
        let fanout = Fanout::new(2);
        let signal = fanout.signal();
        let other = fanout.clone();
        fanout.complete_one();
        other.complete_one();
        assert!(signal.is_done());
    }

    #[tokio::test]
    async fn wait_resolves_after_fire() {
        let fanout = Fanout::new(1);
        let signal = fanout.signal();
        let waiter = tokio::spawn(async move { signal.wait().await });
        fanout.complete_one();
        waiter.await.expect("waiter should resolve");
    }

    #[tokio::test]
    async fn already_done_wait_is_instant() {
        DoneSignal::already_done().wait().await;
    }
}
