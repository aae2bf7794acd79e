// src/limiter.rs
//
// Bounded-concurrency task limiter
// Admission is counter-gated; submissions made while every slot is taken
// wait in a FIFO queue of one-shot grant channels, so start order is fixed
// at submit() time rather than at first poll.

use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::Either;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::config::LimiterConfig;
use crate::metrics::{LimiterMetrics, LimiterStats};

/// Caps how many submitted tasks run at once.
///
/// Tasks are handed over as factories; the limiter decides when each factory
/// is invoked. Submissions made while all slots are occupied wait in a
/// strict FIFO queue and are started one by one as slots free up, in
/// submission order. A completed task's outcome (value or error) is relayed
/// to its own submitter untouched; a failing task has no effect on the
/// scheduling of any other task.
///
/// Cloning is shallow: clones share the same slots, queue, and counters.
#[derive(Clone, Debug)]
pub struct Limiter {
    inner: Arc<Inner>,
}

impl Limiter {
    /// Creates a limiter that allows at most `max_concurrency` tasks to run
    /// simultaneously.
    pub fn new(max_concurrency: NonZeroUsize) -> Self {
        debug!(
            max_concurrency = max_concurrency.get(),
            "creating bounded limiter"
        );
        Self {
            inner: Arc::new(Inner {
                max_slots: Some(max_concurrency.get()),
                state: Mutex::new(State::default()),
                metrics: LimiterMetrics::default(),
            }),
        }
    }

    /// Creates a limiter with the gate disabled: every submission invokes
    /// its factory immediately, with no queuing and no bound.
    pub fn passthrough() -> Self {
        debug!("creating pass-through limiter");
        Self {
            inner: Arc::new(Inner {
                max_slots: None,
                state: Mutex::new(State::default()),
                metrics: LimiterMetrics::default(),
            }),
        }
    }

    /// Builds a limiter from a [`LimiterConfig`], resolving its limit
    /// policy to a concrete slot count.
    pub fn from_config(config: &LimiterConfig) -> Self {
        match config.limit.resolve() {
            Some(n) => Self::new(n),
            None => Self::passthrough(),
        }
    }

    /// Submits a task factory, returning a future that settles with exactly
    /// the output of the factory's own future.
    ///
    /// Admission happens inside this call: a free slot is claimed before
    /// `submit` returns, and a saturated limiter appends the submission to
    /// the queue before `submit` returns. Queue position is therefore
    /// decided by call order, even when the returned futures are later
    /// polled out of order (e.g. after `tokio::spawn`).
    ///
    /// On a pass-through limiter the factory is invoked synchronously,
    /// inside this call, and its future is relayed as-is.
    ///
    /// Dropping the returned future before completion abandons the task:
    /// a queued entry is skipped when its turn comes, and a running task's
    /// slot is released for the queue head.
    pub fn submit<F, Fut>(&self, make_task: F) -> impl Future<Output = Fut::Output> + use<F, Fut>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.inner.metrics.record_submitted();

        let Some(max) = self.inner.max_slots else {
            // Pass-through: invoke in the caller's turn, relay verbatim.
            self.inner.metrics.record_started();
            let task = make_task();
            let inner = Arc::clone(&self.inner);
            return Either::Left(async move {
                let output = task.await;
                inner.metrics.record_settled();
                output
            });
        };

        let admission = {
            let mut state = self.inner.lock_state();
            if state.active < max {
                state.active += 1;
                trace!(active = state.active, "slot claimed at submit");
                Admission::Ready(Slot::new(&self.inner))
            } else {
                let (grant_tx, grant_rx) = oneshot::channel();
                state.queue.push_back(grant_tx);
                trace!(queued = state.queue.len(), "task queued");
                Admission::Queued(grant_rx)
            }
        };

        let inner = Arc::clone(&self.inner);
        Either::Right(async move {
            let slot = match admission {
                Admission::Ready(slot) => slot,
                Admission::Queued(grant_rx) => match grant_rx.await {
                    Ok(slot) => slot,
                    // The sender sits in the queue owned by `inner`, which
                    // this future keeps alive, and is only ever consumed by
                    // delivering a grant.
                    Err(_) => unreachable!("grant channel closed without a grant"),
                },
            };
            inner.metrics.record_started();
            trace!("task starting");
            let output = make_task().await;
            inner.metrics.record_settled();
            trace!("task settled");
            drop(slot);
            output
        })
    }

    /// Claims a slot without waiting.
    ///
    /// Returns `None` when every slot is occupied. Never queues. A
    /// pass-through limiter always grants.
    pub fn try_acquire(&self) -> Option<RunPermit> {
        let Some(max) = self.inner.max_slots else {
            return Some(RunPermit {
                slot: None,
                inner: Arc::clone(&self.inner),
            });
        };
        let mut state = self.inner.lock_state();
        if state.active < max {
            state.active += 1;
            trace!(active = state.active, "slot claimed via try_acquire");
            drop(state);
            Some(RunPermit {
                slot: Some(Slot::new(&self.inner)),
                inner: Arc::clone(&self.inner),
            })
        } else {
            None
        }
    }

    /// The slot cap, or `None` for a pass-through limiter.
    pub fn max_concurrency(&self) -> Option<usize> {
        self.inner.max_slots
    }

    /// Whether this limiter was built with the gate disabled.
    pub fn is_passthrough(&self) -> bool {
        self.inner.max_slots.is_none()
    }

    /// Number of slots currently occupied. Always 0 for a pass-through
    /// limiter, which performs no slot accounting.
    pub fn active(&self) -> usize {
        self.inner.lock_state().active
    }

    /// Number of submissions waiting for a slot.
    pub fn queued(&self) -> usize {
        self.inner.lock_state().queue.len()
    }

    /// Point-in-time snapshot of occupancy and lifetime counters.
    pub fn stats(&self) -> LimiterStats {
        let (active, queued) = {
            let state = self.inner.lock_state();
            (state.active, state.queue.len())
        };
        let metrics = &self.inner.metrics;
        LimiterStats {
            max_concurrency: self.inner.max_slots,
            active,
            queued,
            submitted: metrics.submitted(),
            started: metrics.started(),
            settled: metrics.settled(),
        }
    }
}

/// A slot claimed via [`Limiter::try_acquire`], ready to run one task.
///
/// Dropping an unused permit returns the slot to the limiter.
#[derive(Debug)]
pub struct RunPermit {
    /// `None` for pass-through limiters, which hand out unaccounted permits.
    slot: Option<Slot>,
    inner: Arc<Inner>,
}

impl RunPermit {
    /// Runs a task under this permit, relaying its output unchanged.
    pub async fn run<F, Fut>(self, make_task: F) -> Fut::Output
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.inner.metrics.record_submitted();
        self.inner.metrics.record_started();
        let output = make_task().await;
        self.inner.metrics.record_settled();
        drop(self.slot);
        output
    }
}

#[derive(Debug)]
struct Inner {
    /// `None` marks a pass-through limiter: no bound, no queue.
    max_slots: Option<usize>,
    state: Mutex<State>,
    metrics: LimiterMetrics,
}

#[derive(Debug, Default)]
struct State {
    /// Occupied slots. Invariant: `active <= max_slots`.
    active: usize,
    /// Pending submissions, oldest first. Each entry is the grant side of a
    /// one-shot channel whose receiver lives inside the future `submit`
    /// returned.
    queue: VecDeque<oneshot::Sender<Slot>>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        // No user code runs under the lock, so a poisoned state is still
        // consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands a freed slot to the queue head, or retires it when the queue
    /// is empty. Entries whose receiver was dropped while waiting are
    /// skipped.
    fn release(inner: &Arc<Inner>) {
        loop {
            let next = {
                let mut state = inner.lock_state();
                match state.queue.pop_front() {
                    Some(grant_tx) => grant_tx,
                    None => {
                        state.active -= 1;
                        trace!(active = state.active, "slot retired");
                        return;
                    }
                }
            };
            match next.send(Slot::new(inner)) {
                Ok(()) => {
                    trace!("slot handed to queue head");
                    return;
                }
                Err(mut slot) => {
                    // Abandoned entry; keep the slot and try the next one.
                    slot.armed = false;
                    trace!("skipping abandoned queue entry");
                }
            }
        }
    }
}

/// Owner of one occupied concurrency slot.
#[derive(Debug)]
struct Slot {
    inner: Arc<Inner>,
    /// Disarmed slots release nothing on drop; used when a grant bounces
    /// off an abandoned queue entry and ownership stays with `release`.
    armed: bool,
}

impl Slot {
    fn new(inner: &Arc<Inner>) -> Self {
        Self {
            inner: Arc::clone(inner),
            armed: true,
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.armed {
            Inner::release(&self.inner);
        }
    }
}

enum Admission {
    Ready(Slot),
    Queued(oneshot::Receiver<Slot>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounded(n: usize) -> Limiter {
        Limiter::new(NonZeroUsize::new(n).unwrap())
    }

    #[tokio::test]
    async fn dropping_queued_future_skips_it() {
        let limiter = bounded(1);
        let (hold_tx, hold_rx) = oneshot::channel::<()>();

        let first = tokio::spawn({
            let limiter = limiter.clone();
            async move {
                limiter
                    .submit(|| async move {
                        hold_rx.await.ok();
                    })
                    .await
            }
        });
        // Let the first task occupy the slot.
        tokio::task::yield_now().await;
        assert_eq!(limiter.active(), 1);

        let abandoned = limiter.submit(|| async { 1u32 });
        let kept = limiter.submit(|| async { 2u32 });
        assert_eq!(limiter.queued(), 2);

        drop(abandoned);
        hold_tx.send(()).unwrap();
        first.await.unwrap();

        assert_eq!(kept.await, 2);
        assert_eq!(limiter.active(), 0);
        assert_eq!(limiter.queued(), 0);
    }

    #[tokio::test]
    async fn dropping_running_future_frees_its_slot() {
        let limiter = bounded(1);

        let mut running = Box::pin(limiter.submit(|| std::future::pending::<()>()));
        assert!(futures::poll!(running.as_mut()).is_pending());
        assert_eq!(limiter.active(), 1);

        drop(running);
        assert_eq!(limiter.active(), 0);

        assert_eq!(limiter.submit(|| async { 9 }).await, 9);
    }

    #[tokio::test]
    async fn try_acquire_respects_occupancy() {
        let limiter = bounded(1);

        let permit = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
        assert_eq!(permit.run(|| async { 3 }).await, 3);

        // Slot returned after the permitted task settled.
        assert!(limiter.try_acquire().is_some());
    }

    #[tokio::test]
    async fn unused_permit_returns_its_slot() {
        let limiter = bounded(1);
        let permit = limiter.try_acquire().unwrap();
        drop(permit);
        assert_eq!(limiter.active(), 0);
    }

    #[tokio::test]
    async fn stats_count_every_settlement() {
        let limiter = bounded(2);

        for i in 0..4u64 {
            let out = limiter.submit(|| async move { i }).await;
            assert_eq!(out, i);
        }

        let stats = limiter.stats();
        assert_eq!(stats.max_concurrency, Some(2));
        assert_eq!(stats.submitted, 4);
        assert_eq!(stats.started, 4);
        assert_eq!(stats.settled, 4);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.queued, 0);
    }
}
