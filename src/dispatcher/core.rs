//! Dispatcher core module - hot path for task submission.
//!
//! `submit` runs on the publisher's thread or coroutine and must never block:
//! it takes the backlog lock, tries a non-blocking hand-off and, failing
//! that, parks the task in the backlog and makes sure a drain coroutine is
//! running. All waiting for workers happens on the drain coroutine.

use crate::backlog::{Backlog, EmptyListener};
use crate::handoff::HandOff;
use crate::ids::TaskId;
use crate::metrics::PoolMetrics;
use crate::task::Task;
use may::coroutine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Routes submitted tasks to idle workers, falling back to the backlog.
///
/// Owns the [`Backlog`] and the zero-capacity hand-off shared with the worker
/// coroutines. At most one drain coroutine runs at any time; the
/// `drain_active` flag is only ever claimed by compare-and-swap.
pub struct Dispatcher {
    backlog: Backlog,
    handoff: HandOff,
    drain_active: AtomicBool,
    metrics: Arc<PoolMetrics>,
    stack_size: usize,
}

impl Dispatcher {
    /// Create a dispatcher whose drain coroutines use `stack_size` bytes of stack
    #[must_use]
    pub fn new(stack_size: usize) -> Self {
        Self::with_metrics(stack_size, Arc::new(PoolMetrics::new()))
    }

    /// Create a dispatcher reporting into existing metrics
    #[must_use]
    pub fn with_metrics(stack_size: usize, metrics: Arc<PoolMetrics>) -> Self {
        Self {
            backlog: Backlog::new(),
            handoff: HandOff::new(),
            drain_active: AtomicBool::new(false),
            metrics,
            stack_size,
        }
    }

    /// Submit a task for execution.
    ///
    /// The task is recorded as dispatched and offered to an idle worker. If no
    /// worker is waiting it is demoted to pending and a drain coroutine is
    /// started unless one is already running.
    ///
    /// # Panics
    ///
    /// Panics if the dispatcher has been finalized.
    #[allow(clippy::panic)]
    pub fn submit(self: &Arc<Self>, task: Task) {
        if self.handoff.is_closed() {
            error!(
                task_id = %task.id(),
                handler_id = %task.handler(),
                "Task published after shutdown - CRITICAL"
            );
            panic!(
                "task {} for {} published after the pool shut down",
                task.id(),
                task.handler()
            );
        }

        let task_id = task.id();
        self.backlog.register(task_id);
        self.metrics.record_submit();

        match self.handoff.try_give(task) {
            Ok(()) => {
                self.metrics.record_direct_handoff();
                trace!(task_id = %task_id, "Task handed to idle worker");
            }
            Err(task) => {
                self.backlog.mark_pending(task);
                self.metrics.record_backlogged();
                trace!(task_id = %task_id, "No idle worker - task backlogged");
                if self.claim_drain() {
                    self.spawn_drain();
                }
            }
        }
    }

    fn claim_drain(&self) -> bool {
        self.drain_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn spawn_drain(self: &Arc<Self>) {
        let dispatcher = Arc::clone(self);

        // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
        // The drain closure owns an Arc to the dispatcher and touches no thread-local state.
        let spawn_result = unsafe {
            coroutine::Builder::new()
                .name("brrtpool-drain".to_string())
                .stack_size(self.stack_size)
                .spawn(move || dispatcher.drain())
        };

        if let Err(e) = spawn_result {
            // Leave the tasks pending; the next submit retries the drain.
            self.drain_active.store(false, Ordering::SeqCst);
            error!(
                error = %e,
                pending = self.backlog.pending_count(),
                "Failed to spawn drain coroutine"
            );
        }
    }

    /// Deliver pending tasks until none remain.
    ///
    /// Runs on its own coroutine while holding the drain flag.
    fn drain(&self) {
        self.metrics.record_drain_start();
        debug!(
            pending = self.backlog.pending_count(),
            "Backlog drain started"
        );

        let mut delivered: u64 = 0;
        loop {
            while let Some(task) = self.backlog.take_next() {
                match self.handoff.give(task) {
                    Ok(()) => delivered += 1,
                    Err(task) => {
                        warn!(
                            task_id = %task.id(),
                            delivered = delivered,
                            "Dispatcher finalized during drain - task left pending"
                        );
                        self.backlog.mark_pending(task);
                        self.metrics.record_drain_stop();
                        self.drain_active.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }

            self.metrics.record_drain_stop();
            self.drain_active.store(false, Ordering::SeqCst);

            // A submit may have demoted a task after the last take_next but
            // seen the flag still set; pick it up rather than strand it.
            if !self.backlog.has_pending() || !self.claim_drain() {
                break;
            }
            self.metrics.record_drain_start();
        }

        debug!(delivered = delivered, "Backlog drain finished");
    }

    /// Block the calling worker until a task is handed to it.
    ///
    /// Returns `None` once the dispatcher has been finalized.
    #[must_use]
    pub fn next_task(&self) -> Option<Task> {
        self.handoff.receive()
    }

    /// Remove a completed task from the backlog
    pub fn remove(&self, id: TaskId) -> bool {
        self.backlog.delete(id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backlog.is_empty()
    }

    /// Number of outstanding tasks, dispatched or pending
    #[must_use]
    pub fn backlog_size(&self) -> usize {
        self.backlog.size()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.backlog.pending_count()
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.drain_active.load(Ordering::SeqCst)
    }

    /// Number of workers currently parked waiting for a task
    #[must_use]
    pub fn idle_workers(&self) -> usize {
        self.handoff.parked_count()
    }

    /// Install the listener notified whenever the backlog becomes empty
    pub fn on_backlog_empty(&self, listener: EmptyListener) {
        self.backlog.set_empty_listener(listener);
    }

    /// Stop the dispatcher.
    ///
    /// Parked workers are released so their loops exit, a waiting drain gives
    /// up, and any further submission is a usage fault.
    pub fn finalize(&self) {
        if self.handoff.is_closed() {
            return;
        }
        self.handoff.close();
        debug!(
            outstanding = self.backlog.size(),
            "Dispatcher finalized"
        );
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.handoff.is_closed()
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<PoolMetrics> {
        &self.metrics
    }
}
