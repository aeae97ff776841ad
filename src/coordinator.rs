//! # Coordinator Module
//!
//! The coordinator decides when a pool may terminate. It tallies worker
//! busy/idle reports and watches the backlog, and it releases a pending
//! shutdown request only once every worker is idle and the backlog is empty at
//! the same time.
//!
//! ## States
//!
//! - **Active** - initial state; reports are tallied
//! - **ShuttingDown** - a shutdown was requested; the termination check runs
//!   after every message
//! - **Terminated** - all workers idle and backlog empty; the dispatcher is
//!   finalized and the shutdown caller released
//!
//! ## Serialization
//!
//! Busy/idle reports, backlog-empty notifications and the shutdown request all
//! travel over one channel consumed by one coroutine. That loop is the only
//! writer of the tallies; everyone else reads mirrored atomics.

use crate::dispatcher::Dispatcher;
use crate::error::PoolError;
use may::coroutine::{self, JoinHandle};
use may::sync::mpsc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle state of a [`Coordinator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Active,
    ShuttingDown,
    Terminated,
}

impl CoordinatorState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::ShuttingDown => 1,
            Self::Terminated => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::ShuttingDown,
            _ => Self::Terminated,
        }
    }
}

enum Signal {
    Busy,
    Idle,
    BacklogEmpty,
    Shutdown(mpsc::Sender<()>),
}

/// Read-only mirrors of the loop's tallies
struct Shared {
    pool_size: usize,
    idle: AtomicUsize,
    state: AtomicU8,
}

impl Shared {
    fn set_state(&self, state: CoordinatorState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }
}

/// Handle workers use to report busy/idle transitions
#[derive(Clone)]
pub struct Reporter {
    tx: mpsc::Sender<Signal>,
}

impl Reporter {
    /// A worker picked up a task
    pub fn report_busy(&self) {
        let _ = self.tx.send(Signal::Busy);
    }

    /// A worker finished a task
    pub fn report_idle(&self) {
        let _ = self.tx.send(Signal::Idle);
    }
}

/// Gates graceful termination of a pool of `pool_size` workers
pub struct Coordinator {
    tx: mpsc::Sender<Signal>,
    shared: Arc<Shared>,
    dispatcher: Arc<Dispatcher>,
    handle: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Start the coordinator loop for `pool_size` workers, all initially idle.
    ///
    /// Installs the dispatcher's backlog-empty listener, so a dispatcher can
    /// only ever be coordinated once.
    pub fn start(
        dispatcher: Arc<Dispatcher>,
        pool_size: usize,
        stack_size: usize,
    ) -> Result<Self, PoolError> {
        let (tx, rx) = mpsc::channel::<Signal>();
        let shared = Arc::new(Shared {
            pool_size,
            idle: AtomicUsize::new(pool_size),
            state: AtomicU8::new(CoordinatorState::Active.as_u8()),
        });

        // At most one empty notification is ever queued; the loop clears the
        // flag when it consumes it.
        let empty_pending = Arc::new(AtomicBool::new(false));
        {
            let tx = tx.clone();
            let empty_pending = Arc::clone(&empty_pending);
            dispatcher.on_backlog_empty(Box::new(move || {
                if !empty_pending.swap(true, Ordering::SeqCst) {
                    let _ = tx.send(Signal::BacklogEmpty);
                }
            }));
        }

        let loop_shared = Arc::clone(&shared);
        let loop_dispatcher = Arc::clone(&dispatcher);

        // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
        // The loop owns everything it touches through Arcs and the channel receiver.
        let spawn_result = unsafe {
            coroutine::Builder::new()
                .name("brrtpool-coordinator".to_string())
                .stack_size(stack_size)
                .spawn(move || run(rx, loop_shared, loop_dispatcher, empty_pending))
        };

        let handle = spawn_result.map_err(|source| PoolError::Spawn {
            role: "coordinator".to_string(),
            source,
        })?;

        debug!(pool_size = pool_size, "Coordinator started");

        Ok(Self {
            tx,
            shared,
            dispatcher,
            handle: Some(handle),
        })
    }

    /// Reporter for a worker coroutine
    #[must_use]
    pub fn reporter(&self) -> Reporter {
        Reporter {
            tx: self.tx.clone(),
        }
    }

    /// Request graceful termination and block until it is reached.
    ///
    /// Returns immediately if the pool is already idle with an empty backlog.
    /// Calling it again after termination is a no-op.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        let (reply_tx, reply_rx) = mpsc::channel();
        if self.tx.send(Signal::Shutdown(reply_tx)).is_ok() {
            // An Err means the loop is gone, which only happens after termination.
            let _ = reply_rx.recv();
        }

        if let Err(panic) = handle.join() {
            warn!(panic_message = ?panic, "Coordinator loop panicked");
        }
    }

    /// All workers idle and nothing outstanding in the backlog
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.shared.idle.load(Ordering::SeqCst) == self.shared.pool_size
            && self.dispatcher.is_empty()
    }

    /// Idle workers as of the last processed report
    #[must_use]
    pub fn idle_workers(&self) -> usize {
        self.shared.idle.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.shared.pool_size
    }

    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        CoordinatorState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }
}

fn run(
    rx: mpsc::Receiver<Signal>,
    shared: Arc<Shared>,
    dispatcher: Arc<Dispatcher>,
    empty_pending: Arc<AtomicBool>,
) {
    let pool_size = shared.pool_size;
    let mut idle = pool_size;
    let mut waiter: Option<mpsc::Sender<()>> = None;

    for signal in rx.iter() {
        match signal {
            Signal::Busy => {
                if idle == 0 {
                    warn!(pool_size = pool_size, "Busy report with no idle workers - ignored");
                } else {
                    idle -= 1;
                }
            }
            Signal::Idle => {
                if idle == pool_size {
                    warn!(pool_size = pool_size, "Idle report with every worker idle - ignored");
                } else {
                    idle += 1;
                }
            }
            Signal::BacklogEmpty => {
                empty_pending.store(false, Ordering::SeqCst);
            }
            Signal::Shutdown(reply) => {
                info!(
                    idle_workers = idle,
                    pool_size = pool_size,
                    outstanding = dispatcher.backlog_size(),
                    "Shutdown requested"
                );
                waiter = Some(reply);
                shared.set_state(CoordinatorState::ShuttingDown);
            }
        }
        shared.idle.store(idle, Ordering::SeqCst);

        if waiter.is_some() && idle == pool_size && dispatcher.is_empty() {
            dispatcher.finalize();
            shared.set_state(CoordinatorState::Terminated);
            info!(pool_size = pool_size, "All workers idle and backlog empty - terminated");
            if let Some(reply) = waiter.take() {
                let _ = reply.send(());
            }
            return;
        }
    }
}
