//! # Worker Pool Module
//!
//! Provides the public face of the crate: a fixed pool of worker coroutines,
//! the handler registry, and graceful shutdown.
//!
//! ## Features
//!
//! - **Fixed Worker Set**: `num_workers` coroutines started up front, all
//!   competing for tasks from the same hand-off
//! - **Typed Registration**: each handler gets its own payload and response
//!   types; the registry erases them behind a [`HandlerId`]
//! - **Recursive Work**: handlers receive their own [`Publisher`] and may
//!   publish follow-up tasks
//! - **Panic Containment**: handler panics are caught and logged; the task is
//!   still removed and the worker still reports idle
//! - **Graceful Shutdown**: [`Pool::shutdown`] waits for in-flight and
//!   backlogged work before closing response channels
//!
//! ## Configuration
//!
//! - `BRRTP_WORKERS`: Number of worker coroutines (default: 4)
//! - `BRRTP_STACK_SIZE`: Stack size for pool coroutines, decimal or `0x` hex
//!   (default: `0x10000`)
//!
//! ## Example
//!
//! ```rust,no_run
//! use brrtpool::worker_pool::Pool;
//!
//! let pool = Pool::with_workers(5).unwrap();
//! let (publisher, responses) = pool.register(|_p, word: String, out| {
//!     let _ = out.send(word.to_uppercase());
//! });
//!
//! publisher.publish("hello".to_string());
//! assert_eq!(responses.recv().unwrap(), "HELLO");
//!
//! pool.shutdown();
//! assert!(responses.recv().is_err());
//! ```

use crate::coordinator::{Coordinator, Reporter};
use crate::dispatcher::Dispatcher;
use crate::error::PoolError;
use crate::ids::{HandlerId, TaskId};
use crate::metrics::{MetricsSnapshot, PoolMetrics};
use crate::runtime_config::parse_stack_size;
use crate::task::{Payload, Publisher, Responder};
use arc_swap::ArcSwap;
use may::coroutine::{self, JoinHandle};
use may::sync::mpsc;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Configuration for a worker pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker coroutines
    pub num_workers: usize,
    /// Stack size for worker, drain and coordinator coroutines
    pub stack_size: usize,
}

impl PoolConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let num_workers = std::env::var("BRRTP_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.num_workers);

        let stack_size = std::env::var("BRRTP_STACK_SIZE")
            .ok()
            .and_then(|s| parse_stack_size(&s))
            .unwrap_or(defaults.stack_size);

        Self {
            num_workers,
            stack_size,
        }
    }

    /// Create a custom configuration
    pub fn new(num_workers: usize, stack_size: usize) -> Self {
        Self {
            num_workers,
            stack_size,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            stack_size: 0x10000, // 64KB
        }
    }
}

type Invoke = dyn Fn(Payload) + Send + Sync;

/// A registered handler with its publisher and responder bound in
struct Registration {
    id: HandlerId,
    invoke: Box<Invoke>,
}

/// Handler table read by every worker on every task
#[derive(Default)]
struct Registry {
    handlers: ArcSwap<HashMap<HandlerId, Arc<Registration>>>,
}

impl Registry {
    fn insert(&self, registration: Registration) {
        let registration = Arc::new(registration);
        self.handlers.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(registration.id, Arc::clone(&registration));
            next
        });
    }

    fn get(&self, id: HandlerId) -> Option<Arc<Registration>> {
        self.handlers.load().get(&id).cloned()
    }

    fn len(&self) -> usize {
        self.handlers.load().len()
    }

    /// Drop every registration, closing all response channels
    fn clear(&self) {
        self.handlers.store(Arc::new(HashMap::new()));
    }
}

/// A fixed pool of worker coroutines executing registered handlers
pub struct Pool {
    config: PoolConfig,
    dispatcher: Arc<Dispatcher>,
    coordinator: Coordinator,
    registry: Arc<Registry>,
    workers: Vec<JoinHandle<()>>,
    shut_down: bool,
}

impl Pool {
    /// Create a pool and start its worker coroutines.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoWorkers`] for a zero-sized pool and
    /// [`PoolError::Spawn`] if the may runtime cannot start a coroutine.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        if config.num_workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        info!(
            num_workers = config.num_workers,
            stack_size = config.stack_size,
            "Creating worker pool"
        );

        let metrics = Arc::new(PoolMetrics::new());
        let dispatcher = Arc::new(Dispatcher::with_metrics(config.stack_size, metrics));
        let coordinator =
            Coordinator::start(Arc::clone(&dispatcher), config.num_workers, config.stack_size)?;
        let registry = Arc::new(Registry::default());

        let mut pool = Self {
            config,
            dispatcher,
            coordinator,
            registry,
            workers: Vec::new(),
            shut_down: false,
        };

        for worker_id in 0..pool.config.num_workers {
            if let Err(e) = pool.spawn_worker(worker_id) {
                error!(
                    worker_id = worker_id,
                    error = %e,
                    "Failed to spawn worker coroutine"
                );
                // Nothing has been published yet, so this returns promptly.
                pool.shutdown_inner();
                return Err(e);
            }
        }

        Ok(pool)
    }

    /// Create a pool with `num_workers` workers and default settings otherwise
    pub fn with_workers(num_workers: usize) -> Result<Self, PoolError> {
        Self::new(PoolConfig {
            num_workers,
            ..PoolConfig::default()
        })
    }

    /// Create a pool configured from `BRRTP_*` environment variables
    pub fn from_env() -> Result<Self, PoolError> {
        Self::new(PoolConfig::from_env())
    }

    fn spawn_worker(&mut self, worker_id: usize) -> Result<(), PoolError> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let registry = Arc::clone(&self.registry);
        let reporter = self.coordinator.reporter();

        // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
        // The worker owns Arcs to everything it touches; handlers are Send + Sync + 'static.
        let spawn_result = unsafe {
            coroutine::Builder::new()
                .name(format!("brrtpool-worker-{worker_id}"))
                .stack_size(self.config.stack_size)
                .spawn(move || run_worker(worker_id, &dispatcher, &registry, &reporter))
        };

        let handle = spawn_result.map_err(|source| PoolError::Spawn {
            role: format!("worker-{worker_id}"),
            source,
        })?;
        self.workers.push(handle);
        Ok(())
    }

    /// Register a handler and get its publisher and response receiver.
    ///
    /// The handler is invoked once per published payload with the bound
    /// publisher (for follow-up work), the payload, and the responder feeding
    /// the returned receiver. The receiver disconnects once the pool has shut
    /// down.
    pub fn register<P, R, F>(&self, handler: F) -> (Publisher<P>, mpsc::Receiver<R>)
    where
        P: Send + 'static,
        R: Send + 'static,
        F: Fn(&Publisher<P>, P, &Responder<R>) + Send + Sync + 'static,
    {
        let id = HandlerId::next();
        let (tx, rx) = mpsc::channel::<R>();
        let publisher = Publisher::new(id, Arc::clone(&self.dispatcher));
        let bound = publisher.clone();
        let responder = Responder::new(tx);

        let invoke = move |payload: Payload| match payload.downcast::<P>() {
            Ok(payload) => handler(&bound, *payload, &responder),
            Err(_) => error!(
                handler_id = %id,
                expected = type_name::<P>(),
                "Payload type mismatch - task dropped"
            ),
        };

        self.registry.insert(Registration {
            id,
            invoke: Box::new(invoke),
        });

        info!(
            handler_id = %id,
            payload_type = type_name::<P>(),
            total_handlers = self.registry.len(),
            "Handler registered successfully"
        );

        (publisher, rx)
    }

    /// Shut the pool down gracefully.
    ///
    /// Blocks until every worker is idle and the backlog is empty, then stops
    /// the workers and closes every response channel. Run it from a dedicated
    /// thread if the caller needs to keep consuming responses meanwhile.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        debug!(
            outstanding = self.dispatcher.backlog_size(),
            "Pool shutdown started"
        );
        self.coordinator.shutdown();

        for (worker_id, handle) in self.workers.drain(..).enumerate() {
            if let Err(panic) = handle.join() {
                error!(worker_id = worker_id, panic_message = ?panic, "Worker coroutine panicked");
            }
        }

        self.registry.clear();
        info!(
            completed = self.dispatcher.metrics().get_completed_count(),
            "Pool shut down"
        );
    }

    /// Snapshot of the pool's counters
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.dispatcher.metrics().snapshot()
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.config.num_workers
    }

    /// Number of outstanding tasks, in flight or pending
    #[must_use]
    pub fn backlog_size(&self) -> usize {
        self.dispatcher.backlog_size()
    }

    /// Whether every worker is idle and nothing is outstanding
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.coordinator.is_done()
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if !self.shut_down {
            warn!("Pool dropped without shutdown - shutting down gracefully");
            self.shutdown_inner();
        }
    }
}

/// Runs the completion steps for a task on every exit path, unwinding included
struct CompletionGuard<'a> {
    task_id: TaskId,
    dispatcher: &'a Dispatcher,
    reporter: &'a Reporter,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.remove(self.task_id);
        self.dispatcher.metrics().record_completion();
        self.reporter.report_idle();
    }
}

fn run_worker(worker_id: usize, dispatcher: &Dispatcher, registry: &Registry, reporter: &Reporter) {
    debug!(worker_id = worker_id, "Worker coroutine started");

    while let Some(task) = dispatcher.next_task() {
        reporter.report_busy();
        let _guard = CompletionGuard {
            task_id: task.id(),
            dispatcher,
            reporter,
        };

        let task_id = task.id();
        let handler_id = task.handler();
        let Some(registration) = registry.get(handler_id) else {
            error!(
                task_id = %task_id,
                handler_id = %handler_id,
                worker_id = worker_id,
                "No handler registered for task - dropped"
            );
            continue;
        };

        if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            (registration.invoke)(task.into_payload());
        })) {
            dispatcher.metrics().record_panic();
            error!(
                task_id = %task_id,
                handler_id = %handler_id,
                worker_id = worker_id,
                panic_message = %panic_message(panic.as_ref()),
                "Handler panicked"
            );
        }
    }

    debug!(worker_id = worker_id, "Worker coroutine exiting");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
