//! # brrtpool
//!
//! **brrtpool** is an in-process task dispatcher for Rust built on the `may`
//! coroutine runtime. A fixed pool of worker coroutines executes handlers that
//! are registered at runtime; each handler gets a typed publisher for
//! submitting work and a channel for its results.
//!
//! ## Overview
//!
//! Publishing never blocks. If a worker is idle the task is handed to it
//! directly; otherwise it is parked in the backlog and a single on-demand drain
//! coroutine feeds it to the next worker that frees up. Handlers may publish
//! more work from inside a task. Shutdown is graceful: it waits until every
//! worker is idle and the backlog is empty, including work published by work,
//! before closing the result channels.
//!
//! ## Architecture
//!
//! - **[`worker_pool`]** - The [`Pool`]: workers, handler registry, shutdown
//! - **[`task`]** - Tasks, typed [`Publisher`]s and [`Responder`]s
//! - **[`dispatcher`]** - Direct hand-off to idle workers and the drain process
//! - **[`backlog`]** - Outstanding-task bookkeeping (dispatched vs pending)
//! - **[`coordinator`]** - Busy/idle accounting that gates termination
//! - **[`metrics`]** - Lock-free counters and serializable snapshots
//! - **[`ids`]** - ULID task ids and handler ids
//! - **[`runtime_config`]** / **[`logging`]** - Environment-driven setup
//!
//! ```mermaid
//! sequenceDiagram
//!     participant App
//!     participant Pool
//!     participant Dispatcher
//!     participant Worker as Worker<br/>(Coroutine)
//!     participant Coordinator as Coordinator<br/>(Coroutine)
//!
//!     App->>Pool: register(handler)
//!     Pool-->>App: (Publisher, Receiver)
//!     App->>Dispatcher: publisher.publish(payload)
//!     Dispatcher->>Worker: hand-off (direct or via drain)
//!     Worker->>Coordinator: busy
//!     Worker->>App: responder.send(result)
//!     Worker->>Dispatcher: remove(task id)
//!     Worker->>Coordinator: idle
//!     App->>Pool: shutdown()
//!     Pool->>Coordinator: shutdown request
//!     Coordinator->>Dispatcher: finalize (all idle, backlog empty)
//!     Coordinator-->>Pool: terminated
//!     Pool-->>App: result channels closed
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use brrtpool::Pool;
//!
//! let pool = Pool::with_workers(5).expect("pool");
//! let (publisher, results) = pool.register(|publisher, n: u64, out| {
//!     // Count down, publishing the next step as a new task.
//!     let _ = out.send(n);
//!     if n > 0 {
//!         publisher.publish(n - 1);
//!     }
//! });
//!
//! publisher.publish(3);
//! pool.shutdown();
//!
//! let mut seen: Vec<u64> = results.iter().collect();
//! seen.sort_unstable();
//! assert_eq!(seen, vec![0, 1, 2, 3]);
//! ```
//!
//! ## Runtime
//!
//! All pool coroutines run on the global `may` scheduler. Configure it before
//! creating pools, e.g. with [`runtime_config::RuntimeConfig::from_env`].
//! Handlers run on coroutines and should use may's blocking primitives
//! (`may::coroutine::sleep`, may channels) rather than blocking OS threads.

pub mod backlog;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
mod handoff;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod runtime_config;
pub mod task;
pub mod worker_pool;

pub use error::PoolError;
pub use ids::{HandlerId, TaskId};
pub use metrics::MetricsSnapshot;
pub use task::{Publisher, Responder};
pub use worker_pool::{Pool, PoolConfig};
