//! # Dispatcher Module
//!
//! The dispatcher moves submitted tasks to worker coroutines. It owns the
//! [`Backlog`](crate::backlog::Backlog) and the zero-capacity hand-off that
//! connects publishers and the drain process to idle workers.
//!
//! ## Overview
//!
//! Every submission goes through the same steps:
//!
//! 1. The task is registered in the backlog as dispatched
//! 2. A non-blocking hand-off is attempted
//! 3. If a worker was parked, it now owns the task - nothing else to do
//! 4. Otherwise the task is demoted to pending and, unless one is already
//!    running, a drain coroutine is started
//!
//! The drain coroutine claims pending tasks one at a time and blocks until a
//! worker parks for each of them. It exits once nothing is pending, re-checking
//! after releasing the drain flag so a task demoted in that window is never
//! stranded.
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Publisher
//!     participant Dispatcher
//!     participant Backlog
//!     participant Drain as Drain<br/>(Coroutine)
//!     participant Worker as Worker<br/>(Coroutine)
//!
//!     Publisher->>Dispatcher: submit(task)
//!     Dispatcher->>Backlog: register(id)
//!     alt worker parked
//!         Dispatcher->>Worker: hand-off
//!     else no worker parked
//!         Dispatcher->>Backlog: mark_pending(task)
//!         Dispatcher->>Drain: spawn (if not running)
//!         Drain->>Backlog: take_next()
//!         Drain->>Worker: blocking hand-off
//!     end
//!     Worker->>Dispatcher: remove(id)
//! ```
//!
//! ## Ordering
//!
//! Tasks handed off directly reach a worker before `submit` returns. Once
//! backpressure sets in, pending tasks are delivered in no particular order.
//!
//! ## Shutdown
//!
//! [`Dispatcher::finalize`] closes the hand-off: parked workers are released,
//! a waiting drain gives its task back, and further submissions panic.

mod core;

pub use core::Dispatcher;
