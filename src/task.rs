//! # Task Module
//!
//! Tasks are the unit of work moved between publishers, the backlog and the
//! worker coroutines.
//!
//! - **[`Task`]** - handler identity plus a type-erased payload
//! - **[`Publisher`]** - per-handler handle that turns payloads into tasks
//! - **[`Responder`]** - per-handler result channel lent to the handler on
//!   every invocation
//!
//! A task is owned by exactly one place at a time: the backlog while it is
//! pending, the hand-off channel while in transit, or the worker running it.

use crate::dispatcher::Dispatcher;
use crate::ids::{HandlerId, TaskId};
use may::sync::mpsc;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Type-erased task payload
pub type Payload = Box<dyn Any + Send>;

/// A unit of work: which handler to run and what to run it with.
pub struct Task {
    id: TaskId,
    handler: HandlerId,
    payload: Payload,
}

impl Task {
    /// Create a task for `handler` carrying `payload`
    pub fn new(handler: HandlerId, payload: Payload) -> Self {
        Self {
            id: TaskId::new(),
            handler,
            payload,
        }
    }

    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub fn handler(&self) -> HandlerId {
        self.handler
    }

    /// Borrow the payload, e.g. to inspect it with `downcast_ref`
    #[must_use]
    pub fn payload(&self) -> &(dyn Any + Send) {
        self.payload.as_ref()
    }

    /// Consume the task, yielding its payload
    #[must_use]
    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}

/// Publishes tasks for one registered handler.
///
/// Obtained from [`Pool::register`](crate::worker_pool::Pool::register) and
/// also lent to the handler on every invocation, so handlers can generate
/// follow-up work. Cloning is cheap.
pub struct Publisher<P> {
    handler: HandlerId,
    dispatcher: Arc<Dispatcher>,
    _payload: PhantomData<fn(P)>,
}

impl<P: Send + 'static> Publisher<P> {
    pub(crate) fn new(handler: HandlerId, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            handler,
            dispatcher,
            _payload: PhantomData,
        }
    }

    /// Submit `payload` to the bound handler.
    ///
    /// Returns as soon as the task is either handed to an idle worker or
    /// recorded in the backlog; it never waits for delivery or completion.
    ///
    /// # Panics
    ///
    /// Panics if the pool has already shut down. Publishing after shutdown is
    /// a lifecycle violation by the caller.
    pub fn publish(&self, payload: P) {
        self.dispatcher
            .submit(Task::new(self.handler, Box::new(payload)));
    }

    #[must_use]
    pub fn handler_id(&self) -> HandlerId {
        self.handler
    }
}

impl<P> Clone for Publisher<P> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler,
            dispatcher: Arc::clone(&self.dispatcher),
            _payload: PhantomData,
        }
    }
}

impl<P> fmt::Debug for Publisher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}

/// Result channel for one registered handler.
///
/// Handlers only ever borrow the responder, so no sender can outlive the
/// registration: once the pool drops its registrations during shutdown the
/// matching receiver observes a closed channel.
pub struct Responder<R> {
    tx: mpsc::Sender<R>,
}

impl<R> Responder<R> {
    pub(crate) fn new(tx: mpsc::Sender<R>) -> Self {
        Self { tx }
    }

    /// Send a result to whoever holds the receiver.
    ///
    /// Returns the value back if the receiver has been dropped.
    pub fn send(&self, value: R) -> Result<(), R> {
        self.tx.send(value).map_err(|e| e.0)
    }
}

impl<R> fmt::Debug for Responder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_carries_handler_and_payload() {
        let handler = HandlerId::next();
        let task = Task::new(handler, Box::new("payload".to_string()));
        assert_eq!(task.handler(), handler);
        assert_eq!(
            task.payload().downcast_ref::<String>().map(String::as_str),
            Some("payload")
        );
        let payload = task.into_payload();
        assert_eq!(*payload.downcast::<String>().unwrap(), "payload");
    }

    #[test]
    fn test_identical_payloads_are_distinct_tasks() {
        let handler = HandlerId::next();
        let a = Task::new(handler, Box::new(1u32));
        let b = Task::new(handler, Box::new(1u32));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_publisher_records_task_in_backlog() {
        let dispatcher = Arc::new(Dispatcher::new(0x10000));
        let handler = HandlerId::next();
        let publisher: Publisher<&'static str> = Publisher::new(handler, Arc::clone(&dispatcher));

        publisher.publish("Publisher test data");

        assert_eq!(dispatcher.backlog_size(), 1);
        assert_eq!(publisher.handler_id(), handler);
        dispatcher.finalize();
    }

    #[test]
    fn test_responder_reports_dropped_receiver() {
        let (tx, rx) = mpsc::channel::<u32>();
        let responder = Responder::new(tx);
        assert_eq!(responder.send(1), Ok(()));
        assert_eq!(rx.recv().unwrap(), 1);
        drop(rx);
        assert_eq!(responder.send(2), Err(2));
    }
}
