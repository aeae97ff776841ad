//! Zero-capacity hand-off between the dispatcher and idle workers.
//!
//! An idle worker parks by leaving a one-shot sender in the parked list and
//! blocking on the matching receiver. Giving a task pops one parked worker and
//! sends to it, so a task only ever moves when a worker is already waiting for
//! it. Nothing is buffered.
//!
//! `try_give` never blocks. `give` waits for a worker to park; it is only used
//! by the drain coroutine, which is the sole consumer of the wake-up channel.

use crate::task::Task;
use may::sync::mpsc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Parked {
    closed: bool,
    slots: Vec<mpsc::Sender<Task>>,
}

pub(crate) struct HandOff {
    parked: Mutex<Parked>,
    // Set while a wake-up token is in flight; keeps at most one queued.
    wake_pending: AtomicBool,
    wake_tx: mpsc::Sender<()>,
    wake_rx: mpsc::Receiver<()>,
}

impl HandOff {
    pub(crate) fn new() -> Self {
        let (wake_tx, wake_rx) = mpsc::channel();
        Self {
            parked: Mutex::new(Parked::default()),
            wake_pending: AtomicBool::new(false),
            wake_tx,
            wake_rx,
        }
    }

    fn parked(&self) -> MutexGuard<'_, Parked> {
        self.parked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Park the calling worker until a task arrives.
    ///
    /// Returns `None` once the hand-off has been closed.
    pub(crate) fn receive(&self) -> Option<Task> {
        let (tx, rx) = mpsc::channel();
        {
            let mut parked = self.parked();
            if parked.closed {
                return None;
            }
            parked.slots.push(tx);
        }
        self.wake();
        rx.recv().ok()
    }

    /// Hand `task` to a parked worker without blocking.
    ///
    /// Gives the task back when no worker is parked or the hand-off is closed.
    pub(crate) fn try_give(&self, task: Task) -> Result<(), Task> {
        let mut task = task;
        loop {
            let slot = {
                let mut parked = self.parked();
                if parked.closed {
                    return Err(task);
                }
                parked.slots.pop()
            };
            let Some(slot) = slot else {
                return Err(task);
            };
            match slot.send(task) {
                Ok(()) => return Ok(()),
                // The parked receiver is gone; try the next worker.
                Err(e) => task = e.0,
            }
        }
    }

    /// Hand `task` to a worker, waiting for one to park if necessary.
    ///
    /// Gives the task back only if the hand-off is closed while waiting.
    pub(crate) fn give(&self, task: Task) -> Result<(), Task> {
        let mut task = task;
        loop {
            match self.try_give(task) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    if self.is_closed() {
                        return Err(returned);
                    }
                    task = returned;
                    // wake_tx lives as long as self, so recv cannot fail here.
                    let _ = self.wake_rx.recv();
                    self.wake_pending.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    fn wake(&self) {
        if !self.wake_pending.swap(true, Ordering::SeqCst) {
            let _ = self.wake_tx.send(());
        }
    }

    /// Close the hand-off: parked workers are released with `None` and any
    /// waiting `give` returns its task.
    pub(crate) fn close(&self) {
        {
            let mut parked = self.parked();
            parked.closed = true;
            parked.slots.clear();
        }
        self.wake_pending.store(true, Ordering::SeqCst);
        let _ = self.wake_tx.send(());
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.parked().closed
    }

    /// Number of workers currently parked
    pub(crate) fn parked_count(&self) -> usize {
        self.parked().slots.len()
    }
}
