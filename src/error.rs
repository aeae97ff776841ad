use std::fmt;
use std::io;

/// Pool construction error
///
/// Returned by [`Pool::new`](crate::worker_pool::Pool::new) when the pool
/// cannot be brought up. Anything already started is shut down again before
/// the error is returned.
#[derive(Debug)]
pub enum PoolError {
    /// A pool needs at least one worker
    ///
    /// With no workers no task could ever complete and shutdown would never
    /// return.
    NoWorkers,
    /// The may runtime refused to spawn a coroutine
    Spawn {
        /// Which coroutine failed to start (`"worker-3"`, `"coordinator"`)
        role: String,
        /// Underlying spawn error
        source: io::Error,
    },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::NoWorkers => {
                write!(f, "Pool configuration error: num_workers must be at least 1")
            }
            PoolError::Spawn { role, source } => {
                write!(f, "Failed to spawn {} coroutine: {}", role, source)
            }
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::NoWorkers => None,
            PoolError::Spawn { source, .. } => Some(source),
        }
    }
}
