//! # Runtime Configuration Module
//!
//! Environment-driven settings for the `may` coroutine scheduler that hosts
//! the pool's workers.
//!
//! ## Environment Variables
//!
//! ### `BRRTP_RUNTIME_THREADS`
//!
//! Number of OS threads the may scheduler runs coroutines on. Unset leaves
//! may's own default (one per CPU) in place.
//!
//! ### `BRRTP_STACK_SIZE`
//!
//! Default coroutine stack size. Accepts values in:
//! - Decimal: `65536` (64 KB)
//! - Hexadecimal: `0x10000` (64 KB)
//!
//! Default: `0x10000` (64 KB)
//!
//! Handlers that recurse deeply or unwind through large frames (panicking
//! handlers do) need more than the default.
//!
//! ## Usage
//!
//! ```rust
//! use brrtpool::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! config.apply();
//! println!("Stack size: {} bytes", config.stack_size);
//! ```

use std::env;

/// Default coroutine stack size (64 KB)
pub const DEFAULT_STACK_SIZE: usize = 0x10000;

/// Parse a stack size given in decimal or `0x`-prefixed hex
#[must_use]
pub fn parse_stack_size(value: &str) -> Option<usize> {
    let value = value.trim();
    if let Some(hex) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        usize::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

/// Scheduler configuration loaded from environment variables.
///
/// Load this once at startup, before the first pool is created, and call
/// [`RuntimeConfig::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Scheduler worker threads; `None` keeps may's default
    pub scheduler_threads: Option<usize>,
    /// Default coroutine stack size in bytes
    pub stack_size: usize,
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let scheduler_threads = env::var("BRRTP_RUNTIME_THREADS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&n: &usize| n > 0);
        let stack_size = env::var("BRRTP_STACK_SIZE")
            .ok()
            .and_then(|s| parse_stack_size(&s))
            .unwrap_or(DEFAULT_STACK_SIZE);
        RuntimeConfig {
            scheduler_threads,
            stack_size,
        }
    }

    /// Push these settings into the global may configuration
    pub fn apply(&self) {
        if let Some(threads) = self.scheduler_threads {
            may::config().set_workers(threads);
        }
        may::config().set_stack_size(self.stack_size);
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scheduler_threads: None,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}
