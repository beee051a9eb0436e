use std::time::Duration;

use crate::constants::{DEFAULT_BATCH_MAX, DEFAULT_FLUSH_DELAY_MS};

/// Which key pair and server-side mode the session runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Development,
    Production,
}

/// What happens to records whose flush failed.
///
/// Only `Drop` exists today. The enum keeps the fire-and-forget contract
/// explicit so retry policies can be added later without changing call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    Drop,
}

/// Flush policy for the request queue.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub enabled: bool,
    /// Buffered count that triggers an immediate flush.
    pub max_size: usize,
    /// Flush deadline measured from the first unflushed enqueue.
    pub flush_delay: Duration,
    pub on_failure: OnFailure,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: DEFAULT_BATCH_MAX,
            flush_delay: Duration::from_millis(DEFAULT_FLUSH_DELAY_MS),
            on_failure: OnFailure::Drop,
        }
    }
}
