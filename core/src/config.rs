//! Engine configuration
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Messages fetched per thread page (initial open and each backfill)
    pub thread_page_size: usize,

    /// Resubscribe attempts after an unexpected feed disconnect
    pub resubscribe_attempts: u32,

    /// Initial resubscribe backoff; doubles per attempt, capped at 30s
    pub resubscribe_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            thread_page_size: 50,
            resubscribe_attempts: 5,
            resubscribe_backoff: Duration::from_millis(500),
        }
    }
}

impl SyncConfig {
    pub(crate) fn page_size(&self) -> usize {
        self.thread_page_size.clamp(1, 500)
    }
}
