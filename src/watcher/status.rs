use super::state::{Identity, PollStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of a watcher for status displays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherStatus {
    pub is_running: bool,
    /// Label of the watched collection while a session runs
    pub source: Option<String>,
    pub cursor: Option<Identity>,
    pub polls: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_poll_at: Option<DateTime<Utc>>,
}

impl WatcherStatus {
    pub(crate) fn new(
        is_running: bool,
        source: Option<String>,
        cursor: Option<Identity>,
        stats: PollStats,
    ) -> Self {
        Self {
            is_running,
            source,
            cursor,
            polls: stats.polls,
            failures: stats.failures,
            consecutive_failures: stats.consecutive_failures,
            last_error: stats.last_error,
            last_poll_at: stats.last_poll_at,
        }
    }
}
