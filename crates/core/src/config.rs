// Scheduler tunables shared by the lifecycle, queue and sweeper

use serde::{Deserialize, Serialize};

/// Heartbeat window after which a running job counts as orphaned
pub const DEFAULT_HEARTBEAT_WINDOW_MS: i64 = 300_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Attempts after which a failed job is not retried unless forced
    pub max_attempts: u32,
    /// Retry jobs that agents explicitly mark failed
    pub retry_on_explicit_fail: bool,
    pub heartbeat_window_ms: i64,
    /// Page size for `SearchByContainers`
    pub search_limit: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_on_explicit_fail: true,
            heartbeat_window_ms: DEFAULT_HEARTBEAT_WINDOW_MS,
            search_limit: 100,
        }
    }
}
