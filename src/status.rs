//! Read-only status snapshots, consumed by an external status surface.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Snapshot of the supervisor's view of the worker
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    /// Whether a worker process is currently alive
    pub running: bool,
    /// Pid of the current worker, if any
    pub pid: Option<u32>,
    /// Restarts recorded in the current window
    pub restart_count: usize,
    /// When the last restart happened
    pub last_restart: Option<DateTime<Utc>>,
    /// Restart ceiling before the cooldown engages
    pub max_restarts: usize,
    /// Current lifecycle state, as a display string
    pub state: String,
}

/// Snapshot of the watchdog's connectivity view
#[derive(Debug, Clone, Serialize)]
pub struct WatchdogStatus {
    /// Consecutive missed heartbeats
    pub missed_heartbeats: u32,
    /// Milliseconds since the last observed activity
    pub last_activity_ms_ago: u64,
    /// Whether the session currently self-reports ready
    pub ready: bool,
}

impl SupervisorStatus {
    /// Serialize for the external status surface
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl WatchdogStatus {
    /// Serialize for the external status surface
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
