//! Classifies nodes as failed from heartbeat age and tracks per-node
//! failure cadence. Contains no I/O; it is pure over a registry snapshot
//! and the clock.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

const DEGRADED_THRESHOLD: usize = 3;
const DEGRADED_WINDOW_SECS: i64 = 300;

pub struct FaultDetectorConfig {
    pub failure_window_secs: i64,
}

impl Default for FaultDetectorConfig {
    fn default() -> Self {
        Self {
            failure_window_secs: 120,
        }
    }
}

/// Pure fault classifier plus a bounded, per-node ring of failure
/// timestamps used to compute a rolling failure rate.
pub struct FaultDetector {
    config: FaultDetectorConfig,
    failure_history: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl FaultDetector {
    pub fn new(config: FaultDetectorConfig) -> Self {
        Self {
            config,
            failure_history: Mutex::new(HashMap::new()),
        }
    }

    /// True iff `now - last_heartbeat_ts` exceeds the configured failure
    /// window.
    pub fn is_failed(&self, last_heartbeat_ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - last_heartbeat_ts) > ChronoDuration::seconds(self.config.failure_window_secs)
    }

    /// Appends a failure timestamp to the node's ring.
    pub fn record_failure(&self, node_id: &str, ts: DateTime<Utc>) {
        let mut history = self.failure_history.lock().unwrap();
        history.entry(node_id.to_string()).or_default().push_back(ts);
    }

    /// Failures per hour over the given window (in seconds), trimming
    /// records older than the window on read.
    pub fn failure_rate(&self, node_id: &str, window_secs: i64, now: DateTime<Utc>) -> f64 {
        let mut history = self.failure_history.lock().unwrap();
        let Some(ring) = history.get_mut(node_id) else {
            return 0.0;
        };
        let cutoff = now - ChronoDuration::seconds(window_secs);
        while let Some(front) = ring.front() {
            if *front < cutoff {
                ring.pop_front();
            } else {
                break;
            }
        }
        if window_secs <= 0 {
            return 0.0;
        }
        ring.len() as f64 * (3600.0 / window_secs as f64)
    }

    /// True if this node has accumulated >= 3 failures within the last
    /// 5 minutes — the threshold that marks a node Degraded (not
    /// Offline; Offline is set only by heartbeat timeout).
    pub fn should_degrade(&self, node_id: &str, now: DateTime<Utc>) -> bool {
        let mut history = self.failure_history.lock().unwrap();
        let Some(ring) = history.get_mut(node_id) else {
            return false;
        };
        let cutoff = now - ChronoDuration::seconds(DEGRADED_WINDOW_SECS);
        while let Some(front) = ring.front() {
            if *front < cutoff {
                ring.pop_front();
            } else {
                break;
            }
        }
        ring.len() >= DEGRADED_THRESHOLD
    }
}
