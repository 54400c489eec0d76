//! Periodic eviction of old terminal tasks from the task store. Runs on
//! a slow, independent cadence from the scheduler and heartbeat monitor.

use crate::task_store::TaskStore;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// How long a completed/failed task is kept before eviction.
    pub retention: Duration,
    /// How often the sweep runs.
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

pub struct RetentionPolicy {
    task_store: Arc<TaskStore>,
    config: RetentionConfig,
}

impl RetentionPolicy {
    pub fn new(task_store: Arc<TaskStore>, config: RetentionConfig) -> Self {
        Self { task_store, config }
    }

    /// Evicts completed/failed tasks (and trims the history ring) older
    /// than the configured retention window. Returns
    /// (completed_evicted, failed_evicted).
    pub fn sweep(&self) -> (usize, usize) {
        let window = ChronoDuration::from_std(self.config.retention)
            .unwrap_or_else(|_| ChronoDuration::seconds(24 * 3600));
        let before = Utc::now() - window;
        let (completed, failed) = self.task_store.evict(before);
        if completed > 0 || failed > 0 {
            info!(completed, failed, "retention sweep evicted terminal tasks");
        }
        (completed, failed)
    }

    pub async fn run(&self, cancel: &tokio_util::sync::CancellationToken) {
        let mut ticker = time::interval(self.config.sweep_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                _ = cancel.cancelled() => {
                    info!("retention policy shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Task, TaskOutcome, TaskPriority, TaskRequirements, TaskResult};

    fn task(id: &str) -> Task {
        Task {
            task_id: id.to_string(),
            task_type: "generic".to_string(),
            priority: TaskPriority::Normal,
            requirements: TaskRequirements::default(),
            input_data: serde_json::Value::Null,
            timeout_sec: 60,
            retry_count: 0,
            max_retries: 3,
            assigned_nodes: vec![],
            created_at: Utc::now(),
            deadline: None,
            callback_url: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn sweep_evicts_nothing_within_retention_window() {
        let store = Arc::new(TaskStore::new(None));
        store.enqueue(task("a")).unwrap();
        store.take_and_promote(vec!["n1".to_string()]).unwrap();
        store
            .complete(
                "a",
                TaskResult {
                    task_id: "a".to_string(),
                    outcome: TaskOutcome::Success,
                    result_data: None,
                    error_message: None,
                    execution_time: Some(1.0),
                    node_id: "n1".to_string(),
                    agent_id: None,
                },
            )
            .unwrap();

        let policy = RetentionPolicy::new(store.clone(), RetentionConfig::default());
        let (completed, failed) = policy.sweep();
        assert_eq!((completed, failed), (0, 0));
        assert_eq!(store.completed_count(), 1);
    }

    #[test]
    fn sweep_evicts_past_retention_window() {
        let store = Arc::new(TaskStore::new(None));
        store.enqueue(task("a")).unwrap();
        store.take_and_promote(vec!["n1".to_string()]).unwrap();
        store
            .complete(
                "a",
                TaskResult {
                    task_id: "a".to_string(),
                    outcome: TaskOutcome::Success,
                    result_data: None,
                    error_message: None,
                    execution_time: Some(1.0),
                    node_id: "n1".to_string(),
                    agent_id: None,
                },
            )
            .unwrap();

        let policy = RetentionPolicy::new(
            store.clone(),
            RetentionConfig {
                retention: Duration::from_secs(0),
                sweep_interval: Duration::from_secs(3600),
            },
        );
        std::thread::sleep(std::time::Duration::from_millis(5));
        let (completed, _) = policy.sweep();
        assert_eq!(completed, 1);
        assert_eq!(store.completed_count(), 0);
    }
}
