//! On node failure, requeue or permanently fail that node's active tasks.
//! Also handles dispatch-rejection retry decisions shared with the
//! scheduler.

use crate::balancer::LoadBalancer;
use crate::model::TaskOutcome;
use crate::task_store::TaskStore;
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to a single active task during recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Retried { task_id: String },
    Failed { task_id: String },
}

pub struct RecoveryManager {
    task_store: Arc<TaskStore>,
    balancer: Arc<LoadBalancer>,
}

impl RecoveryManager {
    pub fn new(task_store: Arc<TaskStore>, balancer: Arc<LoadBalancer>) -> Self {
        Self {
            task_store,
            balancer,
        }
    }

    /// Finds all active tasks assigned to `failed_node_id` and, for each,
    /// retries it (if budget remains) or fails it permanently.
    pub fn handle_node_offline(&self, failed_node_id: &str) -> Vec<RecoveryOutcome> {
        let affected = self.task_store.active_tasks_for_node(failed_node_id);
        let mut outcomes = Vec::with_capacity(affected.len());

        for task in affected {
            self.balancer
                .update_performance(failed_node_id, TaskOutcome::Transient);

            if task.retry_count + 1 <= task.max_retries {
                match self.task_store.retry(&task.task_id) {
                    Ok(()) => {
                        info!(
                            task_id = %task.task_id,
                            node_id = %failed_node_id,
                            retry_count = task.retry_count + 1,
                            "task retrying after node failure"
                        );
                        outcomes.push(RecoveryOutcome::Retried {
                            task_id: task.task_id,
                        });
                    }
                    Err(e) => {
                        warn!(task_id = %task.task_id, error = %e, "failed to requeue task during recovery");
                    }
                }
            } else {
                let message = format!("Node {failed_node_id} failed, max retries exceeded");
                match self
                    .task_store
                    .fail(&task.task_id, message, Some(failed_node_id.to_string()))
                {
                    Ok(()) => outcomes.push(RecoveryOutcome::Failed {
                        task_id: task.task_id,
                    }),
                    Err(e) => {
                        warn!(task_id = %task.task_id, error = %e, "failed to record task failure during recovery");
                    }
                }
            }
        }

        outcomes
    }

    /// Applies the same retry/fail decision to a single task whose
    /// dispatch was rejected or whose reported failure was classified
    /// Transient.
    pub fn handle_dispatch_rejection(&self, task_id: &str, node_id: &str) -> RecoveryOutcome {
        let task = self.task_store.get(task_id).map(|(_, t)| t);
        self.balancer
            .update_performance(node_id, TaskOutcome::Transient);

        match task {
            Some(task) if task.retry_count + 1 <= task.max_retries => {
                let _ = self.task_store.retry(task_id);
                RecoveryOutcome::Retried {
                    task_id: task_id.to_string(),
                }
            }
            Some(_) => {
                let message = format!("Node {node_id} failed, max retries exceeded");
                let _ = self
                    .task_store
                    .fail(task_id, message, Some(node_id.to_string()));
                RecoveryOutcome::Failed {
                    task_id: task_id.to_string(),
                }
            }
            None => RecoveryOutcome::Failed {
                task_id: task_id.to_string(),
            },
        }
    }
}
