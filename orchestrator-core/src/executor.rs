//! Dispatches a promoted task to the node(s) it was assigned to.
//!
//! The scheduler never blocks on this; dispatch runs off its critical
//! path with a bounded timeout, matching the node-side HTTP client
//! pattern used elsewhere in this workspace for orchestrator traffic.

use crate::model::Task;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of handing a task to a node for execution. This is the
/// dispatch-time accept/reject decision, distinct from the eventual
/// `TaskResult` the node reports back once the task finishes running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Accepted,
    Rejected,
}

/// Abstraction over "hand this task to that node", so the scheduler can
/// be tested without a network.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn dispatch(&self, node_id: &str, host: &str, port: u16, task: &Task) -> DispatchOutcome;
}

/// Production executor: POSTs the task to the node's task-intake
/// endpoint, bounded by a fixed timeout independent of the task's own
/// `timeout_sec` (that one governs execution, this one governs dispatch).
pub struct HttpNodeExecutor {
    client: Client,
    dispatch_timeout: Duration,
}

impl HttpNodeExecutor {
    pub fn new(dispatch_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(dispatch_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build dispatch http client, using default");
                Client::new()
            });
        Self {
            client,
            dispatch_timeout,
        }
    }
}

impl Default for HttpNodeExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl NodeExecutor for HttpNodeExecutor {
    async fn dispatch(&self, node_id: &str, host: &str, port: u16, task: &Task) -> DispatchOutcome {
        let url = format!("http://{host}:{port}/api/v1/tasks");
        let result = self
            .client
            .post(&url)
            .json(task)
            .timeout(self.dispatch_timeout)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => DispatchOutcome::Accepted,
            Ok(resp) => {
                warn!(node_id, status = %resp.status(), "node rejected task dispatch");
                DispatchOutcome::Rejected
            }
            Err(e) => {
                warn!(node_id, error = %e, "dispatch request failed");
                DispatchOutcome::Rejected
            }
        }
    }
}

/// In-memory executor for tests and local development: records every
/// dispatched task_id per node and returns a scripted outcome.
#[derive(Default)]
pub struct FakeNodeExecutor {
    dispatched: Mutex<HashMap<String, Vec<String>>>,
    reject_nodes: Mutex<Vec<String>>,
}

impl FakeNodeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Causes subsequent dispatches to this node to be rejected.
    pub fn set_rejecting(&self, node_id: &str) {
        self.reject_nodes.lock().unwrap().push(node_id.to_string());
    }

    pub fn dispatched_to(&self, node_id: &str) -> Vec<String> {
        self.dispatched
            .lock()
            .unwrap()
            .get(node_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl NodeExecutor for FakeNodeExecutor {
    async fn dispatch(&self, node_id: &str, _host: &str, _port: u16, task: &Task) -> DispatchOutcome {
        if self
            .reject_nodes
            .lock()
            .unwrap()
            .iter()
            .any(|n| n == node_id)
        {
            debug!(node_id, task_id = %task.task_id, "fake executor rejecting dispatch");
            return DispatchOutcome::Rejected;
        }
        self.dispatched
            .lock()
            .unwrap()
            .entry(node_id.to_string())
            .or_default()
            .push(task.task_id.clone());
        DispatchOutcome::Accepted
    }
}
