//! Periodically scans the registry, marks stale nodes offline, and
//! triggers recovery for their in-flight tasks.

use crate::fault_detector::FaultDetector;
use crate::model::NodeStatus;
use crate::recovery::RecoveryManager;
use crate::registry::Registry;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{info, warn};

pub struct HeartbeatMonitor {
    registry: Arc<Registry>,
    fault_detector: Arc<FaultDetector>,
    recovery: Arc<RecoveryManager>,
    interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(
        registry: Arc<Registry>,
        fault_detector: Arc<FaultDetector>,
        recovery: Arc<RecoveryManager>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            fault_detector,
            recovery,
            interval,
        }
    }

    /// Runs one scan over the registry, returning the node_ids that were
    /// transitioned offline this tick.
    pub fn tick(&self) -> Vec<String> {
        let now = Utc::now();
        let snapshot = self.registry.snapshot();
        let mut newly_offline = Vec::new();

        for node in snapshot.nodes {
            if node.status == NodeStatus::Offline {
                continue;
            }

            if self.fault_detector.is_failed(node.last_heartbeat_ts, now) {
                if self.registry.set_status(&node.node_id, NodeStatus::Offline).is_ok() {
                    warn!(node_id = %node.node_id, "node marked offline after missed heartbeats");
                    self.fault_detector.record_failure(&node.node_id, now);
                    let outcomes = self.recovery.handle_node_offline(&node.node_id);
                    info!(
                        node_id = %node.node_id,
                        recovered_tasks = outcomes.len(),
                        "recovery completed for offline node"
                    );
                    newly_offline.push(node.node_id);
                }
            } else if self.fault_detector.should_degrade(&node.node_id, now)
                && node.status == NodeStatus::Active
            {
                let _ = self.registry.set_status(&node.node_id, NodeStatus::Degraded);
            }
        }

        newly_offline
    }

    /// Runs the cancellable periodic loop until `cancel` resolves.
    pub async fn run(&self, cancel: &tokio_util::sync::CancellationToken) {
        let mut ticker = time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                _ = cancel.cancelled() => {
                    info!("heartbeat monitor shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::{LoadBalancer, Policy};
    use crate::fault_detector::FaultDetectorConfig;
    use crate::registry::NodeSpec;
    use crate::task_store::TaskStore;
    use std::collections::HashSet;

    #[test]
    fn offline_only_after_failure_window() {
        let registry = Arc::new(Registry::new());
        registry
            .register_node(NodeSpec {
                node_id: "n1".to_string(),
                host: "127.0.0.1".to_string(),
                port: 9000,
                node_type: "generic".to_string(),
                capabilities: HashSet::new(),
                version: "1.0".to_string(),
                location: None,
            })
            .unwrap();

        // Force the heartbeat to look stale by directly mutating via a
        // second heartbeat update then manually overriding the backing
        // field is not exposed; instead verify via a fresh node that a
        // brand-new heartbeat is never considered offline.
        let fault_detector = Arc::new(FaultDetector::new(FaultDetectorConfig {
            failure_window_secs: 120,
        }));
        let task_store = Arc::new(TaskStore::new(None));
        let balancer = Arc::new(LoadBalancer::with_seed(Policy::RoundRobin, 1));
        let recovery = Arc::new(RecoveryManager::new(task_store, balancer));
        let monitor = HeartbeatMonitor::new(
            registry.clone(),
            fault_detector,
            recovery,
            Duration::from_secs(30),
        );

        let offline = monitor.tick();
        assert!(offline.is_empty());
        assert_eq!(registry.get_node("n1").unwrap().status, NodeStatus::Active);
    }

    #[test]
    fn failure_window_elapsed_marks_offline() {
        let registry = Arc::new(Registry::new());
        registry
            .register_node(NodeSpec {
                node_id: "n1".to_string(),
                host: "127.0.0.1".to_string(),
                port: 9000,
                node_type: "generic".to_string(),
                capabilities: HashSet::new(),
                version: "1.0".to_string(),
                location: None,
            })
            .unwrap();

        let fault_detector = Arc::new(FaultDetector::new(FaultDetectorConfig {
            failure_window_secs: 0,
        }));
        let task_store = Arc::new(TaskStore::new(None));
        let balancer = Arc::new(LoadBalancer::with_seed(Policy::RoundRobin, 1));
        let recovery = Arc::new(RecoveryManager::new(task_store, balancer));
        let monitor = HeartbeatMonitor::new(
            registry.clone(),
            fault_detector,
            recovery,
            Duration::from_secs(30),
        );

        // failure_window_secs = 0 means even a heartbeat "now" minus
        // epsilon counts as overdue on the next tick.
        std::thread::sleep(std::time::Duration::from_millis(5));
        let offline = monitor.tick();
        assert_eq!(offline, vec!["n1".to_string()]);
        assert_eq!(registry.get_node("n1").unwrap().status, NodeStatus::Offline);
    }
}
