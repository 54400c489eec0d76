//! Aggregates fleet-wide health and throughput figures, and runs a
//! lightweight optimization pass advising on scale and rebalance.

use crate::model::NodeStatus;
use crate::registry::Registry;
use crate::task_store::TaskStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{describe_gauge, gauge};
use serde::Serialize;
use std::sync::Arc;

/// Point-in-time snapshot of fleet health and task throughput.
#[derive(Debug, Clone, Serialize)]
pub struct FleetMetrics {
    pub total_nodes: usize,
    pub active_nodes: usize,
    pub degraded_nodes: usize,
    pub offline_nodes: usize,
    pub total_agents: usize,
    pub tasks_pending: usize,
    pub tasks_active: usize,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub success_rate: f64,
    pub network_utilization: f64,
    pub average_response_time_secs: f64,
    pub throughput_per_minute: f64,
    pub uptime_secs: i64,
}

/// A single actionable observation about the fleet's current resource
/// posture. Purely advisory; nothing here mutates registry or task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    ScaleUp,
    ScaleDown,
    Rebalance,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationSuggestion {
    pub node_id: String,
    pub kind: SuggestionKind,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkOptimizationReport {
    pub generated_at: DateTime<Utc>,
    pub suggestions: Vec<OptimizationSuggestion>,
}

const HIGH_LOAD_THRESHOLD: f64 = 0.85;
const LOW_LOAD_THRESHOLD: f64 = 0.1;
const HIGH_LATENCY_MS: f64 = 250.0;

pub struct MetricsAggregator {
    registry: Arc<Registry>,
    task_store: Arc<TaskStore>,
    started_at: DateTime<Utc>,
}

impl MetricsAggregator {
    pub fn new(registry: Arc<Registry>, task_store: Arc<TaskStore>) -> Self {
        describe_gauge!("orchestrator_total_nodes", "Current total number of nodes in registry");
        describe_gauge!("orchestrator_active_nodes", "Current number of active nodes");
        describe_gauge!("orchestrator_degraded_nodes", "Current number of degraded nodes");
        describe_gauge!("orchestrator_offline_nodes", "Current number of offline nodes");
        describe_gauge!("orchestrator_tasks_pending", "Tasks currently waiting in the queue");
        describe_gauge!("orchestrator_tasks_active", "Tasks currently dispatched to a node");
        describe_gauge!("orchestrator_tasks_completed_total", "Tasks completed since startup");
        describe_gauge!("orchestrator_tasks_failed_total", "Tasks failed since startup");
        describe_gauge!("orchestrator_success_rate", "Fraction of terminal tasks that completed successfully");
        describe_gauge!("orchestrator_network_utilization", "Average load score across active nodes");
        describe_gauge!("orchestrator_average_response_time_seconds", "Mean execution time over recent history");
        describe_gauge!("orchestrator_throughput_per_minute", "Terminal tasks produced per minute, from recent history");

        Self {
            registry,
            task_store,
            started_at: Utc::now(),
        }
    }

    /// Computes a fresh snapshot and publishes it to the process-wide
    /// metrics registry as a side effect.
    pub fn snapshot(&self) -> FleetMetrics {
        let reg_snapshot = self.registry.snapshot();
        let total_nodes = reg_snapshot.nodes.len();
        let active_nodes = reg_snapshot
            .nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Active)
            .count();
        let degraded_nodes = reg_snapshot
            .nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Degraded)
            .count();
        let offline_nodes = reg_snapshot
            .nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Offline)
            .count();

        let network_utilization = if total_nodes > 0 {
            reg_snapshot.nodes.iter().map(|n| n.load_score).sum::<f64>() / total_nodes as f64
        } else {
            0.0
        };

        let tasks_completed = self.task_store.completed_count() as u64;
        let tasks_failed = self.task_store.failed_count() as u64;
        let success_rate = if tasks_completed + tasks_failed > 0 {
            tasks_completed as f64 / (tasks_completed + tasks_failed) as f64
        } else {
            1.0
        };

        let history = self.task_store.recent_history();
        let response_times: Vec<f64> = history.iter().filter_map(|t| t.execution_time).collect();
        let average_response_time_secs = if response_times.is_empty() {
            0.0
        } else {
            response_times.iter().sum::<f64>() / response_times.len() as f64
        };

        let now = Utc::now();
        let throughput_per_minute = throughput_from_history(&history, now);

        let metrics = FleetMetrics {
            total_nodes,
            active_nodes,
            degraded_nodes,
            offline_nodes,
            total_agents: reg_snapshot.agents.len(),
            tasks_pending: self.task_store.pending_count(),
            tasks_active: self.task_store.active_count(),
            tasks_completed,
            tasks_failed,
            success_rate,
            network_utilization,
            average_response_time_secs,
            throughput_per_minute,
            uptime_secs: (now - self.started_at).num_seconds(),
        };

        self.publish(&metrics);
        metrics
    }

    fn publish(&self, m: &FleetMetrics) {
        gauge!("orchestrator_total_nodes", m.total_nodes as f64);
        gauge!("orchestrator_active_nodes", m.active_nodes as f64);
        gauge!("orchestrator_degraded_nodes", m.degraded_nodes as f64);
        gauge!("orchestrator_offline_nodes", m.offline_nodes as f64);
        gauge!("orchestrator_tasks_pending", m.tasks_pending as f64);
        gauge!("orchestrator_tasks_active", m.tasks_active as f64);
        gauge!("orchestrator_tasks_completed_total", m.tasks_completed as f64);
        gauge!("orchestrator_tasks_failed_total", m.tasks_failed as f64);
        gauge!("orchestrator_success_rate", m.success_rate);
        gauge!("orchestrator_network_utilization", m.network_utilization);
        gauge!(
            "orchestrator_average_response_time_seconds",
            m.average_response_time_secs
        );
        gauge!("orchestrator_throughput_per_minute", m.throughput_per_minute);
    }

    /// Scans the registry for nodes that look over- or under-utilized and
    /// emits advisory suggestions. Folded in from the original
    /// implementation's standalone performance optimizer; this orchestrator
    /// only observes and reports, it never resizes the fleet itself.
    pub fn optimization_report(&self) -> NetworkOptimizationReport {
        let snapshot = self.registry.snapshot();
        let mut suggestions = Vec::new();

        for node in &snapshot.nodes {
            if node.status != NodeStatus::Active {
                continue;
            }
            if node.load_score >= HIGH_LOAD_THRESHOLD {
                suggestions.push(OptimizationSuggestion {
                    node_id: node.node_id.clone(),
                    kind: SuggestionKind::ScaleUp,
                    reason: format!("load_score {:.2} at or above high-load threshold", node.load_score),
                });
            } else if node.load_score <= LOW_LOAD_THRESHOLD && snapshot.nodes.len() > 1 {
                suggestions.push(OptimizationSuggestion {
                    node_id: node.node_id.clone(),
                    kind: SuggestionKind::ScaleDown,
                    reason: format!("load_score {:.2} at or below low-load threshold", node.load_score),
                });
            }
            if node.network_latency_ms >= HIGH_LATENCY_MS {
                suggestions.push(OptimizationSuggestion {
                    node_id: node.node_id.clone(),
                    kind: SuggestionKind::Rebalance,
                    reason: format!("network_latency_ms {:.1} exceeds comfortable bound", node.network_latency_ms),
                });
            }
        }

        NetworkOptimizationReport {
            generated_at: Utc::now(),
            suggestions,
        }
    }
}

/// Count of terminal tasks that entered the history ring in the last 60
/// seconds, relative to `now`.
fn throughput_from_history(history: &[crate::model::TerminalTask], now: DateTime<Utc>) -> f64 {
    let cutoff = now - ChronoDuration::seconds(60);
    history.iter().filter(|t| t.completed_at >= cutoff).count() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TaskOutcome, TaskPriority, TaskRequirements, TaskResult};
    use crate::registry::NodeSpec;
    use std::collections::HashSet;

    fn node(registry: &Registry, id: &str) {
        registry
            .register_node(NodeSpec {
                node_id: id.to_string(),
                host: "127.0.0.1".to_string(),
                port: 9000,
                node_type: "generic".to_string(),
                capabilities: HashSet::new(),
                version: "1.0".to_string(),
                location: None,
            })
            .unwrap();
    }

    #[test]
    fn empty_fleet_has_full_success_rate_and_zero_utilization() {
        let registry = Arc::new(Registry::new());
        let task_store = Arc::new(TaskStore::new(None));
        let aggregator = MetricsAggregator::new(registry, task_store);
        let m = aggregator.snapshot();
        assert_eq!(m.total_nodes, 0);
        assert_eq!(m.success_rate, 1.0);
        assert_eq!(m.network_utilization, 0.0);
    }

    #[test]
    fn network_utilization_averages_over_every_node_not_just_active() {
        let registry = Arc::new(Registry::new());
        node(&registry, "n1");
        node(&registry, "n2");
        registry
            .update_heartbeat(
                "n1",
                crate::registry::HeartbeatMetrics {
                    load_score: Some(0.8),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        registry.set_status("n2", NodeStatus::Offline).unwrap();

        let task_store = Arc::new(TaskStore::new(None));
        let aggregator = MetricsAggregator::new(registry, task_store);
        let m = aggregator.snapshot();
        // n2 is offline but still carries its last-known load_score (0.0
        // by default), so the mean is over both nodes, not just n1.
        assert_eq!(m.network_utilization, 0.4);
    }

    #[test]
    fn high_load_node_gets_scale_up_suggestion() {
        let registry = Arc::new(Registry::new());
        node(&registry, "n1");
        registry
            .update_heartbeat(
                "n1",
                crate::registry::HeartbeatMetrics {
                    load_score: Some(0.95),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        let task_store = Arc::new(TaskStore::new(None));
        let aggregator = MetricsAggregator::new(registry, task_store);
        let report = aggregator.optimization_report();
        assert!(report
            .suggestions
            .iter()
            .any(|s| s.node_id == "n1" && s.kind == SuggestionKind::ScaleUp));
    }

    #[test]
    fn completed_task_counts_toward_response_time() {
        let registry = Arc::new(Registry::new());
        node(&registry, "n1");
        let task_store = Arc::new(TaskStore::new(None));
        task_store
            .enqueue(crate::model::Task {
                task_id: "t1".to_string(),
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
            })
            .unwrap();
        task_store.take_and_promote(vec!["n1".to_string()]).unwrap();
        task_store
            .complete(
                "t1",
                TaskResult {
                    task_id: "t1".to_string(),
                    outcome: TaskOutcome::Success,
                    result_data: None,
                    error_message: None,
                    execution_time: Some(4.0),
                    node_id: "n1".to_string(),
                    agent_id: None,
                },
            )
            .unwrap();

        let aggregator = MetricsAggregator::new(registry, task_store);
        let m = aggregator.snapshot();
        assert_eq!(m.average_response_time_secs, 4.0);
        assert_eq!(m.tasks_completed, 1);
    }

    #[test]
    fn tasks_failed_reflects_bucket_even_without_node_accounting() {
        // A task that fails via the recovery path (node offline, retries
        // exhausted) never touches the node's own tasks_failed counter —
        // only `report_task_result` does that. The fleet-wide count must
        // still come from the task store's failed bucket, not a sum over
        // per-node counters.
        let registry = Arc::new(Registry::new());
        node(&registry, "n1");
        let task_store = Arc::new(TaskStore::new(None));
        task_store
            .enqueue(crate::model::Task {
                task_id: "t1".to_string(),
                task_type: "generic".to_string(),
                priority: TaskPriority::Normal,
                requirements: TaskRequirements::default(),
                input_data: serde_json::Value::Null,
                timeout_sec: 60,
                retry_count: 0,
                max_retries: 0,
                assigned_nodes: vec!["n1".to_string()],
                created_at: Utc::now(),
                deadline: None,
                callback_url: None,
                metadata: Default::default(),
            })
            .unwrap();
        task_store.take_and_promote(vec!["n1".to_string()]).unwrap();
        task_store
            .fail(
                "t1",
                "Node n1 failed, max retries exceeded".to_string(),
                Some("n1".to_string()),
            )
            .unwrap();

        let aggregator = MetricsAggregator::new(registry, task_store);
        let m = aggregator.snapshot();
        assert_eq!(m.tasks_failed, 1);
        assert_eq!(m.success_rate, 0.0);
    }
}
