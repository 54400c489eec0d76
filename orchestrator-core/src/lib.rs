//! In-memory control plane for a fleet of compute nodes: node/agent
//! registry, task lifecycle store, load balancer, fault detector,
//! scheduler, heartbeat monitor, recovery manager, metrics aggregator and
//! retention policy.
//!
//! [`Orchestrator`] wires these together behind one facade; callers that
//! only need a single component (for example a test harness exercising
//! just the load balancer) can use the modules directly instead.

pub mod balancer;
pub mod error;
pub mod executor;
pub mod fault_detector;
pub mod heartbeat;
pub mod metrics_aggregator;
pub mod model;
pub mod recovery;
pub mod registry;
pub mod retention;
pub mod scheduler;
pub mod task_store;

pub use balancer::{LoadBalancer, Policy};
pub use error::{OrchestratorError, Result};
pub use executor::{DispatchOutcome, FakeNodeExecutor, HttpNodeExecutor, NodeExecutor};
pub use fault_detector::{FaultDetector, FaultDetectorConfig};
pub use heartbeat::HeartbeatMonitor;
pub use metrics_aggregator::{
    FleetMetrics, MetricsAggregator, NetworkOptimizationReport, OptimizationSuggestion,
    SuggestionKind,
};
pub use model::*;
pub use recovery::{RecoveryManager, RecoveryOutcome};
pub use registry::{AgentSpec, HeartbeatMetrics, NodeSpec, Registry, RegistrySnapshot};
pub use retention::{RetentionConfig, RetentionPolicy};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerOutcome};
pub use task_store::{Bucket, TaskStore};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Construction-time knobs for an [`Orchestrator`] instance.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub policy: Policy,
    pub task_queue_soft_cap: Option<usize>,
    pub heartbeat_interval: Duration,
    pub failure_window_secs: i64,
    pub scheduler: SchedulerConfig,
    pub retention: RetentionConfig,
    pub dispatch_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            task_queue_soft_cap: None,
            heartbeat_interval: Duration::from_secs(10),
            failure_window_secs: 120,
            scheduler: SchedulerConfig::default(),
            retention: RetentionConfig::default(),
            dispatch_timeout: Duration::from_secs(10),
        }
    }
}

/// Ties every control-plane component to a shared registry and task
/// store. One instance per orchestrator process; the HTTP/WebSocket
/// control surface in the `orchestrator-node` binary holds an
/// `Arc<Orchestrator>` and delegates to it.
pub struct Orchestrator {
    pub registry: Arc<Registry>,
    pub task_store: Arc<TaskStore>,
    pub balancer: Arc<LoadBalancer>,
    pub fault_detector: Arc<FaultDetector>,
    pub recovery: Arc<RecoveryManager>,
    pub scheduler: Arc<Scheduler>,
    pub heartbeat_monitor: Arc<HeartbeatMonitor>,
    pub retention_policy: Arc<RetentionPolicy>,
    pub metrics: Arc<MetricsAggregator>,
}

impl Orchestrator {
    /// Builds an orchestrator that dispatches tasks over real HTTP.
    pub fn new(config: OrchestratorConfig) -> Arc<Self> {
        let executor = Arc::new(HttpNodeExecutor::new(config.dispatch_timeout));
        Self::with_executor(config, executor)
    }

    /// Builds an orchestrator against an arbitrary [`NodeExecutor`],
    /// primarily so tests can swap in [`FakeNodeExecutor`].
    pub fn with_executor(config: OrchestratorConfig, executor: Arc<dyn NodeExecutor>) -> Arc<Self> {
        let registry = Arc::new(Registry::new());
        let task_store = Arc::new(TaskStore::new(config.task_queue_soft_cap));
        let balancer = Arc::new(LoadBalancer::new(config.policy));
        let fault_detector = Arc::new(FaultDetector::new(FaultDetectorConfig {
            failure_window_secs: config.failure_window_secs,
        }));
        let recovery = Arc::new(RecoveryManager::new(task_store.clone(), balancer.clone()));
        let scheduler = Arc::new(Scheduler::new(
            registry.clone(),
            task_store.clone(),
            balancer.clone(),
            recovery.clone(),
            executor,
            config.scheduler,
        ));
        let heartbeat_monitor = Arc::new(HeartbeatMonitor::new(
            registry.clone(),
            fault_detector.clone(),
            recovery.clone(),
            config.heartbeat_interval,
        ));
        let retention_policy = Arc::new(RetentionPolicy::new(task_store.clone(), config.retention));
        let metrics = Arc::new(MetricsAggregator::new(registry.clone(), task_store.clone()));

        Arc::new(Self {
            registry,
            task_store,
            balancer,
            fault_detector,
            recovery,
            scheduler,
            heartbeat_monitor,
            retention_policy,
            metrics,
        })
    }

    pub fn register_node(&self, spec: NodeSpec) -> Result<()> {
        self.registry.register_node(spec)
    }

    pub fn register_agent(&self, spec: AgentSpec, node_id: &str) -> Result<()> {
        self.registry.register_agent(spec, node_id)
    }

    pub fn unregister_node(&self, node_id: &str) -> Result<()> {
        self.registry.unregister_node(node_id)
    }

    pub fn heartbeat(
        &self,
        node_id: &str,
        metrics: HeartbeatMetrics,
        status: Option<NodeStatus>,
    ) -> Result<()> {
        self.registry.update_heartbeat(node_id, metrics, status)
    }

    pub fn get_node(&self, node_id: &str) -> Option<Node> {
        self.registry.get_node(node_id)
    }

    pub fn list_nodes(&self) -> Vec<Node> {
        self.registry.snapshot().nodes
    }

    pub fn submit_task(&self, task: Task) -> Result<()> {
        self.task_store.enqueue(task)
    }

    pub fn get_task(&self, task_id: &str) -> Option<(Bucket, Task)> {
        self.task_store.get(task_id)
    }

    /// Every task currently known to the store, across all four buckets.
    /// Terminal tasks carry their outcome; pending/active ones don't.
    pub fn list_tasks(&self) -> (Vec<Task>, Vec<Task>, Vec<TerminalTask>, Vec<TerminalTask>) {
        (
            self.task_store.all_pending(),
            self.task_store.all_active(),
            self.task_store.all_completed(),
            self.task_store.all_failed(),
        )
    }

    /// Applies a node's reported task outcome: completes/fails the task
    /// and updates registry/balancer bookkeeping. Transient failures are
    /// routed through Recovery for the retry-or-fail decision.
    pub fn report_task_result(&self, result: TaskResult) -> Result<()> {
        match result.outcome {
            TaskOutcome::Success => {
                self.registry.record_task_outcome(&result.node_id, true);
                self.balancer
                    .update_performance(&result.node_id, TaskOutcome::Success);
                self.task_store.complete(&result.task_id, result)
            }
            TaskOutcome::Permanent => {
                self.registry.record_task_outcome(&result.node_id, false);
                self.balancer
                    .update_performance(&result.node_id, TaskOutcome::Permanent);
                let message = result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "permanent failure reported by node".to_string());
                self.task_store
                    .fail(&result.task_id, message, Some(result.node_id.clone()))
            }
            TaskOutcome::Transient => {
                self.registry.record_task_outcome(&result.node_id, false);
                self.recovery
                    .handle_dispatch_rejection(&result.task_id, &result.node_id);
                Ok(())
            }
        }
    }

    pub fn metrics_snapshot(&self) -> FleetMetrics {
        self.metrics.snapshot()
    }

    pub fn optimization_report(&self) -> NetworkOptimizationReport {
        self.metrics.optimization_report()
    }

    /// Spawns the scheduler, heartbeat monitor, and retention sweep as
    /// independent background tasks sharing one cancellation token.
    pub fn spawn_background_loops(self: &Arc<Self>) -> CancellationToken {
        let cancel = CancellationToken::new();

        let scheduler = self.scheduler.clone();
        let scheduler_cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(&scheduler_cancel).await });

        let heartbeat_monitor = self.heartbeat_monitor.clone();
        let heartbeat_cancel = cancel.clone();
        tokio::spawn(async move { heartbeat_monitor.run(&heartbeat_cancel).await });

        let retention_policy = self.retention_policy.clone();
        let retention_cancel = cancel.clone();
        tokio::spawn(async move { retention_policy.run(&retention_cancel).await });

        info!("orchestrator background loops started");
        cancel
    }
}
