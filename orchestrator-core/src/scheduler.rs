//! The scheduling loop: match pending tasks to nodes and dispatch them.
//! Dispatch itself runs off the scheduler's critical path so one slow node
//! can never stall the next scheduling decision.

use crate::balancer::LoadBalancer;
use crate::executor::{DispatchOutcome, NodeExecutor};
use crate::model::Task;
use crate::recovery::RecoveryManager;
use crate::registry::Registry;
use crate::task_store::TaskStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long to wait before re-attempting a scheduling pass after one
    /// found no eligible node for the head-of-line task.
    pub no_eligible_backoff: Duration,
    /// Consecutive starved cycles before the head-of-line task is rotated
    /// to the back of its priority band, letting the next task have a turn.
    pub starvation_rotate_after: u32,
    /// Tick period when nodes are available and tasks keep getting
    /// dispatched.
    pub active_tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            no_eligible_backoff: Duration::from_secs(1),
            starvation_rotate_after: 5,
            active_tick_interval: Duration::from_millis(100),
        }
    }
}

/// Result of one scheduling attempt, surfaced for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerOutcome {
    Idle,
    Dispatched { task_id: String, nodes: Vec<String> },
    NoEligibleNode { task_id: String, rotated: bool },
    Expired { task_id: String },
}

pub struct Scheduler {
    registry: Arc<Registry>,
    task_store: Arc<TaskStore>,
    balancer: Arc<LoadBalancer>,
    recovery: Arc<RecoveryManager>,
    executor: Arc<dyn NodeExecutor>,
    config: SchedulerConfig,
    starvation_counts: Mutex<HashMap<String, u32>>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<Registry>,
        task_store: Arc<TaskStore>,
        balancer: Arc<LoadBalancer>,
        recovery: Arc<RecoveryManager>,
        executor: Arc<dyn NodeExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            task_store,
            balancer,
            recovery,
            executor,
            config,
            starvation_counts: Mutex::new(HashMap::new()),
        }
    }

    /// One scheduling attempt: peek the head-of-line task, check its
    /// deadline, pick a node (or nodes, for redundancy > 1) and promote +
    /// dispatch. Never blocks on the dispatch call itself.
    pub fn tick(&self) -> SchedulerOutcome {
        let Some(task) = self.task_store.peek_next() else {
            return SchedulerOutcome::Idle;
        };

        let now = Utc::now();
        if task.deadline.map(|d| now > d).unwrap_or(false) {
            let message = format!("task {} exceeded deadline before dispatch", task.task_id);
            let _ = self.task_store.discard_pending(&task.task_id, message);
            self.starvation_counts.lock().unwrap().remove(&task.task_id);
            warn!(task_id = %task.task_id, "task expired while still pending");
            return SchedulerOutcome::Expired {
                task_id: task.task_id,
            };
        }

        let snapshot = self.registry.snapshot();
        let redundancy = task.requirements.redundancy.max(1) as usize;
        let assigned: Vec<String> = if redundancy > 1 {
            self.balancer.select_many(&task, &snapshot.nodes, redundancy)
        } else {
            self.balancer
                .select(&task, &snapshot.nodes)
                .into_iter()
                .collect()
        };

        if assigned.is_empty() {
            return self.record_starvation(task.task_id);
        }

        self.starvation_counts.lock().unwrap().remove(&task.task_id);

        let Some(promoted) = self.task_store.take_and_promote(assigned.clone()) else {
            return SchedulerOutcome::Idle;
        };
        let task_id = promoted.task_id.clone();

        info!(task_id = %task_id, nodes = ?assigned, "task dispatched");
        self.spawn_dispatch(promoted, assigned.clone());

        SchedulerOutcome::Dispatched {
            task_id,
            nodes: assigned,
        }
    }

    fn record_starvation(&self, task_id: String) -> SchedulerOutcome {
        let mut counts = self.starvation_counts.lock().unwrap();
        let count = counts.entry(task_id.clone()).or_insert(0);
        *count += 1;
        let rotated = if *count >= self.config.starvation_rotate_after {
            *count = 0;
            drop(counts);
            self.task_store.rotate_to_back(&task_id)
        } else {
            false
        };
        debug!(task_id = %task_id, rotated, "no eligible node this cycle");
        SchedulerOutcome::NoEligibleNode { task_id, rotated }
    }

    /// Hands the promoted task to every assigned node concurrently,
    /// off the scheduling thread. A rejection routes through Recovery
    /// the same way a reported node failure would.
    fn spawn_dispatch(&self, task: Task, assigned_nodes: Vec<String>) {
        let registry = self.registry.clone();
        let recovery = self.recovery.clone();
        let executor = self.executor.clone();

        tokio::spawn(async move {
            for node_id in assigned_nodes {
                let Some(node) = registry.get_node(&node_id) else {
                    warn!(node_id = %node_id, task_id = %task.task_id, "assigned node vanished before dispatch");
                    recovery.handle_dispatch_rejection(&task.task_id, &node_id);
                    continue;
                };

                let outcome = executor
                    .dispatch(&node_id, &node.host, node.port, &task)
                    .await;

                match outcome {
                    DispatchOutcome::Accepted => {
                        debug!(node_id = %node_id, task_id = %task.task_id, "dispatch accepted");
                    }
                    DispatchOutcome::Rejected => {
                        warn!(node_id = %node_id, task_id = %task.task_id, "dispatch rejected");
                        recovery.handle_dispatch_rejection(&task.task_id, &node_id);
                    }
                }
            }
        });
    }

    /// Scans active tasks for exceeded deadlines/timeouts and fails them
    /// directly (a task that has already started never gets retried by
    /// the sweeper; only Recovery's node-failure path retries).
    pub fn sweep_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let mut expired = Vec::new();

        for task in self.task_store.all_active() {
            let deadline_exceeded = task.deadline.map(|d| now > d).unwrap_or(false);
            let age_secs = (now - task.created_at).num_seconds().max(0) as u64;
            let timeout_exceeded = age_secs > task.timeout_sec;

            if !deadline_exceeded && !timeout_exceeded {
                continue;
            }

            let message = if deadline_exceeded {
                format!("task {} exceeded deadline", task.task_id)
            } else {
                format!("task {} exceeded timeout_sec={}", task.task_id, task.timeout_sec)
            };
            let node_id = task.assigned_nodes.first().cloned();

            if self
                .task_store
                .fail(&task.task_id, message, node_id)
                .is_ok()
            {
                warn!(task_id = %task.task_id, "task expired while active");
                expired.push(task.task_id);
            }
        }

        expired
    }

    /// Runs the cancellable scheduling loop: ticks at `active_tick_interval`
    /// normally, backing off to `no_eligible_backoff` after a starved cycle,
    /// interleaving an expiry sweep every tick.
    pub async fn run(&self, cancel: &tokio_util::sync::CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                info!("scheduler shutting down");
                break;
            }

            let outcome = self.tick();
            self.sweep_expired();

            let wait = match outcome {
                SchedulerOutcome::NoEligibleNode { .. } | SchedulerOutcome::Idle => {
                    self.config.no_eligible_backoff
                }
                _ => self.config.active_tick_interval,
            };

            tokio::select! {
                _ = time::sleep(wait) => {}
                _ = cancel.cancelled() => {
                    info!("scheduler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::Policy;
    use crate::executor::FakeNodeExecutor;
    use crate::model::{TaskPriority, TaskRequirements};
    use crate::registry::NodeSpec;
    use std::collections::HashSet;

    fn task(id: &str, priority: TaskPriority) -> Task {
        Task {
            task_id: id.to_string(),
            task_type: "generic".to_string(),
            priority,
            requirements: TaskRequirements::default(),
            input_data: serde_json::Value::Null,
            timeout_sec: 60,
            retry_count: 0,
            max_retries: 3,
            assigned_nodes: vec![],
            created_at: Utc::now(),
            deadline: None,
            callback_url: None,
            metadata: HashMap::new(),
        }
    }

    fn harness() -> (
        Arc<Registry>,
        Arc<TaskStore>,
        Arc<Scheduler>,
        Arc<FakeNodeExecutor>,
    ) {
        let registry = Arc::new(Registry::new());
        let task_store = Arc::new(TaskStore::new(None));
        let balancer = Arc::new(LoadBalancer::with_seed(Policy::RoundRobin, 1));
        let recovery = Arc::new(RecoveryManager::new(task_store.clone(), balancer.clone()));
        let executor = Arc::new(FakeNodeExecutor::new());
        let scheduler = Arc::new(Scheduler::new(
            registry.clone(),
            task_store.clone(),
            balancer,
            recovery,
            executor.clone(),
            SchedulerConfig::default(),
        ));
        (registry, task_store, scheduler, executor)
    }

    fn register(registry: &Registry, id: &str) {
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
    fn idle_with_no_pending_tasks() {
        let (_, _, scheduler, _) = harness();
        assert_eq!(scheduler.tick(), SchedulerOutcome::Idle);
    }

    #[test]
    fn no_eligible_node_when_registry_is_empty() {
        let (_, task_store, scheduler, _) = harness();
        task_store.enqueue(task("t1", TaskPriority::Normal)).unwrap();
        let outcome = scheduler.tick();
        assert_eq!(
            outcome,
            SchedulerOutcome::NoEligibleNode {
                task_id: "t1".to_string(),
                rotated: false
            }
        );
    }

    #[test]
    fn starvation_rotates_after_threshold() {
        let (_, task_store, scheduler, _) = harness();
        task_store.enqueue(task("a", TaskPriority::Normal)).unwrap();
        task_store.enqueue(task("b", TaskPriority::Normal)).unwrap();

        for _ in 0..4 {
            scheduler.tick();
        }
        let fifth = scheduler.tick();
        assert_eq!(
            fifth,
            SchedulerOutcome::NoEligibleNode {
                task_id: "a".to_string(),
                rotated: true
            }
        );
        assert_eq!(task_store.peek_next().unwrap().task_id, "b");
    }

    #[test]
    fn deadline_already_passed_expires_without_dispatch() {
        let (registry, task_store, scheduler, _) = harness();
        register(&registry, "n1");
        let mut t = task("t1", TaskPriority::Normal);
        t.deadline = Some(Utc::now() - chrono::Duration::seconds(1));
        task_store.enqueue(t).unwrap();

        let outcome = scheduler.tick();
        assert_eq!(
            outcome,
            SchedulerOutcome::Expired {
                task_id: "t1".to_string()
            }
        );
        assert!(task_store.get("t1").is_none() || matches!(task_store.get("t1").unwrap().0, crate::task_store::Bucket::Failed));
    }

    #[tokio::test]
    async fn eligible_node_dispatches_via_executor() {
        let (registry, task_store, scheduler, executor) = harness();
        register(&registry, "n1");
        task_store.enqueue(task("t1", TaskPriority::Normal)).unwrap();

        let outcome = scheduler.tick();
        assert_eq!(
            outcome,
            SchedulerOutcome::Dispatched {
                task_id: "t1".to_string(),
                nodes: vec!["n1".to_string()]
            }
        );
        assert_eq!(task_store.active_count(), 1);

        // dispatch runs off the scheduling thread; give it a tick.
        tokio::task::yield_now().await;
        time::sleep(Duration::from_millis(20)).await;
        assert_eq!(executor.dispatched_to("n1"), vec!["t1".to_string()]);
    }

    #[test]
    fn expired_active_task_is_failed_by_sweep() {
        let (registry, task_store, scheduler, _) = harness();
        register(&registry, "n1");
        let mut t = task("t1", TaskPriority::Normal);
        t.timeout_sec = 0;
        task_store.enqueue(t).unwrap();
        task_store.take_and_promote(vec!["n1".to_string()]).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(1100));
        let expired = scheduler.sweep_expired();
        assert_eq!(expired, vec!["t1".to_string()]);
        assert!(matches!(
            task_store.get("t1").unwrap().0,
            crate::task_store::Bucket::Failed
        ));
    }
}
