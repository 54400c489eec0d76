//! End-to-end scenarios exercising the `Orchestrator` facade against an
//! in-memory `FakeNodeExecutor`: happy path, retry on node failure, retry
//! exhaustion, priority preemption, capability filtering, and retention.

use orchestrator_core::{
    AgentSpec, FakeNodeExecutor, HeartbeatMetrics, NodeSpec, NodeStatus, Orchestrator,
    OrchestratorConfig, RetentionConfig, RetentionPolicy, SchedulerOutcome, Task, TaskOutcome,
    TaskPriority, TaskRequirements, TaskResult,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

fn node_spec(id: &str, caps: &[&str]) -> NodeSpec {
    NodeSpec {
        node_id: id.to_string(),
        host: "127.0.0.1".to_string(),
        port: 9000,
        node_type: "generic".to_string(),
        capabilities: caps.iter().map(|c| c.to_string()).collect(),
        version: "1.0.0".to_string(),
        location: None,
    }
}

fn task(id: &str, priority: TaskPriority, caps: &[&str], max_retries: u32) -> Task {
    Task {
        task_id: id.to_string(),
        task_type: "generic".to_string(),
        priority,
        requirements: TaskRequirements {
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        },
        input_data: serde_json::Value::Null,
        timeout_sec: 60,
        retry_count: 0,
        max_retries,
        assigned_nodes: vec![],
        created_at: chrono::Utc::now(),
        deadline: None,
        callback_url: None,
        metadata: HashMap::new(),
    }
}

fn harness() -> (Arc<Orchestrator>, Arc<FakeNodeExecutor>) {
    let executor = Arc::new(FakeNodeExecutor::new());
    let orchestrator = Orchestrator::with_executor(OrchestratorConfig::default(), executor.clone());
    (orchestrator, executor)
}

/// Scenario 1: happy path.
// Dispatch spawns onto the Tokio runtime even though `tick()` itself
// never awaits, so any scenario reaching a `Dispatched` outcome needs a
// runtime context to exist.
#[tokio::test]
async fn scenario_happy_path() {
    let (orchestrator, _executor) = harness();
    orchestrator.register_node(node_spec("n1", &["cpu"])).unwrap();

    orchestrator
        .submit_task(task("t1", TaskPriority::Normal, &["cpu"], 3))
        .unwrap();

    let outcome = orchestrator.scheduler.tick();
    assert_eq!(
        outcome,
        SchedulerOutcome::Dispatched {
            task_id: "t1".to_string(),
            nodes: vec!["n1".to_string()]
        }
    );

    orchestrator
        .report_task_result(TaskResult {
            task_id: "t1".to_string(),
            outcome: TaskOutcome::Success,
            result_data: Some(serde_json::json!({"ok": true})),
            error_message: None,
            execution_time: Some(2.0),
            node_id: "n1".to_string(),
            agent_id: None,
        })
        .unwrap();

    let (bucket, _) = orchestrator.get_task("t1").unwrap();
    assert!(matches!(bucket, orchestrator_core::Bucket::Completed));

    let metrics = orchestrator.metrics_snapshot();
    assert_eq!(metrics.tasks_completed, 1);
    assert_eq!(metrics.tasks_failed, 0);
    assert_eq!(metrics.success_rate, 1.0);
}

/// Scenario 2: node failure triggers a retry, redispatch to a second
/// node completes the task.
#[tokio::test]
async fn scenario_retry_on_node_failure() {
    let (orchestrator, _executor) = harness();
    orchestrator.register_node(node_spec("n1", &["cpu"])).unwrap();
    orchestrator.register_node(node_spec("n2", &["cpu"])).unwrap();

    orchestrator
        .submit_task(task("t1", TaskPriority::Normal, &["cpu"], 3))
        .unwrap();

    // Scheduler dispatches to whichever node the round-robin/weighted
    // policy selects first; pin it down so the rest of the scenario is
    // deterministic regardless of policy internals.
    let first_outcome = orchestrator.scheduler.tick();
    let SchedulerOutcome::Dispatched { nodes, .. } = first_outcome else {
        panic!("expected dispatch, got {first_outcome:?}");
    };
    let first_node = nodes[0].clone();
    let second_node = if first_node == "n1" { "n2" } else { "n1" };

    // Node goes offline (heartbeat timeout, simulated directly via the
    // registry/recovery path rather than sleeping 120s).
    orchestrator
        .registry
        .set_status(&first_node, NodeStatus::Offline)
        .unwrap();
    let outcomes = orchestrator.recovery.handle_node_offline(&first_node);
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        outcomes[0],
        orchestrator_core::RecoveryOutcome::Retried { .. }
    ));

    let (bucket, retried) = orchestrator.get_task("t1").unwrap();
    assert!(matches!(bucket, orchestrator_core::Bucket::Pending));
    assert_eq!(retried.retry_count, 1);
    assert!(retried.assigned_nodes.is_empty());

    // Redispatch: only the surviving node is Active, so it must win.
    let second_outcome = orchestrator.scheduler.tick();
    assert_eq!(
        second_outcome,
        SchedulerOutcome::Dispatched {
            task_id: "t1".to_string(),
            nodes: vec![second_node.to_string()]
        }
    );

    orchestrator
        .report_task_result(TaskResult {
            task_id: "t1".to_string(),
            outcome: TaskOutcome::Success,
            result_data: None,
            error_message: None,
            execution_time: Some(1.0),
            node_id: second_node.to_string(),
            agent_id: None,
        })
        .unwrap();

    assert!(matches!(
        orchestrator.get_task("t1").unwrap().0,
        orchestrator_core::Bucket::Completed
    ));
    assert_eq!(orchestrator.metrics_snapshot().tasks_failed, 0);
}

/// Scenario 3: retry budget exhaustion after repeated transient dispatch
/// failures.
#[tokio::test]
async fn scenario_retry_exhaustion() {
    let (orchestrator, executor) = harness();
    orchestrator.register_node(node_spec("n1", &["cpu"])).unwrap();
    executor.set_rejecting("n1");

    orchestrator
        .submit_task(task("t1", TaskPriority::Normal, &["cpu"], 2))
        .unwrap();

    // Three dispatch attempts total: the initial dispatch plus two
    // retries, all rejected by the node.
    for attempt in 0..3 {
        let outcome = orchestrator.scheduler.tick();
        match outcome {
            SchedulerOutcome::Dispatched { task_id, nodes } => {
                assert_eq!(task_id, "t1");
                assert_eq!(nodes, vec!["n1".to_string()]);
            }
            other => panic!("attempt {attempt}: expected dispatch, got {other:?}"),
        }
        // Dispatch runs off the scheduling thread as a spawned task; a
        // plain thread sleep here would starve the single-threaded test
        // runtime and the spawned task would never get polled, so yield
        // via an async sleep instead.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let terminal = orchestrator.task_store.get_terminal("t1").unwrap();
    assert!(terminal.error_message.unwrap().contains("max retries"));
    assert_eq!(orchestrator.metrics_snapshot().tasks_failed, 1);
}

/// Scenario 4: a later-submitted Critical task preempts an
/// earlier-submitted Low task for a single eligible node.
#[tokio::test]
async fn scenario_priority_preemption() {
    let (orchestrator, _executor) = harness();
    orchestrator.register_node(node_spec("n1", &[])).unwrap();

    orchestrator
        .submit_task(task("t_low", TaskPriority::Low, &[], 3))
        .unwrap();
    orchestrator
        .submit_task(task("t_crit", TaskPriority::Critical, &[], 3))
        .unwrap();

    let outcome = orchestrator.scheduler.tick();
    assert_eq!(
        outcome,
        SchedulerOutcome::Dispatched {
            task_id: "t_crit".to_string(),
            nodes: vec!["n1".to_string()]
        }
    );
}

/// Scenario 5: a task requiring an unavailable capability stays pending
/// without raising an eligibility error.
#[test]
fn scenario_capability_filter_leaves_task_pending() {
    let (orchestrator, _executor) = harness();
    orchestrator.register_node(node_spec("n1", &["cpu"])).unwrap();

    orchestrator
        .submit_task(task("t1", TaskPriority::Normal, &["gpu"], 3))
        .unwrap();

    for _ in 0..6 {
        let outcome = orchestrator.scheduler.tick();
        assert!(matches!(
            outcome,
            SchedulerOutcome::NoEligibleNode { .. }
        ));
    }

    assert!(matches!(
        orchestrator.get_task("t1").unwrap().0,
        orchestrator_core::Bucket::Pending
    ));
}

/// Scenario 6: retention evicts a completed task once its age exceeds
/// the configured retention window.
#[tokio::test]
async fn scenario_retention_evicts_after_window() {
    let (orchestrator, _executor) = harness();
    orchestrator.register_node(node_spec("n1", &["cpu"])).unwrap();
    orchestrator
        .submit_task(task("t1", TaskPriority::Normal, &["cpu"], 3))
        .unwrap();
    orchestrator.scheduler.tick();
    orchestrator
        .report_task_result(TaskResult {
            task_id: "t1".to_string(),
            outcome: TaskOutcome::Success,
            result_data: None,
            error_message: None,
            execution_time: Some(1.0),
            node_id: "n1".to_string(),
            agent_id: None,
        })
        .unwrap();

    assert!(matches!(
        orchestrator.get_task("t1").unwrap().0,
        orchestrator_core::Bucket::Completed
    ));

    let immediate_retention = RetentionPolicy::new(
        orchestrator.task_store.clone(),
        RetentionConfig {
            retention: Duration::from_secs(0),
            sweep_interval: Duration::from_secs(3600),
        },
    );
    tokio::time::sleep(Duration::from_millis(5)).await;
    let (completed_evicted, _) = immediate_retention.sweep();
    assert_eq!(completed_evicted, 1);
    assert!(orchestrator.get_task("t1").is_none());
}

/// A registered agent bumps the owning node's agents_count and is
/// removed again when the node is unregistered.
#[test]
fn node_agent_registration_and_removal() {
    let (orchestrator, _executor) = harness();
    orchestrator.register_node(node_spec("n1", &["cpu"])).unwrap();
    orchestrator
        .register_agent(
            AgentSpec {
                agent_id: "a1".to_string(),
                agent_type: "worker".to_string(),
                capabilities: HashSet::from(["cpu".to_string()]),
                specialized_models: vec![],
            },
            "n1",
        )
        .unwrap();

    assert_eq!(orchestrator.get_node("n1").unwrap().agents_count, 1);

    orchestrator.unregister_node("n1").unwrap();
    assert!(orchestrator.get_node("n1").is_none());
}

/// Heartbeat updates never move last_heartbeat_ts backwards, even when
/// two heartbeats race.
#[test]
fn heartbeat_timestamp_is_monotonic_across_updates() {
    let (orchestrator, _executor) = harness();
    orchestrator.register_node(node_spec("n1", &["cpu"])).unwrap();

    let before = orchestrator.get_node("n1").unwrap().last_heartbeat_ts;
    orchestrator
        .heartbeat("n1", HeartbeatMetrics::default(), None)
        .unwrap();
    let after = orchestrator.get_node("n1").unwrap().last_heartbeat_ts;

    assert!(after >= before);
}
