//! REST control surface: node lifecycle, task submission, fleet status,
//! and the orchestrator's own start/stop control.
//!
//! Handlers are thin: validate the wire shape, translate to an
//! `orchestrator-core` call, translate the error back to a status code.
//! All state lives behind `Arc<Orchestrator>`; nothing here is stateful
//! on its own besides the broadcast channel and the background-loop
//! cancellation handle.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use orchestrator_core::{
    AgentSpec, HeartbeatMetrics, Node, NodeSpec, NodeStatus, Orchestrator, OrchestratorError,
    Task, TaskOutcome, TaskPriority, TaskRequirements, TaskResult,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::instrument;
use uuid::Uuid;

use crate::ws::{ws_handler, EventBroadcaster, EventType};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub broadcaster: EventBroadcaster,
    pub background: Arc<Mutex<Option<CancellationToken>>>,
    pub started_at: DateTime<Utc>,
    pub websocket_enabled: bool,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            broadcaster: EventBroadcaster::new(),
            background: Arc::new(Mutex::new(None)),
            started_at: Utc::now(),
            websocket_enabled: true,
        }
    }

    pub fn with_websocket_enabled(mut self, enabled: bool) -> Self {
        self.websocket_enabled = enabled;
        self
    }
}

pub fn router(state: AppState) -> Router {
    let websocket_enabled = state.websocket_enabled;
    let mut router = Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/nodes/:id", get(get_node))
        .route("/api/v1/nodes/:id/register", post(register_node))
        .route("/api/v1/nodes/:id/heartbeat", post(node_heartbeat))
        .route("/api/v1/nodes/:id/status", put(set_node_status))
        .route("/api/v1/nodes/:id", delete(deregister_node))
        .route("/api/v1/tasks", post(submit_task).get(list_tasks))
        .route("/api/v1/tasks/:id", get(get_task))
        .route("/api/v1/tasks/:id/result", post(report_task_result))
        .route("/api/v1/metrics", get(metrics))
        .route("/api/v1/control/start", post(control_start))
        .route("/api/v1/control/stop", post(control_stop));

    if websocket_enabled {
        router = router.route("/ws", get(ws_handler));
    }

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_status(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::UnknownEntity(_) => StatusCode::NOT_FOUND,
        OrchestratorError::Conflict(_) => StatusCode::CONFLICT,
        OrchestratorError::QueueFull(_) => StatusCode::TOO_MANY_REQUESTS,
        OrchestratorError::TransientDispatch(_)
        | OrchestratorError::PermanentDispatch(_)
        | OrchestratorError::NodeFailure(_)
        | OrchestratorError::Timeout(_)
        | OrchestratorError::DeadlineExceeded(_)
        | OrchestratorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[instrument(skip(_state))]
async fn health(State(_state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[instrument(skip(state))]
async fn status(State(state): State<AppState>) -> Json<orchestrator_core::FleetMetrics> {
    Json(state.orchestrator.metrics_snapshot())
}

#[instrument(skip(state))]
async fn metrics(
    State(state): State<AppState>,
) -> Json<orchestrator_core::NetworkOptimizationReport> {
    Json(state.orchestrator.optimization_report())
}

#[instrument(skip(state))]
async fn list_nodes(State(state): State<AppState>) -> Json<Vec<Node>> {
    Json(state.orchestrator.list_nodes())
}

#[instrument(skip(state))]
async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Node>, StatusCode> {
    state
        .orchestrator
        .get_node(&id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Deserialize)]
struct RegisterNodeRequest {
    host: String,
    port: u16,
    #[serde(default = "default_node_type")]
    node_type: String,
    #[serde(default)]
    capabilities: HashSet<String>,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    agents: Vec<RegisterAgentRequest>,
}

#[derive(Debug, Deserialize)]
struct RegisterAgentRequest {
    agent_id: String,
    agent_type: String,
    #[serde(default)]
    capabilities: HashSet<String>,
    #[serde(default)]
    specialized_models: Vec<String>,
}

fn default_node_type() -> String {
    "generic".to_string()
}

fn default_version() -> String {
    "unknown".to_string()
}

#[instrument(skip(state, body))]
async fn register_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RegisterNodeRequest>,
) -> Result<Json<Node>, StatusCode> {
    state
        .orchestrator
        .register_node(NodeSpec {
            node_id: id.clone(),
            host: body.host,
            port: body.port,
            node_type: body.node_type,
            capabilities: body.capabilities,
            version: body.version,
            location: body.location,
        })
        .map_err(|e| error_status(&e))?;

    for agent in body.agents {
        state
            .orchestrator
            .register_agent(
                AgentSpec {
                    agent_id: agent.agent_id,
                    agent_type: agent.agent_type,
                    capabilities: agent.capabilities,
                    specialized_models: agent.specialized_models,
                },
                &id,
            )
            .map_err(|e| error_status(&e))?;
    }

    let node = state
        .orchestrator
        .get_node(&id)
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    state.broadcaster.publish(
        EventType::NodeRegistered,
        serde_json::json!({ "node_id": id, "host": node.host, "port": node.port }),
    );

    Ok(Json(node))
}

#[derive(Debug, Deserialize, Default)]
struct HeartbeatRequest {
    #[serde(default)]
    cpu_usage: Option<f32>,
    #[serde(default)]
    memory_usage: Option<f32>,
    #[serde(default)]
    gpu_usage: Option<f32>,
    #[serde(default)]
    network_latency_ms: Option<f64>,
    #[serde(default)]
    load_score: Option<f64>,
    #[serde(default)]
    status: Option<String>,
}

#[instrument(skip(state, body))]
async fn node_heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<HeartbeatRequest>,
) -> Result<Json<Node>, StatusCode> {
    let status = body.status.as_deref().map(parse_node_status).transpose()?;

    state
        .orchestrator
        .heartbeat(
            &id,
            HeartbeatMetrics {
                cpu_usage: body.cpu_usage,
                memory_usage: body.memory_usage,
                gpu_usage: body.gpu_usage,
                network_latency_ms: body.network_latency_ms,
                load_score: body.load_score,
            },
            status,
        )
        .map_err(|e| match e {
            // Unlike most endpoints, an unknown node on heartbeat is a
            // client error, not a 404: the caller is a node reporting its
            // own liveness, and a stale/unregistered id means it needs to
            // re-register, not that it requested a missing resource.
            OrchestratorError::UnknownEntity(_) => StatusCode::BAD_REQUEST,
            other => error_status(&other),
        })?;

    state
        .orchestrator
        .get_node(&id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Deserialize)]
struct SetStatusRequest {
    status: String,
}

#[instrument(skip(state, body))]
async fn set_node_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SetStatusRequest>,
) -> Result<Json<Node>, StatusCode> {
    let status = parse_node_status(&body.status)?;
    state
        .orchestrator
        .registry
        .set_status(&id, status)
        .map_err(|e| error_status(&e))?;

    state
        .orchestrator
        .get_node(&id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

fn parse_node_status(raw: &str) -> Result<NodeStatus, StatusCode> {
    match raw {
        "active" => Ok(NodeStatus::Active),
        "degraded" => Ok(NodeStatus::Degraded),
        "maintenance" => Ok(NodeStatus::Maintenance),
        "offline" => Ok(NodeStatus::Offline),
        "error" => Ok(NodeStatus::Error),
        _ => Err(StatusCode::BAD_REQUEST),
    }
}

/// Deregisters a node. Its active tasks are requeued/failed exactly as
/// they would be on a detected failure, since once this call returns the
/// node is no longer a dispatch candidate.
#[instrument(skip(state))]
async fn deregister_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    state.orchestrator.recovery.handle_node_offline(&id);
    state
        .orchestrator
        .unregister_node(&id)
        .map_err(|e| error_status(&e))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SubmitTaskRequest {
    #[serde(default)]
    task_id: Option<String>,
    task_type: String,
    #[serde(default)]
    priority: Option<TaskPriority>,
    #[serde(default)]
    requirements: TaskRequirements,
    #[serde(default)]
    input_data: serde_json::Value,
    #[serde(default = "default_timeout")]
    timeout_sec: u64,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default)]
    deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    callback_url: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

fn default_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Serialize)]
struct SubmitTaskResponse {
    task_id: String,
}

#[instrument(skip(state, body))]
async fn submit_task(
    State(state): State<AppState>,
    Json(body): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<SubmitTaskResponse>), StatusCode> {
    let task_id = body.task_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let task = Task {
        task_id: task_id.clone(),
        task_type: body.task_type,
        priority: body.priority.unwrap_or(TaskPriority::Normal),
        requirements: body.requirements,
        input_data: body.input_data,
        timeout_sec: body.timeout_sec,
        retry_count: 0,
        max_retries: body.max_retries,
        assigned_nodes: vec![],
        created_at: Utc::now(),
        deadline: body.deadline,
        callback_url: body.callback_url,
        metadata: body.metadata,
    };

    state
        .orchestrator
        .submit_task(task)
        .map_err(|e| error_status(&e))?;

    state.broadcaster.publish(
        EventType::TaskSubmitted,
        serde_json::json!({ "task_id": task_id }),
    );

    Ok((StatusCode::ACCEPTED, Json(SubmitTaskResponse { task_id })))
}

#[derive(Debug, Serialize)]
struct TaskListResponse {
    pending: Vec<Task>,
    active: Vec<Task>,
    completed: Vec<orchestrator_core::TerminalTask>,
    failed: Vec<orchestrator_core::TerminalTask>,
}

#[instrument(skip(state))]
async fn list_tasks(State(state): State<AppState>) -> Json<TaskListResponse> {
    let (pending, active, completed, failed) = state.orchestrator.list_tasks();
    Json(TaskListResponse {
        pending,
        active,
        completed,
        failed,
    })
}

#[derive(Debug, Serialize)]
#[serde(tag = "bucket", rename_all = "snake_case")]
enum TaskStatusResponse {
    Pending { task: Task },
    Active { task: Task },
    Completed { task: Task },
    Failed { task: Task },
}

#[instrument(skip(state))]
async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatusResponse>, StatusCode> {
    let (bucket, task) = state.orchestrator.get_task(&id).ok_or(StatusCode::NOT_FOUND)?;
    let response = match bucket {
        orchestrator_core::Bucket::Pending => TaskStatusResponse::Pending { task },
        orchestrator_core::Bucket::Active => TaskStatusResponse::Active { task },
        orchestrator_core::Bucket::Completed => TaskStatusResponse::Completed { task },
        orchestrator_core::Bucket::Failed => TaskStatusResponse::Failed { task },
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct TaskResultRequest {
    outcome: TaskOutcome,
    #[serde(default)]
    result_data: Option<serde_json::Value>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    execution_time: Option<f64>,
    node_id: String,
    #[serde(default)]
    agent_id: Option<String>,
}

/// Node-initiated callback delivering a task outcome; the alternative to
/// a node-status poll, since the upstream contract treats both as
/// interchangeable ways to carry the same `TaskResult`.
#[instrument(skip(state, body))]
async fn report_task_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TaskResultRequest>,
) -> Result<StatusCode, StatusCode> {
    let outcome = body.outcome;
    let result = TaskResult {
        task_id: id.clone(),
        outcome,
        result_data: body.result_data,
        error_message: body.error_message,
        execution_time: body.execution_time,
        node_id: body.node_id,
        agent_id: body.agent_id,
    };

    state
        .orchestrator
        .report_task_result(result)
        .map_err(|e| error_status(&e))?;

    let event_type = match outcome {
        TaskOutcome::Success => EventType::TaskCompleted,
        TaskOutcome::Permanent => EventType::TaskFailed,
        TaskOutcome::Transient => return Ok(StatusCode::ACCEPTED),
    };
    state
        .broadcaster
        .publish(event_type, serde_json::json!({ "task_id": id }));

    Ok(StatusCode::ACCEPTED)
}

#[instrument(skip(state))]
async fn control_start(State(state): State<AppState>) -> StatusCode {
    let mut guard = state.background.lock().unwrap();
    if guard.is_none() {
        *guard = Some(state.orchestrator.spawn_background_loops());
    }
    StatusCode::OK
}

#[instrument(skip(state))]
async fn control_stop(State(state): State<AppState>) -> StatusCode {
    let mut guard = state.background.lock().unwrap();
    if let Some(token) = guard.take() {
        token.cancel();
    }
    StatusCode::OK
}
