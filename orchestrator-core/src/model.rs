//! Core data model: Node, Agent, Task and their associated enums.
//!
//! These are strongly-typed records rather than dynamic attribute bags;
//! `metadata` remains an opaque map at the boundary where callers need to
//! stash arbitrary values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Node operational status. Active<->Degraded transitions freely,
/// Active/Degraded->Offline on heartbeat timeout, Offline->Active on fresh
/// heartbeat/re-registration, Maintenance only by operator, Error only on
/// persistent dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Degraded,
    Maintenance,
    Offline,
    Error,
}

/// A remote host that can execute tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub node_type: String,
    pub status: NodeStatus,
    pub capabilities: HashSet<String>,
    pub agents_count: u32,
    pub cpu_usage: f32,
    pub memory_usage: f32,
    pub gpu_usage: f32,
    pub network_latency_ms: f64,
    pub load_score: f64,
    pub reliability_score: f64,
    pub last_heartbeat_ts: DateTime<Utc>,
    pub version: String,
    pub location: Option<String>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Node {
    /// Clamp load_score and reliability_score into [0, 1] per the
    /// registry's invariant. Called at every mutation site.
    pub fn clamp_scores(&mut self) {
        self.load_score = self.load_score.clamp(0.0, 1.0);
        self.reliability_score = self.reliability_score.clamp(0.0, 1.0);
    }

    pub fn cpu_headroom(&self) -> f32 {
        100.0 - self.cpu_usage
    }

    pub fn memory_headroom(&self) -> f32 {
        100.0 - self.memory_usage
    }
}

/// Agent status; kept deliberately small — a simple active/idle style set
/// is enough for what node operators report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Offline,
}

/// A worker instance within a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub node_id: String,
    pub agent_type: String,
    pub status: AgentStatus,
    pub capabilities: HashSet<String>,
    pub tasks_running: u32,
    pub tasks_completed: u64,
    pub efficiency_score: f64,
    pub specialized_models: Vec<String>,
    pub last_activity_ts: DateTime<Utc>,
    pub resource_usage: HashMap<String, f64>,
}

/// Task priority; ordinal ordering gives the strict-priority queue its
/// comparison for free (`Critical` sorts before `Background`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Normal,
    Low,
    Background,
}

/// Resource and capability requirements a node must satisfy to be
/// eligible for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequirements {
    #[serde(default)]
    pub capabilities: HashSet<String>,
    #[serde(default)]
    pub min_cpu_headroom: f32,
    #[serde(default)]
    pub min_memory_headroom: f32,
    #[serde(default = "default_max_load")]
    pub max_load: f64,
    #[serde(default = "default_redundancy")]
    pub redundancy: u32,
}

fn default_max_load() -> f64 {
    0.9
}

fn default_redundancy() -> u32 {
    1
}

impl Default for TaskRequirements {
    fn default() -> Self {
        Self {
            capabilities: HashSet::new(),
            min_cpu_headroom: 0.0,
            min_memory_headroom: 0.0,
            max_load: default_max_load(),
            redundancy: default_redundancy(),
        }
    }
}

/// Terminal status of a task once it has left the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Completed,
    Failed,
}

/// A unit of work submitted by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub task_type: String,
    pub priority: TaskPriority,
    pub requirements: TaskRequirements,
    pub input_data: serde_json::Value,
    pub timeout_sec: u64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub assigned_nodes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub callback_url: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// The terminal record produced when a task leaves the active set,
/// carrying either a result or an error but never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalTask {
    pub task: Task,
    pub status: TerminalStatus,
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub execution_time: Option<f64>,
    pub node_id: Option<String>,
    pub agent_id: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl TerminalTask {
    pub fn completed(
        task: Task,
        result_data: Option<serde_json::Value>,
        execution_time: Option<f64>,
        node_id: Option<String>,
        agent_id: Option<String>,
    ) -> Self {
        Self {
            task,
            status: TerminalStatus::Completed,
            result_data,
            error_message: None,
            execution_time,
            node_id,
            agent_id,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(
        task: Task,
        error_message: String,
        node_id: Option<String>,
        agent_id: Option<String>,
    ) -> Self {
        Self {
            task,
            status: TerminalStatus::Failed,
            result_data: None,
            error_message: Some(error_message),
            execution_time: None,
            node_id,
            agent_id,
            completed_at: Utc::now(),
        }
    }
}

/// The outcome reported back from a node dispatch, driving
/// `TaskStore::Complete`/`Fail` and `LoadBalancer::update_performance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub outcome: TaskOutcome,
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub execution_time: Option<f64>,
    pub node_id: String,
    pub agent_id: Option<String>,
}

/// Classification of a reported failure, used by Recovery to decide
/// between retry and immediate failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    Transient,
    Permanent,
}
