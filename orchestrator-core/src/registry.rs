//! Authoritative store of Nodes and Agents.
//!
//! Backed by `DashMap` for concurrent indexed lookups. All operations here
//! are synchronous and local; there is no retry.

use crate::error::{OrchestratorError, Result};
use crate::model::{Agent, Node, NodeStatus};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// A consistent point-in-time view of the registry, handed to the
/// scheduler and the load balancer for a single scheduling pass.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub nodes: Vec<Node>,
    pub agents: Vec<Agent>,
}

/// Node and agent metrics carried by a heartbeat.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatMetrics {
    pub cpu_usage: Option<f32>,
    pub memory_usage: Option<f32>,
    pub gpu_usage: Option<f32>,
    pub network_latency_ms: Option<f64>,
    pub load_score: Option<f64>,
}

/// Specification for registering a new node.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub node_type: String,
    pub capabilities: HashSet<String>,
    pub version: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub agent_id: String,
    pub agent_type: String,
    pub capabilities: HashSet<String>,
    pub specialized_models: Vec<String>,
}

/// Source of truth for nodes and agents; indexed lookups; status
/// transitions.
#[derive(Debug, Default)]
pub struct Registry {
    nodes: DashMap<String, Node>,
    agents: DashMap<String, Agent>,
    node_agents: DashMap<String, HashSet<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent per node_id only when re-registration carries an
    /// identical host:port; otherwise replaces the entry and logs a
    /// rebind.
    pub fn register_node(&self, spec: NodeSpec) -> Result<()> {
        if spec.node_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "node_id must not be empty".to_string(),
            ));
        }

        let now = Utc::now();

        if let Some(existing) = self.nodes.get(&spec.node_id) {
            if existing.host == spec.host && existing.port == spec.port {
                debug!(node_id = %spec.node_id, "idempotent re-registration");
                return Ok(());
            }
            warn!(
                node_id = %spec.node_id,
                old = %format!("{}:{}", existing.host, existing.port),
                new = %format!("{}:{}", spec.host, spec.port),
                "node rebind: replacing registration"
            );
        }

        let node = Node {
            node_id: spec.node_id.clone(),
            host: spec.host,
            port: spec.port,
            node_type: spec.node_type,
            status: NodeStatus::Active,
            capabilities: spec.capabilities,
            agents_count: 0,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            gpu_usage: 0.0,
            network_latency_ms: 0.0,
            load_score: 0.0,
            reliability_score: 1.0,
            last_heartbeat_ts: now,
            version: spec.version,
            location: spec.location,
            tasks_completed: 0,
            tasks_failed: 0,
            metadata: Default::default(),
        };

        self.nodes.insert(spec.node_id.clone(), node);
        self.node_agents.entry(spec.node_id).or_default();
        Ok(())
    }

    pub fn register_agent(&self, spec: AgentSpec, node_id: &str) -> Result<()> {
        if !self.nodes.contains_key(node_id) {
            return Err(OrchestratorError::UnknownEntity(format!(
                "node {node_id} not found"
            )));
        }
        if self.agents.contains_key(&spec.agent_id) {
            return Err(OrchestratorError::Conflict(format!(
                "agent {} already registered",
                spec.agent_id
            )));
        }

        let agent = Agent {
            agent_id: spec.agent_id.clone(),
            node_id: node_id.to_string(),
            agent_type: spec.agent_type,
            status: crate::model::AgentStatus::Idle,
            capabilities: spec.capabilities,
            tasks_running: 0,
            tasks_completed: 0,
            efficiency_score: 1.0,
            specialized_models: spec.specialized_models,
            last_activity_ts: Utc::now(),
            resource_usage: Default::default(),
        };

        self.agents.insert(spec.agent_id.clone(), agent);
        self.node_agents
            .entry(node_id.to_string())
            .or_default()
            .insert(spec.agent_id);

        if let Some(mut node) = self.nodes.get_mut(node_id) {
            node.agents_count = self
                .node_agents
                .get(node_id)
                .map(|ids| ids.len() as u32)
                .unwrap_or(0);
        }

        Ok(())
    }

    /// Removes the node and all its agents. Callers (Recovery) are
    /// responsible for reacting to in-flight tasks.
    pub fn unregister_node(&self, node_id: &str) -> Result<()> {
        if self.nodes.remove(node_id).is_none() {
            return Err(OrchestratorError::UnknownEntity(format!(
                "node {node_id} not found"
            )));
        }
        if let Some((_, agent_ids)) = self.node_agents.remove(node_id) {
            for agent_id in agent_ids {
                self.agents.remove(&agent_id);
            }
        }
        info!(node_id, "node unregistered");
        Ok(())
    }

    /// Updates heartbeat timestamp, resource fields, load score; applies
    /// a status transition if one is supplied. Transitions are idempotent.
    pub fn update_heartbeat(
        &self,
        node_id: &str,
        metrics: HeartbeatMetrics,
        new_status: Option<NodeStatus>,
    ) -> Result<()> {
        let mut node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| OrchestratorError::UnknownEntity(format!("node {node_id} not found")))?;

        let now = Utc::now();
        if now >= node.last_heartbeat_ts {
            node.last_heartbeat_ts = now;
        }

        if let Some(cpu) = metrics.cpu_usage {
            node.cpu_usage = cpu;
        }
        if let Some(mem) = metrics.memory_usage {
            node.memory_usage = mem;
        }
        if let Some(gpu) = metrics.gpu_usage {
            node.gpu_usage = gpu;
        }
        if let Some(latency) = metrics.network_latency_ms {
            node.network_latency_ms = latency;
        }
        if let Some(load) = metrics.load_score {
            node.load_score = load;
        }
        node.clamp_scores();

        if let Some(status) = new_status {
            apply_transition(&mut node, status);
        }

        Ok(())
    }

    /// Operator-driven override; the only caller allowed to set
    /// Maintenance, and used by the fault detector/heartbeat monitor for
    /// Degraded/Offline.
    pub fn set_status(&self, node_id: &str, status: NodeStatus) -> Result<()> {
        let mut node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| OrchestratorError::UnknownEntity(format!("node {node_id} not found")))?;
        apply_transition(&mut node, status);
        Ok(())
    }

    pub fn get_node(&self, node_id: &str) -> Option<Node> {
        self.nodes.get(node_id).map(|n| n.value().clone())
    }

    pub fn record_task_outcome(&self, node_id: &str, success: bool) {
        if let Some(mut node) = self.nodes.get_mut(node_id) {
            if success {
                node.tasks_completed += 1;
            } else {
                node.tasks_failed += 1;
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Immutable view of nodes and agents suitable for the scheduler pass.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            nodes: self.nodes.iter().map(|e| e.value().clone()).collect(),
            agents: self.agents.iter().map(|e| e.value().clone()).collect(),
        }
    }
}

fn apply_transition(node: &mut Node, new_status: NodeStatus) {
    if node.status == new_status {
        return;
    }
    debug!(node_id = %node.node_id, from = ?node.status, to = ?new_status, "node status transition");
    node.status = new_status;
}
