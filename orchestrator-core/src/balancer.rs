//! Given a task and candidate nodes, pick one node per the active policy.
//! The eligibility filter is shared across all policies and applied before
//! any policy-specific selection.

use crate::model::{Node, NodeStatus, Task, TaskOutcome};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const PERFORMANCE_HISTORY_CAPACITY: usize = 100;
const MIN_WEIGHT: f64 = 0.1;

/// The five named load-balancing policies, represented as a tagged sum
/// type rather than a polymorphic strategy object — one policy is active
/// at a time and is dispatched once per scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    RoundRobin,
    #[default]
    WeightedRoundRobin,
    LeastConnections,
    ResourceAware,
    LatencyOptimized,
}

/// True iff the node satisfies the task's capability and resource
/// requirements and is not overloaded or non-Active.
pub fn is_eligible(node: &Node, task: &Task) -> bool {
    node.status == NodeStatus::Active
        && task
            .requirements
            .capabilities
            .iter()
            .all(|c| node.capabilities.contains(c))
        && node.cpu_headroom() >= task.requirements.min_cpu_headroom
        && node.memory_headroom() >= task.requirements.min_memory_headroom
        && node.load_score <= task.requirements.max_load
}

pub fn eligible_nodes<'a>(nodes: &'a [Node], task: &Task) -> Vec<&'a Node> {
    nodes.iter().filter(|n| is_eligible(n, task)).collect()
}

/// Per-node bookkeeping the balancer keeps for observability and for the
/// weighted-round-robin draw; independent of the registry's own
/// `reliability_score`.
#[derive(Debug, Default)]
struct NodeBookkeeping {
    performance_weight: f64,
    outcome_history: VecDeque<bool>,
}

impl NodeBookkeeping {
    fn new() -> Self {
        Self {
            performance_weight: 1.0,
            outcome_history: VecDeque::new(),
        }
    }
}

pub struct LoadBalancer {
    policy: Policy,
    round_robin_counter: AtomicUsize,
    bookkeeping: Mutex<HashMap<String, NodeBookkeeping>>,
    rng: Mutex<StdRng>,
}

impl LoadBalancer {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            round_robin_counter: AtomicUsize::new(0),
            bookkeeping: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Construct with a fixed seed so weighted_round_robin's draw is
    /// reproducible in tests.
    pub fn with_seed(policy: Policy, seed: u64) -> Self {
        Self {
            policy,
            round_robin_counter: AtomicUsize::new(0),
            bookkeeping: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Applies the eligibility filter, then the active policy. Returns
    /// `None` ("no eligible node") if the candidate set is empty after
    /// filtering.
    pub fn select(&self, task: &Task, candidates: &[Node]) -> Option<String> {
        let eligible = eligible_nodes(candidates, task);
        if eligible.is_empty() {
            return None;
        }
        if eligible.len() == 1 {
            return Some(eligible[0].node_id.clone());
        }

        match self.policy {
            Policy::RoundRobin => self.round_robin(&eligible),
            Policy::WeightedRoundRobin => self.weighted_round_robin(&eligible),
            Policy::LeastConnections => Self::least_connections(&eligible),
            Policy::ResourceAware => Self::resource_aware(&eligible),
            Policy::LatencyOptimized => Self::latency_optimized(&eligible),
        }
    }

    /// Selects up to `count` distinct eligible nodes for redundant
    /// dispatch, ordered by load_score (lightest-loaded first) regardless
    /// of the active policy — redundancy only needs distinct candidates,
    /// not the single-node policy's own tie-breaking.
    pub fn select_many(&self, task: &Task, candidates: &[Node], count: usize) -> Vec<String> {
        let eligible = eligible_nodes(candidates, task);
        let mut sorted: Vec<&Node> = eligible;
        sorted.sort_by(|a, b| {
            a.load_score
                .partial_cmp(&b.load_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        sorted
            .into_iter()
            .take(count.max(1))
            .map(|n| n.node_id.clone())
            .collect()
    }

    fn round_robin(&self, eligible: &[&Node]) -> Option<String> {
        let mut sorted: Vec<&&Node> = eligible.iter().collect();
        sorted.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        let idx = self.round_robin_counter.fetch_add(1, Ordering::Relaxed) % sorted.len();
        Some(sorted[idx].node_id.clone())
    }

    fn weighted_round_robin(&self, eligible: &[&Node]) -> Option<String> {
        let mut sorted: Vec<&&Node> = eligible.iter().collect();
        sorted.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        let weights: Vec<f64> = sorted
            .iter()
            .map(|n| ((1.0 - n.load_score) * n.reliability_score).max(MIN_WEIGHT))
            .collect();

        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return sorted.first().map(|n| n.node_id.clone());
        }

        let dist = WeightedIndex::new(&weights).ok()?;
        let mut rng = self.rng.lock().unwrap();
        let idx = dist.sample(&mut *rng);
        Some(sorted[idx].node_id.clone())
    }

    fn least_connections(eligible: &[&Node]) -> Option<String> {
        eligible
            .iter()
            .min_by(|a, b| {
                let score_a = a.agents_count as f64 + a.load_score;
                let score_b = b.agents_count as f64 + b.load_score;
                score_a
                    .partial_cmp(&score_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.node_id.cmp(&b.node_id))
            })
            .map(|n| n.node_id.clone())
    }

    fn resource_aware(eligible: &[&Node]) -> Option<String> {
        eligible
            .iter()
            .max_by(|a, b| {
                resource_score(a)
                    .partial_cmp(&resource_score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.load_score.partial_cmp(&a.load_score).unwrap_or(std::cmp::Ordering::Equal))
                    .then_with(|| b.node_id.cmp(&a.node_id))
            })
            .map(|n| n.node_id.clone())
    }

    fn latency_optimized(eligible: &[&Node]) -> Option<String> {
        eligible
            .iter()
            .min_by(|a, b| {
                a.network_latency_ms
                    .partial_cmp(&b.network_latency_ms)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.load_score.partial_cmp(&b.load_score).unwrap_or(std::cmp::Ordering::Equal))
            })
            .map(|n| n.node_id.clone())
    }

    /// On success, raises the node's internal performance weight toward
    /// 1.0 by +0.1 (clamped); on failure, lowers it by 0.1 (min 0.1).
    /// Retains a bounded history of the last 100 outcomes.
    pub fn update_performance(&self, node_id: &str, outcome: TaskOutcome) {
        let mut book = self.bookkeeping.lock().unwrap();
        let entry = book
            .entry(node_id.to_string())
            .or_insert_with(NodeBookkeeping::new);

        let success = matches!(outcome, TaskOutcome::Success);
        entry.performance_weight = if success {
            (entry.performance_weight + 0.1).min(1.0)
        } else {
            (entry.performance_weight - 0.1).max(MIN_WEIGHT)
        };

        entry.outcome_history.push_back(success);
        while entry.outcome_history.len() > PERFORMANCE_HISTORY_CAPACITY {
            entry.outcome_history.pop_front();
        }
    }

    pub fn performance_weight(&self, node_id: &str) -> f64 {
        self.bookkeeping
            .lock()
            .unwrap()
            .get(node_id)
            .map(|b| b.performance_weight)
            .unwrap_or(1.0)
    }
}

fn resource_score(node: &Node) -> f64 {
    let cpu = 1.0 - (node.cpu_usage as f64 / 100.0);
    let mem = 1.0 - (node.memory_usage as f64 / 100.0);
    let gpu = if node.gpu_usage == 0.0 {
        1.0
    } else {
        1.0 - (node.gpu_usage as f64 / 100.0)
    };
    (cpu + mem + gpu) / 3.0
}
