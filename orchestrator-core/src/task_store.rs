//! Pending queue, active map, terminal maps, and history ring.
//!
//! Mutations go through a single `RwLock`-protected inner struct so that
//! bucket membership changes atomically with respect to concurrent `Get`
//! calls — an observer never sees a task in two buckets at once.

use crate::error::{OrchestratorError, Result};
use crate::model::{Task, TaskPriority, TaskResult, TerminalStatus, TerminalTask};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::RwLock;

/// Which of the four lifecycle buckets a task currently occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Pending,
    Active,
    Completed,
    Failed,
}

const HISTORY_CAPACITY: usize = 100;

struct Inner {
    pending: BTreeMap<TaskPriority, VecDeque<Task>>,
    active: HashMap<String, Task>,
    completed: HashMap<String, TerminalTask>,
    failed: HashMap<String, TerminalTask>,
    history: VecDeque<TerminalTask>,
    soft_cap: Option<usize>,
}

impl Inner {
    fn pending_len(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    fn push_history(&mut self, terminal: TerminalTask) {
        self.history.push_back(terminal);
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
    }
}

/// Holds and indexes tasks across lifecycle buckets.
pub struct TaskStore {
    inner: RwLock<Inner>,
}

impl TaskStore {
    pub fn new(soft_cap: Option<usize>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                pending: BTreeMap::new(),
                active: HashMap::new(),
                completed: HashMap::new(),
                failed: HashMap::new(),
                history: VecDeque::new(),
                soft_cap,
            }),
        }
    }

    /// Appends to the pending queue. FIFO within a priority band; higher
    /// priority bands are drained first. Returns `QueueFull` if a soft cap
    /// is configured and already reached.
    pub fn enqueue(&self, task: Task) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if let Some(cap) = inner.soft_cap {
            if inner.pending_len() >= cap {
                return Err(OrchestratorError::QueueFull(format!(
                    "pending queue at soft cap {cap}"
                )));
            }
        }
        inner
            .pending
            .entry(task.priority)
            .or_default()
            .push_back(task);
        Ok(())
    }

    /// Re-enters a task at the *front* of its priority band, preserving
    /// relative order with other retries from the same tick. Used by
    /// `Retry`/`ReturnToPending`.
    fn enqueue_front(&self, task: Task) {
        let mut inner = self.inner.write().unwrap();
        inner
            .pending
            .entry(task.priority)
            .or_default()
            .push_front(task);
    }

    /// Removes the highest-priority, oldest task without moving it to
    /// active. Returns `None` if the pending queue is empty.
    pub fn take_next(&self) -> Option<Task> {
        let mut inner = self.inner.write().unwrap();
        let band = inner
            .pending
            .iter_mut()
            .find(|(_, q)| !q.is_empty())
            .map(|(p, _)| *p)?;
        let queue = inner.pending.get_mut(&band)?;
        let task = queue.pop_front();
        if queue.is_empty() {
            inner.pending.remove(&band);
        }
        task
    }

    /// Peeks the highest-priority, oldest pending task without removing
    /// it, used by the scheduler to evaluate eligibility before committing.
    pub fn peek_next(&self) -> Option<Task> {
        let inner = self.inner.read().unwrap();
        inner
            .pending
            .iter()
            .find(|(_, q)| !q.is_empty())
            .and_then(|(_, q)| q.front().cloned())
    }

    /// Moves a (previously peeked) task from pending into active and
    /// stamps its assigned nodes. Fails if the task is not in pending.
    pub fn promote(&self, task_id: &str, assigned_nodes: Vec<String>) -> Result<Task> {
        let mut inner = self.inner.write().unwrap();
        let band = inner
            .pending
            .iter()
            .find(|(_, q)| q.iter().any(|t| t.task_id == task_id))
            .map(|(p, _)| *p)
            .ok_or_else(|| {
                OrchestratorError::Conflict(format!("task {task_id} is not pending"))
            })?;

        let queue = inner.pending.get_mut(&band).unwrap();
        let idx = queue.iter().position(|t| t.task_id == task_id).unwrap();
        let mut task = queue.remove(idx).unwrap();
        if queue.is_empty() {
            inner.pending.remove(&band);
        }

        task.assigned_nodes = assigned_nodes;
        inner.active.insert(task_id.to_string(), task.clone());
        Ok(task)
    }

    /// Atomically removes the head of the pending queue and promotes it,
    /// matching the scheduler's "TakeNext + Promote" step.
    pub fn take_and_promote(&self, assigned_nodes: Vec<String>) -> Option<Task> {
        let mut inner = self.inner.write().unwrap();
        let band = inner
            .pending
            .iter_mut()
            .find(|(_, q)| !q.is_empty())
            .map(|(p, _)| *p)?;
        let queue = inner.pending.get_mut(&band)?;
        let mut task = queue.pop_front()?;
        if queue.is_empty() {
            inner.pending.remove(&band);
        }
        task.assigned_nodes = assigned_nodes;
        inner.active.insert(task.task_id.clone(), task.clone());
        Some(task)
    }

    /// Moves active -> completed.
    pub fn complete(&self, task_id: &str, result: TaskResult) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let task = inner
            .active
            .remove(task_id)
            .ok_or_else(|| OrchestratorError::Conflict(format!("task {task_id} is not active")))?;

        let terminal = TerminalTask::completed(
            task,
            result.result_data,
            result.execution_time,
            Some(result.node_id),
            result.agent_id,
        );
        inner.completed.insert(task_id.to_string(), terminal.clone());
        inner.push_history(terminal);
        Ok(())
    }

    /// Moves active -> failed.
    pub fn fail(&self, task_id: &str, error_message: String, node_id: Option<String>) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let task = inner
            .active
            .remove(task_id)
            .ok_or_else(|| OrchestratorError::Conflict(format!("task {task_id} is not active")))?;

        let terminal = TerminalTask::failed(task, error_message, node_id, None);
        inner.failed.insert(task_id.to_string(), terminal.clone());
        inner.push_history(terminal);
        Ok(())
    }

    /// Moves active -> pending, incrementing retry_count. The caller is
    /// responsible for checking the retry budget before calling this.
    pub fn retry(&self, task_id: &str) -> Result<()> {
        let mut task = {
            let mut inner = self.inner.write().unwrap();
            inner
                .active
                .remove(task_id)
                .ok_or_else(|| OrchestratorError::Conflict(format!("task {task_id} is not active")))?
        };
        task.retry_count += 1;
        task.assigned_nodes.clear();
        self.enqueue_front(task);
        Ok(())
    }

    /// Looks up a task_id across all buckets, returning which bucket it
    /// is in. O(1) per bucket for active/completed/failed; pending is
    /// scanned (bounded by queue depth) since pending order matters more
    /// than pending lookup speed.
    pub fn get(&self, task_id: &str) -> Option<(Bucket, Task)> {
        let inner = self.inner.read().unwrap();
        if let Some(task) = inner.active.get(task_id) {
            return Some((Bucket::Active, task.clone()));
        }
        if let Some(terminal) = inner.completed.get(task_id) {
            return Some((Bucket::Completed, terminal.task.clone()));
        }
        if let Some(terminal) = inner.failed.get(task_id) {
            return Some((Bucket::Failed, terminal.task.clone()));
        }
        for queue in inner.pending.values() {
            if let Some(task) = queue.iter().find(|t| t.task_id == task_id) {
                return Some((Bucket::Pending, task.clone()));
            }
        }
        None
    }

    pub fn get_terminal(&self, task_id: &str) -> Option<TerminalTask> {
        let inner = self.inner.read().unwrap();
        inner
            .completed
            .get(task_id)
            .or_else(|| inner.failed.get(task_id))
            .cloned()
    }

    /// Drops terminal tasks whose completed_at < before_ts. Returns
    /// (completed_evicted, failed_evicted).
    pub fn evict(&self, before_ts: DateTime<Utc>) -> (usize, usize) {
        let mut inner = self.inner.write().unwrap();
        let before_completed = inner.completed.len();
        inner.completed.retain(|_, t| t.completed_at >= before_ts);
        let completed_evicted = before_completed - inner.completed.len();

        let before_failed = inner.failed.len();
        inner.failed.retain(|_, t| t.completed_at >= before_ts);
        let failed_evicted = before_failed - inner.failed.len();

        inner.history.retain(|t| t.completed_at >= before_ts);

        (completed_evicted, failed_evicted)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.read().unwrap().pending_len()
    }

    pub fn active_count(&self) -> usize {
        self.inner.read().unwrap().active.len()
    }

    pub fn completed_count(&self) -> usize {
        self.inner.read().unwrap().completed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.inner.read().unwrap().failed.len()
    }

    /// Removes a task from pending, wherever it sits in its band, and
    /// moves it straight to failed without ever touching active. Used by
    /// the deadline sweep for tasks that expire before dispatch.
    pub fn discard_pending(&self, task_id: &str, error_message: String) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let band = inner
            .pending
            .iter()
            .find(|(_, q)| q.iter().any(|t| t.task_id == task_id))
            .map(|(p, _)| *p)
            .ok_or_else(|| {
                OrchestratorError::Conflict(format!("task {task_id} is not pending"))
            })?;
        let queue = inner.pending.get_mut(&band).unwrap();
        let idx = queue.iter().position(|t| t.task_id == task_id).unwrap();
        let task = queue.remove(idx).unwrap();
        if queue.is_empty() {
            inner.pending.remove(&band);
        }
        let terminal = TerminalTask::failed(task, error_message, None, None);
        inner.failed.insert(task_id.to_string(), terminal.clone());
        inner.push_history(terminal);
        Ok(())
    }

    /// Moves the task currently at the head of its priority band to the
    /// back of that same band, without touching its retry_count. Used by
    /// the scheduler to rotate past a starved head-of-line task that has
    /// repeatedly found no eligible node.
    pub fn rotate_to_back(&self, task_id: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        let Some(band) = inner
            .pending
            .iter()
            .find(|(_, q)| q.front().map(|t| t.task_id == task_id).unwrap_or(false))
            .map(|(p, _)| *p)
        else {
            return false;
        };
        let queue = inner.pending.get_mut(&band).unwrap();
        if let Some(task) = queue.pop_front() {
            queue.push_back(task);
            true
        } else {
            false
        }
    }

    /// All tasks currently active, across every node.
    pub fn all_active(&self) -> Vec<Task> {
        self.inner.read().unwrap().active.values().cloned().collect()
    }

    /// All pending tasks, in priority-then-FIFO dispatch order. Used by
    /// the task-listing endpoint; the scheduler itself only ever needs
    /// `peek_next`/`take_next`.
    pub fn all_pending(&self) -> Vec<Task> {
        let inner = self.inner.read().unwrap();
        inner
            .pending
            .values()
            .flat_map(|q| q.iter().cloned())
            .collect()
    }

    pub fn all_completed(&self) -> Vec<TerminalTask> {
        self.inner.read().unwrap().completed.values().cloned().collect()
    }

    pub fn all_failed(&self) -> Vec<TerminalTask> {
        self.inner.read().unwrap().failed.values().cloned().collect()
    }

    pub fn active_tasks_for_node(&self, node_id: &str) -> Vec<Task> {
        let inner = self.inner.read().unwrap();
        inner
            .active
            .values()
            .filter(|t| t.assigned_nodes.iter().any(|n| n == node_id))
            .cloned()
            .collect()
    }

    /// Snapshot of the last K terminal tasks (most recent last), used by
    /// the metrics aggregator for average response time and throughput.
    pub fn recent_history(&self) -> Vec<TerminalTask> {
        self.inner.read().unwrap().history.iter().cloned().collect()
    }

    pub fn terminal_status(&self, task_id: &str) -> Option<TerminalStatus> {
        self.get_terminal(task_id).map(|t| t.status)
    }
}
