//! In-memory queue implementation.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::{
    Decision, FailureDisposition, QueueCounts, RetryPolicy, TaskLease, TaskQueue, TaskRecord,
    TaskState,
};
use crate::domain::{PipelineError, Result, TaskEnvelope, TaskId, TaskType};
use crate::ports::Dispatcher;

/// Scheduled task entry for priority queue.
///
/// We use Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledTask {
    next_run_at: Instant,
    task_id: TaskId,
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering: earlier times have higher priority
        other
            .next_run_at
            .cmp(&self.next_run_at)
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

struct QueueState {
    /// All task records (single source of truth for tasks).
    records: HashMap<TaskId, TaskRecord>,

    /// Ready queue (TaskIds only).
    ready: VecDeque<TaskId>,

    /// Scheduled queue (retry backoff).
    scheduled: BinaryHeap<ScheduledTask>,

    /// Succeeded or dead tasks, oldest first. Only the newest
    /// `retain_finished` keep their records.
    finished: VecDeque<TaskId>,
    retain_finished: usize,
}

/// Retry policies per task type. Fixed once the queue is built.
#[derive(Debug, Clone)]
struct RetryPolicies {
    by_type: HashMap<TaskType, RetryPolicy>,
    default: RetryPolicy,
}

impl RetryPolicies {
    fn policy_for(&self, task_type: &TaskType) -> &RetryPolicy {
        self.by_type.get(task_type).unwrap_or(&self.default)
    }
}

impl QueueState {
    /// Move tasks from scheduled to ready if their time has come.
    fn promote_scheduled_tasks(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.scheduled.peek() {
            if entry.next_run_at > now {
                break; // Heap is sorted, so we can stop
            }
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            if let Some(record) = self.records.get_mut(&entry.task_id)
                && record.state == TaskState::RetryScheduled
            {
                record.requeue();
                self.ready.push_back(entry.task_id);
            }
        }
    }

    fn retire(&mut self, task_id: TaskId) {
        self.finished.push_back(task_id);
        while self.finished.len() > self.retain_finished {
            if let Some(oldest) = self.finished.pop_front() {
                self.records.remove(&oldest);
            }
        }
    }

    fn counts_by_state(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for record in self.records.values() {
            match record.state {
                TaskState::Queued => counts.queued += 1,
                TaskState::Running => counts.running += 1,
                TaskState::Succeeded => counts.succeeded += 1,
                TaskState::RetryScheduled => counts.retry_scheduled += 1,
                TaskState::Dead => counts.dead += 1,
            }
        }
        counts
    }

    fn take_ready(&mut self, queue: &InMemoryTaskQueue) -> Option<InMemoryLease> {
        self.promote_scheduled_tasks();
        while let Some(task_id) = self.ready.pop_front() {
            let Some(record) = self.records.get_mut(&task_id) else {
                continue;
            };
            record.start_attempt();
            return Some(InMemoryLease {
                task_id,
                attempt: record.attempts,
                envelope: record.envelope.clone(),
                queue: Arc::clone(&queue.state),
                policies: Arc::clone(&queue.policies),
                notify: Arc::clone(&queue.notify),
            });
        }
        None
    }
}

/// Finished records kept for inspection unless overridden.
const DEFAULT_RETAINED_FINISHED: usize = 1024;

/// In-memory task queue: the dispatch substrate for a single process.
///
/// Implements both `TaskQueue` (worker side) and `Dispatcher` (producer side).
/// Records of finished tasks are dropped oldest first past a fixed window, so
/// `counts_by_state` reports succeeded and dead tasks within that window only.
pub struct InMemoryTaskQueue {
    state: Arc<Mutex<QueueState>>,
    policies: Arc<RetryPolicies>,
    notify: Arc<Notify>,
}

impl InMemoryTaskQueue {
    pub fn new(default_policy: RetryPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                records: HashMap::new(),
                ready: VecDeque::new(),
                scheduled: BinaryHeap::new(),
                finished: VecDeque::new(),
                retain_finished: DEFAULT_RETAINED_FINISHED,
            })),
            policies: Arc::new(RetryPolicies {
                by_type: HashMap::new(),
                default: default_policy,
            }),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Override the retry policy of one task type.
    pub fn with_policy(mut self, task_type: impl Into<String>, policy: RetryPolicy) -> Self {
        Arc::make_mut(&mut self.policies)
            .by_type
            .insert(TaskType::new(task_type), policy);
        self
    }

    /// How many finished task records to keep.
    pub fn with_retained_finished(mut self, retain: usize) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            state.get_mut().retain_finished = retain;
        }
        self
    }

    /// True when nothing is ready, running or waiting for a retry.
    pub async fn is_idle(&self) -> bool {
        let state = self.state.lock().await;
        state.records.values().all(|r| r.state.is_terminal())
    }

    #[cfg(test)]
    pub(crate) async fn record(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.state.lock().await.records.get(&task_id).cloned()
    }

    /// Envelopes with `task_type` that are pending or recently finished,
    /// in no particular order.
    #[cfg(test)]
    pub(crate) async fn envelopes_of(&self, task_type: &str) -> Vec<TaskEnvelope> {
        let state = self.state.lock().await;
        state
            .records
            .values()
            .filter(|r| r.envelope.task_type().as_str() == task_type)
            .map(|r| r.envelope.clone())
            .collect()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, envelope: TaskEnvelope) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            let task_id = envelope.task_id();
            if state.records.contains_key(&task_id) {
                debug!(task_id = %task_id, "duplicate enqueue ignored");
                return Ok(());
            }
            let max_attempts = self.policies.policy_for(envelope.task_type()).max_attempts;
            state
                .records
                .insert(task_id, TaskRecord::new(envelope, max_attempts));
            state.ready.push_back(task_id);
        }
        // Notify outside the lock
        self.notify.notify_one();
        Ok(())
    }

    async fn lease(&self) -> Option<Box<dyn TaskLease>> {
        loop {
            let next_wake = {
                let mut state = self.state.lock().await;
                if let Some(lease) = state.take_ready(self) {
                    return Some(Box::new(lease));
                }
                state.scheduled.peek().map(|entry| entry.next_run_at)
            };

            // Wait for notification OR next scheduled task time
            if let Some(wake_time) = next_wake {
                tokio::select! {
                    _ = self.notify.notified() => {},
                    _ = tokio::time::sleep_until(wake_time) => {},
                }
            } else {
                self.notify.notified().await;
            }
        }
    }

    async fn try_lease(&self) -> Option<Box<dyn TaskLease>> {
        let mut state = self.state.lock().await;
        state
            .take_ready(self)
            .map(|lease| Box::new(lease) as Box<dyn TaskLease>)
    }

    async fn counts_by_state(&self) -> Result<QueueCounts> {
        Ok(self.state.lock().await.counts_by_state())
    }
}

#[async_trait]
impl Dispatcher for InMemoryTaskQueue {
    async fn dispatch(&self, envelope: TaskEnvelope) -> Result<()> {
        self.enqueue(envelope).await
    }
}

/// Lease implementation for InMemoryTaskQueue.
struct InMemoryLease {
    task_id: TaskId,
    attempt: u32,
    envelope: TaskEnvelope,
    queue: Arc<Mutex<QueueState>>,
    policies: Arc<RetryPolicies>,
    notify: Arc<Notify>,
}

#[async_trait]
impl TaskLease for InMemoryLease {
    fn envelope(&self) -> &TaskEnvelope {
        &self.envelope
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        let mut state = self.queue.lock().await;
        if let Some(record) = state.records.get_mut(&self.task_id) {
            record.mark_succeeded();
            state.retire(self.task_id);
        }
        Ok(())
    }

    async fn fail(self: Box<Self>, error: &PipelineError) -> Result<FailureDisposition> {
        let disposition = {
            let decision = self
                .policies
                .policy_for(self.envelope.task_type())
                .decide(self.attempt, error.kind());
            let mut state = self.queue.lock().await;

            let Some(record) = state.records.get_mut(&self.task_id) else {
                return Ok(FailureDisposition::Dead);
            };

            match decision {
                Decision::MarkDead => {
                    error!(
                        task_id = %self.task_id,
                        task_type = %self.envelope.task_type(),
                        attempts = record.attempts,
                        error = %error,
                        "task is dead"
                    );
                    record.mark_dead(error);
                    state.retire(self.task_id);
                    FailureDisposition::Dead
                }
                Decision::Retry { delay } => {
                    let next_run_at = Instant::now() + delay;
                    warn!(
                        task_id = %self.task_id,
                        task_type = %self.envelope.task_type(),
                        attempt = record.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retry scheduled"
                    );
                    record.schedule_retry(next_run_at, error);
                    state.scheduled.push(ScheduledTask {
                        next_run_at,
                        task_id: self.task_id,
                    });
                    FailureDisposition::RetryScheduled {
                        attempt: self.attempt,
                        delay,
                    }
                }
            }
        }; // Lock released here

        // Notify outside the lock to avoid deadlock
        if matches!(disposition, FailureDisposition::RetryScheduled { .. }) {
            self.notify.notify_one();
        }
        Ok(disposition)
    }
}
