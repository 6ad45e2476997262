//! Per-task bookkeeping kept by the queue.
//!
//! The ready deque and the backoff heap only hold `TaskId`s; the record is
//! where state, attempt counts and the failure history live.

use serde::Serialize;
use tokio::time::Instant;

use crate::domain::{ErrorKind, PipelineError, TaskEnvelope};

/// Where a task is in its delivery life cycle.
///
/// ```text
/// Queued -> Running -> Succeeded
///              |-----> RetryScheduled -> Queued
///              `-----> Dead
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskState {
    Queued,
    Running,
    RetryScheduled,
    Succeeded,
    /// No attempts left, or the last error was not worth retrying.
    Dead,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Dead)
    }
}

/// One failed attempt, as reported by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub attempt: u32,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub envelope: TaskEnvelope,
    pub state: TaskState,
    /// Attempts started so far, including a running one.
    pub attempts: u32,
    pub max_attempts: u32,
    /// Oldest first.
    pub failures: Vec<AttemptFailure>,
    pub next_run_at: Option<Instant>,
    pub enqueued_at: Instant,
    pub updated_at: Instant,
}

impl TaskRecord {
    pub fn new(envelope: TaskEnvelope, max_attempts: u32) -> Self {
        let now = Instant::now();
        Self {
            envelope,
            state: TaskState::Queued,
            attempts: 0,
            max_attempts,
            failures: Vec::new(),
            next_run_at: None,
            enqueued_at: now,
            updated_at: now,
        }
    }

    pub fn last_failure(&self) -> Option<&AttemptFailure> {
        self.failures.last()
    }

    pub fn start_attempt(&mut self) {
        self.attempts += 1;
        self.transition(TaskState::Running);
    }

    pub fn mark_succeeded(&mut self) {
        self.transition(TaskState::Succeeded);
    }

    pub fn mark_dead(&mut self, error: &PipelineError) {
        self.record_failure(error);
        self.transition(TaskState::Dead);
    }

    pub fn schedule_retry(&mut self, next_run_at: Instant, error: &PipelineError) {
        self.record_failure(error);
        self.next_run_at = Some(next_run_at);
        self.transition(TaskState::RetryScheduled);
    }

    /// Back to `Queued` once the backoff has elapsed.
    pub fn requeue(&mut self) {
        self.next_run_at = None;
        self.transition(TaskState::Queued);
    }

    fn record_failure(&mut self, error: &PipelineError) {
        self.failures.push(AttemptFailure {
            attempt: self.attempts,
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    fn transition(&mut self, to: TaskState) {
        self.state = to;
        self.updated_at = Instant::now();
    }
}
