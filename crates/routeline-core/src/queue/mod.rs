//! Queue module: the in-process dispatch substrate.
//!
//! Tasks are delivered at least once. Retry timing and the dead decision live
//! here, driven by each task type's `RetryPolicy` and the error's kind; the
//! handlers only report success or a typed error.

mod memory;
mod record;
mod retry;

pub use memory::InMemoryTaskQueue;
pub use record::{AttemptFailure, TaskRecord, TaskState};
pub use retry::{Decision, RetryPolicy};

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::{PipelineError, Result, TaskEnvelope};

/// What happened to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    RetryScheduled { attempt: u32, delay: Duration },
    /// No more attempts. The caller runs the handler's exhaustion hook.
    Dead,
}

/// A leased task for processing.
/// The worker owns this lease and must either `ack` or `fail`.
///
/// - Queue manages state transitions (Queued -> Running -> ...).
/// - Worker/Runtime executes side effects and reports the result.
#[async_trait]
pub trait TaskLease: Send {
    fn envelope(&self) -> &TaskEnvelope;

    /// Number of this attempt, starting at 1.
    fn attempt(&self) -> u32;

    async fn ack(self: Box<Self>) -> Result<()>;

    /// Report failure; the queue decides retry or dead.
    async fn fail(self: Box<Self>, error: &PipelineError) -> Result<FailureDisposition>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub running: usize,
    pub retry_scheduled: usize,
    pub succeeded: usize,
    pub dead: usize,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, envelope: TaskEnvelope) -> Result<()>;

    /// Lease one ready task, waiting until one is available.
    async fn lease(&self) -> Option<Box<dyn TaskLease>>;

    /// Lease one task that is ready right now, without waiting.
    async fn try_lease(&self) -> Option<Box<dyn TaskLease>>;

    async fn counts_by_state(&self) -> Result<QueueCounts>;
}
