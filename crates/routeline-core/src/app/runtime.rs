//! Runtime - envelope を登録済み Handler に振り分ける

use std::sync::Arc;

use crate::domain::{PipelineError, Result, TaskEnvelope};
use crate::typed::{DynHandler, TaskRegistry};

/// Runtime executes a `TaskEnvelope` by dispatching to a registered handler.
///
/// Built once by `AppBuilder`; immutable afterwards, so workers share it
/// without locks.
pub struct Runtime {
    registry: Arc<TaskRegistry>,
}

impl Runtime {
    pub fn new(registry: TaskRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Execute one envelope.
    pub async fn execute(&self, envelope: &TaskEnvelope) -> Result<()> {
        self.handler(envelope)?.handle_dyn(envelope.payload()).await
    }

    /// Run the exhaustion hook of a task the queue declared dead.
    pub async fn exhausted(&self, envelope: &TaskEnvelope, error: &PipelineError) -> Result<()> {
        self.handler(envelope)?
            .exhausted_dyn(envelope.payload(), error)
            .await
    }

    fn handler(&self, envelope: &TaskEnvelope) -> Result<Arc<dyn DynHandler>> {
        let task_type = envelope.task_type();
        self.registry
            .get(task_type.as_str())
            .ok_or_else(|| PipelineError::HandlerNotFound(task_type.to_string()))
    }
}
