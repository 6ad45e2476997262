//! Dispatcher port - 非同期タスク配送
//!
//! at-least-once の fire-and-forget 配送です。呼び出し側は完了を待ちません。

use async_trait::async_trait;

use crate::domain::{Result, TaskEnvelope, TaskId};
use crate::ports::IdGenerator;
use crate::typed::{Task, encode};

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, envelope: TaskEnvelope) -> Result<()>;
}

/// Encode a typed task under a fresh id and dispatch it.
pub async fn dispatch_task<T: Task>(
    dispatcher: &dyn Dispatcher,
    ids: &dyn IdGenerator,
    task: &T,
) -> Result<TaskId> {
    let task_id = ids.generate_task_id();
    dispatcher.dispatch(encode(task_id, task)?).await?;
    Ok(task_id)
}
