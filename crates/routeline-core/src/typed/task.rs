//! Task trait - 型付き Task の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`)
//! - Trait bounds の組み合わせ (Serialize + DeserializeOwned + Send + Sync + 'static)

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{Result, TaskEnvelope, TaskId, TaskType};

/// Task は task_type と型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct FetchDesign {
///     job_id: JobId,
/// }
///
/// impl Task for FetchDesign {
///     const TYPE: &'static str = "routeline.fetch.design.v1";
/// }
/// ```
///
/// # 命名規約
/// - `{namespace}.{stage}.{action}.v{major}`
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
}

/// Wrap a typed task into a dispatchable envelope.
pub fn encode<T: Task>(task_id: TaskId, task: &T) -> Result<TaskEnvelope> {
    Ok(TaskEnvelope::new(
        task_id,
        TaskType::new(T::TYPE),
        serde_json::to_value(task)?,
    ))
}

/// Recover a typed task from an envelope's payload.
pub fn decode<T: Task>(envelope: &TaskEnvelope) -> Result<T> {
    Ok(serde_json::from_value(envelope.payload().clone())?)
}


#[cfg(test)]
mod tests {
    use super::fixtures::TestTask;
    use super::*;
    use ulid::Ulid;

    #[test]
    fn encode_tags_envelope_with_task_type() {
        let task_id = TaskId::from_ulid(Ulid::new());
        let envelope = encode(task_id, &TestTask { value: 7 }).unwrap();

        assert_eq!(envelope.task_id(), task_id);
        assert_eq!(envelope.task_type().as_str(), TestTask::TYPE);
        assert_eq!(decode::<TestTask>(&envelope).unwrap(), TestTask { value: 7 });
    }
}
