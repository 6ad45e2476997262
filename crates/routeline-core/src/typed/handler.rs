//! Handler trait - Task を実行する Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<T>)
//! - Object-safe trait (DynHandler)
//! - Type erasure パターン (TypedHandler<T, H> → DynHandler)

use std::marker::PhantomData;

use async_trait::async_trait;

use super::task::Task;
use crate::domain::{PipelineError, Result};

/// Handler は Task を実行する
///
/// # ジェネリクスによる型安全性
/// - `Handler<RouteBlock>` は `RouteBlock` しか受け取れない
/// - コンパイル時に Task と Handler の対応が保証される
///
/// リトライ判断は queue 側が `PipelineError::kind()` で行います。
/// Handler はエラーを返すだけで、自分でリトライしません。
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T) -> Result<()>;

    /// Called once when the task is declared dead (retries exhausted or a
    /// non-retryable error).
    async fn on_exhausted(&self, task: T, error: &PipelineError) -> Result<()> {
        let _ = (task, error);
        Ok(())
    }
}

/// DynHandler は object-safe な Handler の抽象化
///
/// TypedHandler<T> を DynHandler に変換することで、
/// HashMap<String, Arc<dyn DynHandler>> に格納可能にします。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, payload: &serde_json::Value) -> Result<()>;
    async fn exhausted_dyn(&self, payload: &serde_json::Value, error: &PipelineError)
    -> Result<()>;
    fn task_type(&self) -> &str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, payload: &serde_json::Value) -> Result<()> {
        let task: T = serde_json::from_value(payload.clone())?;
        self.handler.handle(task).await
    }

    async fn exhausted_dyn(
        &self,
        payload: &serde_json::Value,
        error: &PipelineError,
    ) -> Result<()> {
        let task: T = serde_json::from_value(payload.clone())?;
        self.handler.on_exhausted(task, error).await
    }

    fn task_type(&self) -> &str {
        T::TYPE
    }
}
