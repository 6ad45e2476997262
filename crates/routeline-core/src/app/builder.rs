//! AppBuilder - Handler の登録と起動時検証
//!
//! # Fail-fast 設計
//! - expect_tasks() で期待される task_type を登録
//! - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - 不足があれば BuildError を返す

use std::sync::Arc;

use super::context::PipelineContext;
use super::fetch::{FetchDesignHandler, FetchMeasurementsHandler};
use super::output::WriteOutputHandler;
use super::pipeline::{AggregateHandler, RouteBlockHandler};
use super::runtime::Runtime;
use super::tasks::{
    Aggregate, FetchDesign, FetchMeasurements, PIPELINE_TASKS, RouteBlock, WriteOutput,
};
use crate::typed::{Handler, RegistryError, Task, TaskRegistry};

/// AppBuilder は Runtime を構築
///
/// # 使用例
/// ```ignore
/// let runtime = AppBuilder::new()
///     .register::<RouteBlock, _>(RouteBlockHandler::new(ctx))?
///     .expect_tasks(&[RouteBlock::TYPE])
///     .build()?;
/// ```
pub struct AppBuilder {
    registry: TaskRegistry,
    expected_tasks: Option<Vec<String>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: TaskRegistry::new(),
            expected_tasks: None,
        }
    }

    /// Builder with every pipeline stage handler registered and expected.
    pub fn pipeline(ctx: &Arc<PipelineContext>) -> Result<Self, BuildError> {
        Ok(Self::new()
            .register::<FetchDesign, _>(FetchDesignHandler::new(Arc::clone(ctx)))?
            .register::<FetchMeasurements, _>(FetchMeasurementsHandler::new(Arc::clone(ctx)))?
            .register::<RouteBlock, _>(RouteBlockHandler::new(Arc::clone(ctx)))?
            .register::<Aggregate, _>(AggregateHandler::new(Arc::clone(ctx)))?
            .register::<WriteOutput, _>(WriteOutputHandler::new(Arc::clone(ctx)))?
            .expect_tasks(PIPELINE_TASKS))
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<Runtime, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let registered_types = self.registry.registered_types();
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|x| !registered_types.contains(x))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }
        Ok(Runtime::new(self.registry))
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}
