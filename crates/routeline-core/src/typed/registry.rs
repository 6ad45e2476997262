//! TaskRegistry - Handler の登録と管理
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::task::Task;

/// TaskRegistry は型付き Handler を登録・管理
///
/// # 使用例
/// ```ignore
/// let mut registry = TaskRegistry::new();
/// registry.register::<RouteBlock, _>(RouteBlockHandler::new(ctx))?;
///
/// let handler = registry.get(RouteBlock::TYPE);
/// ```
#[derive(Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
}

/// RegistryError は TaskRegistry の操作エラー
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Handler for task type '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let task_type = T::TYPE.to_string();
        if self.handlers.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        self.handlers
            .insert(task_type, Arc::new(TypedHandler::new(handler)));
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::handler::fixtures::{AnotherTestTaskHandler, TestTaskHandler};
    use crate::typed::task::fixtures::{AnotherTestTask, TestTask};

    #[test]
    fn test_register_and_get() {
        let mut registry = TaskRegistry::new();
        registry
            .register::<TestTask, _>(TestTaskHandler::default())
            .unwrap();

        let retrieved = registry.get(TestTask::TYPE);
        assert!(retrieved.is_some());
        assert!(registry.get("missing.v1").is_none());
    }

    #[test]
    fn test_double_registration() {
        let mut registry = TaskRegistry::new();
        registry
            .register::<TestTask, _>(TestTaskHandler::default())
            .unwrap();
        let result = registry.register::<TestTask, _>(TestTaskHandler::default());
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }

    #[test]
    fn test_different_task_types() {
        let mut registry = TaskRegistry::new();
        registry
            .register::<TestTask, _>(TestTaskHandler::default())
            .unwrap();
        registry
            .register::<AnotherTestTask, _>(AnotherTestTaskHandler)
            .unwrap();

        assert_eq!(
            registry.registered_types(),
            vec![
                AnotherTestTask::TYPE.to_string(),
                TestTask::TYPE.to_string()
            ]
        );
        assert_eq!(
            registry.get(AnotherTestTask::TYPE).unwrap().task_type(),
            AnotherTestTask::TYPE
        );
    }
}
