//! RemoteShare port - リモートのファイル共有

use async_trait::async_trait;

use crate::domain::{NetworkLocation, Result};

/// Directory entries that a share listing never reports.
pub const IGNORED_ENTRIES: &[&str] = &[".", "..", ".DS_Store"];

pub fn is_ignored_entry(name: &str) -> bool {
    IGNORED_ENTRIES.contains(&name)
}

#[async_trait]
pub trait RemoteShare: Send + Sync {
    /// File names directly under `location`, without ignored entries.
    async fn list(&self, location: &NetworkLocation) -> Result<Vec<String>>;

    async fn read(&self, location: &NetworkLocation, name: &str) -> Result<Vec<u8>>;

    async fn write(&self, location: &NetworkLocation, name: &str, data: &[u8]) -> Result<()>;

    /// Fails with `PipelineError::NotFound` when the file does not exist.
    async fn delete(&self, location: &NetworkLocation, name: &str) -> Result<()>;
}
