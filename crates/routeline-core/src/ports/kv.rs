//! KeyValueStore port - 期限付き共有 KV ストア
//!
//! Redis 相当の最小操作セットです。すべての操作は単一キーに対して
//! atomic であることを実装に要求します。

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::Result;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Unconditional write. `ttl = None` keeps the value until deleted.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Write only if the key is absent (or expired). Returns whether it was written.
    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool>;

    /// Reset the expiration of an existing key. Returns `false` if it is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete only if the current value equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool>;
}
