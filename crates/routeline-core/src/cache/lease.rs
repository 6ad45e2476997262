//! Lease - TTL 付きの排他ロック（non-blocking mutex）
//!
//! - 取得できなければ即座に `None`（待たない）
//! - 再入不可（同じ名前を二重に取ると二回目は失敗）
//! - 持ち主がクラッシュしても TTL で自然に失効
//! - 解放は token 一致時のみ（他人の lease を消さない）

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::domain::Result;
use crate::ports::KeyValueStore;

#[must_use = "a lease should be released when the guarded work is done"]
pub struct Lease {
    kv: Arc<dyn KeyValueStore>,
    name: String,
    token: String,
}

impl Lease {
    pub async fn acquire(
        kv: &Arc<dyn KeyValueStore>,
        name: &str,
        token: String,
        ttl: Duration,
    ) -> Result<Option<Lease>> {
        if !kv.set_nx(name, token.clone().into_bytes(), Some(ttl)).await? {
            debug!(lease = name, "lease held elsewhere");
            return Ok(None);
        }
        Ok(Some(Lease {
            kv: Arc::clone(kv),
            name: name.to_string(),
            token,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release if still ours. Returns `false` when the lease had already expired.
    pub async fn release(self) -> Result<bool> {
        self.kv
            .compare_and_delete(&self.name, self.token.as_bytes())
            .await
    }
}
