//! Shared expiring cache: claim protocol over the remote key-value store.
//!
//! Every blob has three keys (data, derived metadata, status). The status key
//! carries the tri-state marker:
//!
//! - absent: UNCLAIMED
//! - `CLAIMED:<token>`: a fetch is in flight (expires after the claim TTL)
//! - `READY`: data and metadata are present
//!
//! `claim` is a single `set_nx` on the status key, so exactly one caller wins.
//! A retried fetch carries the same token and re-enters its own claim.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::keys::{BlobKey, artifact_key, block_result_key};
use crate::domain::{
    AggregationResult, JobId, MeasurementName, PipelineError, Result, RoutingResult,
};
use crate::ports::KeyValueStore;

const READY: &[u8] = b"READY";
const CLAIMED_PREFIX: &str = "CLAIMED:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    Unclaimed,
    Claimed,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    /// How long an in-flight claim blocks other fetchers.
    pub claim: Duration,
    /// Lifetime of a READY blob; refreshed on admission.
    pub blob: Duration,
    /// Lifetime of block results and the aggregated artifact.
    pub result: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            claim: Duration::from_secs(600),
            blob: Duration::from_secs(50 * 60),
            result: Duration::from_secs(50 * 60),
        }
    }
}

#[derive(Clone)]
pub struct SharedCache {
    kv: Arc<dyn KeyValueStore>,
    ttls: CacheTtls,
}

impl SharedCache {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttls: CacheTtls) -> Self {
        Self { kv, ttls }
    }

    pub fn ttls(&self) -> CacheTtls {
        self.ttls
    }

    pub async fn status(&self, key: &BlobKey) -> Result<ClaimState> {
        let status = self.kv.get(&key.status_key()).await?;
        Ok(match status.as_deref() {
            None => ClaimState::Unclaimed,
            Some(READY) => ClaimState::Ready,
            Some(_) => ClaimState::Claimed,
        })
    }

    /// Atomic UNCLAIMED -> CLAIMED. Returns whether `token` holds the claim.
    pub async fn claim(&self, key: &BlobKey, token: &str) -> Result<bool> {
        let marker = format!("{CLAIMED_PREFIX}{token}");
        let status_key = key.status_key();
        if self
            .kv
            .set_nx(&status_key, marker.clone().into_bytes(), Some(self.ttls.claim))
            .await?
        {
            debug!(key = %status_key, "claim won");
            return Ok(true);
        }
        let current = self.kv.get(&status_key).await?;
        let reentered = current.as_deref() == Some(marker.as_bytes());
        debug!(key = %status_key, reentered, "claim already held");
        Ok(reentered)
    }

    /// Store fetched bytes and metadata, then flip the status to READY.
    pub async fn mark_ready(&self, key: &BlobKey, data: Vec<u8>, meta: String) -> Result<()> {
        let ttl = Some(self.ttls.blob);
        self.kv.set(&key.data_key(), data, ttl).await?;
        self.kv.set(&key.meta_key(), meta.into_bytes(), ttl).await?;
        self.kv.set(&key.status_key(), READY.to_vec(), ttl).await
    }

    /// Blob bytes, only when READY.
    pub async fn read(&self, key: &BlobKey) -> Result<Vec<u8>> {
        if self.status(key).await? != ClaimState::Ready {
            return Err(PipelineError::CacheMiss {
                key: key.data_key(),
            });
        }
        self.get_required(&key.data_key()).await
    }

    /// Derived metadata, only when READY.
    pub async fn meta(&self, key: &BlobKey) -> Result<String> {
        if self.status(key).await? != ClaimState::Ready {
            return Err(PipelineError::CacheMiss {
                key: key.meta_key(),
            });
        }
        let bytes = self.get_required(&key.meta_key()).await?;
        String::from_utf8(bytes).map_err(|e| PipelineError::Store(format!("{}: {e}", key.meta_key())))
    }

    /// Refresh data, metadata and status expirations together.
    /// Returns `false` if any of them had already expired.
    pub async fn lease_extend(&self, key: &BlobKey, ttl: Duration) -> Result<bool> {
        let mut all_present = true;
        for k in [key.data_key(), key.meta_key(), key.status_key()] {
            all_present &= self.kv.expire(&k, ttl).await?;
        }
        Ok(all_present)
    }

    pub async fn put_block_result(
        &self,
        name: &MeasurementName,
        job: JobId,
        index: usize,
        result: &RoutingResult,
    ) -> Result<()> {
        self.put_json(&block_result_key(name, job, index), result).await
    }

    pub async fn block_result(
        &self,
        name: &MeasurementName,
        job: JobId,
        index: usize,
    ) -> Result<RoutingResult> {
        self.get_json(&block_result_key(name, job, index)).await
    }

    pub async fn put_artifact(
        &self,
        name: &MeasurementName,
        job: JobId,
        artifact: &AggregationResult,
    ) -> Result<()> {
        self.put_json(&artifact_key(name, job), artifact).await
    }

    pub async fn artifact(&self, name: &MeasurementName, job: JobId) -> Result<AggregationResult> {
        self.get_json(&artifact_key(name, job)).await
    }

    async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.kv.set(key, bytes, Some(self.ttls.result)).await
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let bytes = self.get_required(key).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get_required(&self, key: &str) -> Result<Vec<u8>> {
        self.kv
            .get(key)
            .await?
            .ok_or_else(|| PipelineError::CacheMiss {
                key: key.to_string(),
            })
    }
}
