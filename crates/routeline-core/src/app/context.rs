//! PipelineContext - ハンドラと periodic loop が共有する依存関係一式
//!
//! 起動時に一度だけ組み立て、`Arc<PipelineContext>` で配ります。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::cache::{LocalBlobCache, SharedCache};
use crate::domain::{
    DEFAULT_BLOCK_SIZE, ErrorKind, FileGrammar, JobChange, JobId, JobRecord, Result, TaskId,
};
use crate::ports::{
    Clock, Dispatcher, Engine, IdGenerator, KeyValueStore, Ledger, RemoteShare, dispatch_task,
};
use crate::typed::Task;

/// Tunables that are not owned by a single collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub block_size: usize,
    /// TTL of the scan and admission leases.
    pub lease_ttl: Duration,
    /// Parent directory of per-invocation engine work directories.
    pub scratch_dir: PathBuf,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            lease_ttl: Duration::from_secs(10),
            scratch_dir: std::env::temp_dir().join("routeline"),
        }
    }
}

pub struct PipelineContext {
    pub ledger: Arc<dyn Ledger>,
    /// Raw store behind the shared cache; leases live here too.
    pub kv: Arc<dyn KeyValueStore>,
    pub shared: SharedCache,
    pub local: Arc<LocalBlobCache>,
    pub share: Arc<dyn RemoteShare>,
    pub engine: Arc<dyn Engine>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub grammar: FileGrammar,
    pub settings: PipelineSettings,
}

impl PipelineContext {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn dispatch<T: Task>(&self, task: &T) -> Result<TaskId> {
        dispatch_task(self.dispatcher.as_ref(), self.ids.as_ref(), task).await
    }

    pub async fn modify_job(&self, id: JobId, change: JobChange) -> Result<JobRecord> {
        self.ledger.modify_job(id, change, self.now()).await
    }

    /// Mark a job ERROR. A job that already completed is left alone.
    pub async fn fail_job(&self, id: JobId, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        match self.modify_job(id, JobChange::Fail { reason: reason.clone() }).await {
            Ok(_) => {
                warn!(job_id = %id, reason = %reason, "job failed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::Permanent => {
                warn!(job_id = %id, error = %e, "job could not be marked failed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Append a fresh LAUNCHED job for a terminal job's measurement file.
    pub async fn restart_job(&self, id: JobId) -> Result<JobRecord> {
        let new_id = self.ids.generate_job_id();
        let job = self.ledger.restart_job(id, new_id, self.now()).await?;
        info!(job_id = %job.id, previous = %id, "job restarted");
        Ok(job)
    }
}
