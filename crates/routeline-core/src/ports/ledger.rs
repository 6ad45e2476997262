//! Ledger port - 永続ストア（正本）
//!
//! ledger は唯一の強整合ストアです。job の完了判定は必ずここを見ます。
//! 共有キャッシュの内容を完了の根拠にしてはいけません。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    DesignLocation, JobChange, JobId, JobRecord, JobStatus, MeasurementFile, MeasurementFileId,
    Result, Watch, WatchId,
};

/// Outcome of reporting one finished routing block to the fan-in barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockArrival {
    /// Newly recorded; other blocks are still outstanding.
    Recorded { remaining: usize },
    /// This block was already recorded (redelivered task).
    Duplicate,
    /// This arrival completed the barrier. Returned exactly once per job.
    Released,
    /// A block of this job failed permanently; aggregation must never run.
    Poisoned,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn add_watch(&self, watch: Watch) -> Result<()>;

    async fn watches(&self) -> Result<Vec<Watch>>;

    async fn watch(&self, id: WatchId) -> Result<Watch>;

    async fn add_design_location(&self, location: DesignLocation) -> Result<()>;

    async fn design_locations(&self) -> Result<Vec<DesignLocation>>;

    async fn measurement_recorded(&self, watch: WatchId, file_name: &str) -> Result<bool>;

    /// Record a discovered file together with its first job, atomically.
    /// Fails with `DuplicateMeasurement` if the watch already has that file name.
    async fn record_discovery(&self, file: MeasurementFile, job: JobRecord) -> Result<()>;

    async fn measurement(&self, id: MeasurementFileId) -> Result<MeasurementFile>;

    async fn insert_job(&self, job: JobRecord) -> Result<()>;

    async fn job(&self, id: JobId) -> Result<JobRecord>;

    /// All jobs in launch order.
    async fn jobs(&self) -> Result<Vec<JobRecord>>;

    /// Jobs with `status`, in launch order.
    async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<JobRecord>>;

    /// Apply a validated change atomically and return the updated record.
    async fn modify_job(
        &self,
        id: JobId,
        change: JobChange,
        now: DateTime<Utc>,
    ) -> Result<JobRecord>;

    /// Append a LAUNCHED copy of terminal job `id` under `new_id`.
    /// Fails with `InvalidTransition` while `id` is still in flight.
    async fn restart_job(&self, id: JobId, new_id: JobId, now: DateTime<Utc>)
    -> Result<JobRecord>;

    /// Expect `blocks` routing blocks for `job`. Re-arming an armed barrier is a no-op.
    async fn arm_barrier(&self, job: JobId, blocks: usize) -> Result<()>;

    /// Record a finished block and count it against the job's work items.
    async fn complete_block(
        &self,
        job: JobId,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<BlockArrival>;

    async fn poison_barrier(&self, job: JobId) -> Result<()>;
}
