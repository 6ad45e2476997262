//! InMemoryLedger - 開発用の ledger
//!
//! すべての状態を 1 つの Mutex の下に置き、各操作をアトミックにします。
//! job の一覧順は挿入順（= launch 順）で、admission の FIFO を保証します。

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{
    DesignLocation, JobChange, JobId, JobRecord, JobStatus, MeasurementFile, MeasurementFileId,
    PipelineError, Result, Watch, WatchId,
};
use crate::ports::{BlockArrival, Ledger};

#[derive(Debug, Default)]
struct Barrier {
    expected: usize,
    done: HashSet<usize>,
    released: bool,
    poisoned: bool,
}

#[derive(Default)]
struct LedgerState {
    watches: Vec<Watch>,
    design_locations: Vec<DesignLocation>,
    measurements: HashMap<MeasurementFileId, MeasurementFile>,
    recorded: HashSet<(WatchId, String)>,
    /// Launch order.
    jobs: Vec<JobRecord>,
    job_index: HashMap<JobId, usize>,
    barriers: HashMap<JobId, Barrier>,
}

impl LedgerState {
    fn job_mut(&mut self, id: JobId) -> Result<&mut JobRecord> {
        let pos = *self
            .job_index
            .get(&id)
            .ok_or(PipelineError::UnknownJob(id))?;
        Ok(&mut self.jobs[pos])
    }

    fn push_job(&mut self, job: JobRecord) -> Result<()> {
        if self.job_index.contains_key(&job.id) {
            return Err(PipelineError::Store(format!("job {} already exists", job.id)));
        }
        self.job_index.insert(job.id, self.jobs.len());
        self.jobs.push(job);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn add_watch(&self, watch: Watch) -> Result<()> {
        self.state.lock().await.watches.push(watch);
        Ok(())
    }

    async fn watches(&self) -> Result<Vec<Watch>> {
        Ok(self.state.lock().await.watches.clone())
    }

    async fn watch(&self, id: WatchId) -> Result<Watch> {
        self.state
            .lock()
            .await
            .watches
            .iter()
            .find(|w| w.id == id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found(format!("watch {id}")))
    }

    async fn add_design_location(&self, location: DesignLocation) -> Result<()> {
        self.state.lock().await.design_locations.push(location);
        Ok(())
    }

    async fn design_locations(&self) -> Result<Vec<DesignLocation>> {
        Ok(self.state.lock().await.design_locations.clone())
    }

    async fn measurement_recorded(&self, watch: WatchId, file_name: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .await
            .recorded
            .contains(&(watch, file_name.to_string())))
    }

    async fn record_discovery(&self, file: MeasurementFile, job: JobRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = (file.watch, file.file_name.clone());
        if state.recorded.contains(&key) {
            return Err(PipelineError::DuplicateMeasurement(file.file_name));
        }
        state.push_job(job)?;
        state.recorded.insert(key);
        state.measurements.insert(file.id, file);
        Ok(())
    }

    async fn measurement(&self, id: MeasurementFileId) -> Result<MeasurementFile> {
        self.state
            .lock()
            .await
            .measurements
            .get(&id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found(format!("measurement file {id}")))
    }

    async fn insert_job(&self, job: JobRecord) -> Result<()> {
        self.state.lock().await.push_job(job)
    }

    async fn job(&self, id: JobId) -> Result<JobRecord> {
        let mut state = self.state.lock().await;
        Ok(state.job_mut(id)?.clone())
    }

    async fn jobs(&self) -> Result<Vec<JobRecord>> {
        Ok(self.state.lock().await.jobs.clone())
    }

    async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<JobRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .jobs
            .iter()
            .filter(|j| j.status == status)
            .cloned()
            .collect())
    }

    async fn modify_job(
        &self,
        id: JobId,
        change: JobChange,
        now: DateTime<Utc>,
    ) -> Result<JobRecord> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        job.apply(change, now)?;
        Ok(job.clone())
    }

    async fn restart_job(
        &self,
        id: JobId,
        new_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<JobRecord> {
        let mut state = self.state.lock().await;
        let previous = state.job_mut(id)?;
        if !previous.is_terminal() {
            return Err(PipelineError::InvalidTransition {
                job: id,
                from: previous.status,
                to: "restart".into(),
            });
        }
        let job = previous.relaunch(new_id, now);
        state.push_job(job.clone())?;
        Ok(job)
    }

    async fn arm_barrier(&self, job: JobId, blocks: usize) -> Result<()> {
        let mut state = self.state.lock().await;
        state.job_mut(job)?;
        state.barriers.entry(job).or_insert_with(|| Barrier {
            expected: blocks,
            ..Barrier::default()
        });
        Ok(())
    }

    async fn complete_block(
        &self,
        job: JobId,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<BlockArrival> {
        let mut state = self.state.lock().await;
        let LedgerState { jobs, job_index, barriers, .. } = &mut *state;
        let barrier = barriers
            .get_mut(&job)
            .ok_or_else(|| PipelineError::Store(format!("no barrier armed for {job}")))?;

        if barrier.poisoned {
            return Ok(BlockArrival::Poisoned);
        }
        if index >= barrier.expected {
            return Err(PipelineError::Store(format!(
                "block {index} out of range for {job} ({} blocks)",
                barrier.expected
            )));
        }
        if barrier.done.contains(&index) {
            return Ok(BlockArrival::Duplicate);
        }

        let pos = *job_index.get(&job).ok_or(PipelineError::UnknownJob(job))?;
        jobs[pos].apply(JobChange::BlockRouted, now)?;
        barrier.done.insert(index);

        let remaining = barrier.expected - barrier.done.len();
        debug!(job_id = %job, block = index, remaining, "block recorded");
        if remaining == 0 && !barrier.released {
            barrier.released = true;
            return Ok(BlockArrival::Released);
        }
        Ok(BlockArrival::Recorded { remaining })
    }

    async fn poison_barrier(&self, job: JobId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.barriers.entry(job).or_default().poisoned = true;
        Ok(())
    }
}
