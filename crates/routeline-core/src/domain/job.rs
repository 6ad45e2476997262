//! Job record and status management.
//!
//! All mutation goes through [`JobRecord::apply`], which validates the change
//! against the current status before touching any field. The ledger applies
//! changes atomically, so callers never read-modify-write a job themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{PipelineError, Result};
use super::ids::{JobId, MeasurementFileId, WatchId};
use super::measurement::MeasurementName;

/// Job status. Only advances LAUNCHED -> QUEUED -> STARTED -> COMPLETE;
/// ERROR can be entered from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Launched,
    Queued,
    Started,
    Complete,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Launched => "LAUNCHED",
            JobStatus::Queued => "QUEUED",
            JobStatus::Started => "STARTED",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Error => "ERROR",
        }
    }
}

/// Finer-grained progress marker. Observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubStatus {
    FetchingDesign,
    FetchingMeasurements,
    Routing,
    Aggregating,
    Complete,
}

impl SubStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubStatus::FetchingDesign => "FETCHING_DESIGN",
            SubStatus::FetchingMeasurements => "FETCHING_MEASUREMENTS",
            SubStatus::Routing => "ROUTING",
            SubStatus::Aggregating => "AGGREGATING",
            SubStatus::Complete => "COMPLETE",
        }
    }

    fn allowed_in(self, status: JobStatus) -> bool {
        match self {
            SubStatus::FetchingDesign | SubStatus::FetchingMeasurements => {
                status == JobStatus::Launched
            }
            SubStatus::Routing | SubStatus::Aggregating => {
                matches!(status, JobStatus::Queued | JobStatus::Started)
            }
            SubStatus::Complete => status == JobStatus::Complete,
        }
    }
}

/// A validated mutation of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobChange {
    /// Progress marker only; never changes `status`.
    SubStatus(SubStatus),

    /// Admission: LAUNCHED -> QUEUED with the planned number of work items.
    Queue { work_items: u32 },

    /// First block or direct aggregation begins: QUEUED -> STARTED.
    /// Also allowed while STARTED to move the progress marker.
    Start { sub_status: SubStatus },

    /// One routing block newly recorded.
    BlockRouted,

    /// Aggregation result recorded. Counted once.
    Aggregated { unit_count: u64, units_good: u64 },

    /// Output delivered. Counted once.
    Complete,

    Fail { reason: String },
}

impl JobChange {
    fn name(&self) -> &'static str {
        match self {
            JobChange::SubStatus(_) => "sub_status",
            JobChange::Queue { .. } => "queue",
            JobChange::Start { .. } => "start",
            JobChange::BlockRouted => "block_routed",
            JobChange::Aggregated { .. } => "aggregated",
            JobChange::Complete => "complete",
            JobChange::Fail { .. } => "fail",
        }
    }
}

/// Job record: one pipeline execution for one measurement file.
///
/// Restarting a job appends a new record; terminal records are never reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub measurement_file: MeasurementFileId,
    pub watch: WatchId,
    pub name: MeasurementName,

    /// Design descriptor file name and its checksum when the job was created.
    pub design_name: String,
    pub design_checksum: String,

    pub status: JobStatus,
    pub sub_status: Option<SubStatus>,

    pub launched_time: DateTime<Utc>,
    pub started_time: Option<DateTime<Utc>>,
    pub finished_time: Option<DateTime<Utc>>,

    pub work_items: u32,
    pub work_items_done: u32,

    pub unit_count: u64,
    pub units_good: u64,
    pub final_yield: Option<f64>,

    pub aggregated: bool,
    pub error: Option<String>,
}

impl JobRecord {
    pub fn launched(
        id: JobId,
        measurement_file: MeasurementFileId,
        watch: WatchId,
        name: MeasurementName,
        design_name: impl Into<String>,
        design_checksum: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            measurement_file,
            watch,
            name,
            design_name: design_name.into(),
            design_checksum: design_checksum.into(),
            status: JobStatus::Launched,
            sub_status: None,
            launched_time: now,
            started_time: None,
            finished_time: None,
            work_items: 0,
            work_items_done: 0,
            unit_count: 0,
            units_good: 0,
            final_yield: None,
            aggregated: false,
            error: None,
        }
    }

    /// A fresh LAUNCHED record for the same measurement file and design.
    pub fn relaunch(&self, id: JobId, now: DateTime<Utc>) -> Self {
        Self::launched(
            id,
            self.measurement_file,
            self.watch,
            self.name.clone(),
            self.design_name.clone(),
            self.design_checksum.clone(),
            now,
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a change, or reject it without modifying the record.
    ///
    /// Repeated `Aggregated`, `Complete` and `Fail` changes are accepted as
    /// no-ops so redelivered tasks stay harmless.
    pub fn apply(&mut self, change: JobChange, now: DateTime<Utc>) -> Result<()> {
        match change {
            JobChange::SubStatus(sub) => {
                if self.is_terminal() || !sub.allowed_in(self.status) {
                    return Err(self.reject(sub.as_str()));
                }
                self.sub_status = Some(sub);
            }
            JobChange::Queue { work_items } => {
                if self.status != JobStatus::Launched {
                    return Err(self.reject("QUEUED"));
                }
                self.status = JobStatus::Queued;
                self.work_items = work_items;
            }
            JobChange::Start { sub_status } => {
                if !matches!(self.status, JobStatus::Queued | JobStatus::Started)
                    || !sub_status.allowed_in(self.status)
                {
                    return Err(self.reject("STARTED"));
                }
                self.status = JobStatus::Started;
                self.sub_status = Some(sub_status);
                self.started_time.get_or_insert(now);
            }
            JobChange::BlockRouted => {
                if self.status != JobStatus::Started || self.aggregated {
                    return Err(self.reject(change.name()));
                }
                self.count_work_item();
            }
            JobChange::Aggregated {
                unit_count,
                units_good,
            } => {
                if self.aggregated {
                    return Ok(());
                }
                if self.status != JobStatus::Started {
                    return Err(self.reject(change.name()));
                }
                self.aggregated = true;
                self.unit_count = unit_count;
                self.units_good = units_good;
                self.final_yield =
                    (unit_count > 0).then(|| units_good as f64 / unit_count as f64);
                self.count_work_item();
            }
            JobChange::Complete => {
                if self.status == JobStatus::Complete {
                    return Ok(());
                }
                if self.status != JobStatus::Started || !self.aggregated {
                    return Err(self.reject("COMPLETE"));
                }
                self.status = JobStatus::Complete;
                self.sub_status = Some(SubStatus::Complete);
                self.finished_time = Some(now);
                self.count_work_item();
            }
            JobChange::Fail { reason } => {
                if self.status == JobStatus::Error {
                    return Ok(());
                }
                if self.status == JobStatus::Complete {
                    return Err(self.reject("ERROR"));
                }
                self.status = JobStatus::Error;
                self.error = Some(reason);
            }
        }
        Ok(())
    }

    fn count_work_item(&mut self) {
        self.work_items_done = (self.work_items_done + 1).min(self.work_items);
    }

    fn reject(&self, to: &str) -> PipelineError {
        PipelineError::InvalidTransition {
            job: self.id,
            from: self.status,
            to: to.to_string(),
        }
    }
}
