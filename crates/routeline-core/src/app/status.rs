//! Status - job の状態を外から見るためのビュー
//!
//! 失敗はここ（status / sub_status / error）でしか外に見えません。

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{JobRecord, Result};
use crate::ports::Ledger;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub id: String,
    pub design_number: String,
    pub design_revision: String,
    pub panel_id: String,
    pub status: &'static str,
    pub sub_status: Option<&'static str>,
    pub launched_time: DateTime<Utc>,
    pub started_time: Option<DateTime<Utc>>,
    pub finished_time: Option<DateTime<Utc>>,
    /// Seconds between launch and the first work starting.
    pub wait_time_secs: Option<i64>,
    /// Seconds between the first work starting and completion.
    pub run_time_secs: Option<i64>,
    pub work_items: u32,
    pub work_items_done: u32,
    pub unit_count: u64,
    pub units_good: u64,
    /// e.g. `"97.50%"`
    pub final_yield: Option<String>,
    pub error: Option<String>,
}

impl From<&JobRecord> for JobView {
    fn from(job: &JobRecord) -> Self {
        Self {
            id: job.id.to_string(),
            design_number: job.name.design_number.clone(),
            design_revision: job.name.design_revision.clone(),
            panel_id: job.name.panel_id.clone(),
            status: job.status.as_str(),
            sub_status: job.sub_status.map(|s| s.as_str()),
            launched_time: job.launched_time,
            started_time: job.started_time,
            finished_time: job.finished_time,
            wait_time_secs: job
                .started_time
                .map(|started| (started - job.launched_time).num_seconds()),
            run_time_secs: job
                .started_time
                .zip(job.finished_time)
                .map(|(started, finished)| (finished - started).num_seconds()),
            work_items: job.work_items,
            work_items_done: job.work_items_done,
            unit_count: job.unit_count,
            units_good: job.units_good,
            final_yield: job.final_yield.map(|y| format!("{:.2}%", y * 100.0)),
            error: job.error.clone(),
        }
    }
}

/// Every job in launch order.
pub async fn job_views(ledger: &dyn Ledger) -> Result<Vec<JobView>> {
    Ok(ledger.jobs().await?.iter().map(JobView::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        JobChange, JobId, MeasurementFileId, MeasurementName, SubStatus, WatchId,
    };
    use chrono::{Duration, TimeZone};
    use ulid::Ulid;

    #[test]
    fn view_reports_times_and_yield() {
        let launched = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut job = JobRecord::launched(
            JobId::from_ulid(Ulid::new()),
            MeasurementFileId::from_ulid(Ulid::new()),
            WatchId::from_ulid(Ulid::new()),
            MeasurementName::new("D000001", "A", "P1"),
            "D000001_A.layout",
            "abc",
            launched,
        );
        job.apply(JobChange::Queue { work_items: 2 }, launched).unwrap();
        job.apply(
            JobChange::Start {
                sub_status: SubStatus::Aggregating,
            },
            launched + Duration::seconds(30),
        )
        .unwrap();
        job.apply(
            JobChange::Aggregated {
                unit_count: 40,
                units_good: 39,
            },
            launched + Duration::seconds(40),
        )
        .unwrap();
        job.apply(JobChange::Complete, launched + Duration::seconds(90))
            .unwrap();

        let view = JobView::from(&job);

        assert_eq!(view.status, "COMPLETE");
        assert_eq!(view.sub_status, Some("COMPLETE"));
        assert_eq!(view.wait_time_secs, Some(30));
        assert_eq!(view.run_time_secs, Some(60));
        assert_eq!(view.final_yield.as_deref(), Some("97.50%"));
        assert_eq!(view.work_items_done, 2);
    }

    #[test]
    fn fresh_job_has_no_times() {
        let job = JobRecord::launched(
            JobId::from_ulid(Ulid::new()),
            MeasurementFileId::from_ulid(Ulid::new()),
            WatchId::from_ulid(Ulid::new()),
            MeasurementName::new("D000001", "A", "P1"),
            "D000001_A.layout",
            "abc",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );

        let view = JobView::from(&job);

        assert_eq!(view.status, "LAUNCHED");
        assert_eq!(view.wait_time_secs, None);
        assert_eq!(view.final_yield, None);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "LAUNCHED");
    }
}
