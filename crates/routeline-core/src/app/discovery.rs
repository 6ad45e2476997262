//! DiscoveryLoop - watch のドロップ先を走査して新しい測定ファイルを記録する
//!
//! # 学習ポイント
//! - lease で同時走査を防ぐ（取れなければ tick ごとスキップ）
//! - lease はエラー時も必ず解放する
//! - 1 つの watch の失敗はその watch だけを打ち切る

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::context::PipelineContext;
use super::fetch::locate_design;
use crate::cache::{Lease, SCAN_LEASE};
use crate::domain::{
    JobId, JobRecord, MeasurementFile, PipelineError, Result, Watch, checksum,
};

/// What one discovery tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Another scan held the lease.
    pub skipped: bool,
    /// Jobs created this tick, in discovery order.
    pub launched: Vec<JobId>,
    pub failed_watches: usize,
}

pub struct DiscoveryLoop {
    ctx: Arc<PipelineContext>,
}

impl DiscoveryLoop {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub async fn tick(&self) -> Result<ScanReport> {
        let ctx = &self.ctx;
        let Some(lease) = Lease::acquire(
            &ctx.kv,
            SCAN_LEASE,
            ctx.ids.generate_token(),
            ctx.settings.lease_ttl,
        )
        .await?
        else {
            debug!("scan lease held elsewhere; tick skipped");
            return Ok(ScanReport {
                skipped: true,
                ..ScanReport::default()
            });
        };

        let result = self.scan().await;
        if let Err(e) = lease.release().await {
            warn!(lease = SCAN_LEASE, error = %e, "lease release failed");
        }
        result
    }

    async fn scan(&self) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        for watch in self.ctx.ledger.watches().await? {
            if let Err(e) = self.scan_watch(&watch, &mut report).await {
                warn!(watch = %watch.name, error = %e, "watch scan failed; retrying next tick");
                report.failed_watches += 1;
            }
        }
        Ok(report)
    }

    async fn scan_watch(&self, watch: &Watch, report: &mut ScanReport) -> Result<()> {
        let ctx = &self.ctx;
        for file_name in ctx.share.list(&watch.drop_location).await? {
            let Some(name) = ctx.grammar.parse(&file_name) else {
                continue;
            };
            if ctx.ledger.measurement_recorded(watch.id, &file_name).await? {
                continue;
            }

            let design_name = ctx.grammar.design_file_name(&name);
            let Some(design) = locate_design(ctx, &design_name).await? else {
                warn!(file = %file_name, design = %design_name, "design not found; file left for next tick");
                continue;
            };

            let now = ctx.now();
            let file = MeasurementFile {
                id: ctx.ids.generate_measurement_file_id(),
                watch: watch.id,
                file_name: file_name.clone(),
                name: name.clone(),
                valid: true,
                discovered_at: now,
            };
            let job = JobRecord::launched(
                ctx.ids.generate_job_id(),
                file.id,
                watch.id,
                name,
                design_name,
                checksum(&design),
                now,
            );
            let job_id = job.id;

            match ctx.ledger.record_discovery(file, job).await {
                Ok(()) => {
                    info!(job_id = %job_id, watch = %watch.name, file = %file_name, "new measurement file");
                    report.launched.push(job_id);
                }
                Err(PipelineError::DuplicateMeasurement(_)) => {
                    debug!(file = %file_name, "already recorded");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobStatus, checksum};
    use crate::testing::{Harness, design_bytes};
    use std::time::Duration;

    #[tokio::test]
    async fn new_files_become_launched_jobs_once() {
        let h = Harness::new().await;
        h.put_design("D000001", "A", true).await;
        h.put_measurement("D000001_A_P1.shifts", "P1", 5).await;
        h.put_measurement("D000001_A_P2.shifts", "P2", 5).await;
        h.put_raw_drop_file("notes.txt", b"ignored").await;
        let discovery = DiscoveryLoop::new(h.ctx.clone());

        let first = discovery.tick().await.unwrap();
        let second = discovery.tick().await.unwrap();

        assert_eq!(first.launched.len(), 2);
        assert!(second.launched.is_empty());
        let jobs = h.ctx.ledger.jobs().await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.status == JobStatus::Launched));
        assert_eq!(jobs[0].design_name, "D000001_A.layout");
        assert_eq!(
            jobs[0].design_checksum,
            checksum(&design_bytes("D000001", "A", true))
        );
    }

    #[tokio::test]
    async fn held_lease_skips_the_tick() {
        let h = Harness::new().await;
        h.put_design("D000001", "A", true).await;
        h.put_measurement("D000001_A_P1.shifts", "P1", 5).await;
        let _other = Lease::acquire(&h.ctx.kv, SCAN_LEASE, "other".into(), Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        let report = DiscoveryLoop::new(h.ctx.clone()).tick().await.unwrap();

        assert!(report.skipped);
        assert!(h.ctx.ledger.jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lease_is_released_after_each_tick() {
        let h = Harness::new().await;
        let discovery = DiscoveryLoop::new(h.ctx.clone());

        discovery.tick().await.unwrap();

        assert!(h.ctx.kv.get(SCAN_LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_design_defers_the_file() {
        let h = Harness::new().await;
        h.put_measurement("D000002_A_P1.shifts", "P1", 5).await;
        let discovery = DiscoveryLoop::new(h.ctx.clone());

        assert!(discovery.tick().await.unwrap().launched.is_empty());

        h.put_design("D000002", "A", false).await;
        assert_eq!(discovery.tick().await.unwrap().launched.len(), 1);
    }

    #[tokio::test]
    async fn unlistable_watch_does_not_stop_others() {
        let h = Harness::new().await;
        h.put_design("D000001", "A", true).await;
        h.put_measurement("D000001_A_P1.shifts", "P1", 5).await;
        h.add_watch_without_folder("broken").await;

        let report = DiscoveryLoop::new(h.ctx.clone()).tick().await.unwrap();

        assert_eq!(report.failed_watches, 1);
        assert_eq!(report.launched.len(), 1);
        assert!(h.ctx.kv.get(SCAN_LEASE).await.unwrap().is_none());
    }
}
