//! AdmissionScheduler - LAUNCHED な job を進め、tick ごとに高々 1 件を投入する
//!
//! 各 LAUNCHED job に対して（launch 順に）:
//! 1. design が UNCLAIMED なら取得を配送して次へ
//! 2. 測定ファイルが UNCLAIMED なら取得を配送して次へ
//! 3. 両方 READY で、この tick の admission token が残っていれば投入
//!
//! 1・2 は軽い「キャッシュ温め」なので全 job に行います。3 は下流の実行枠を
//! 消費するので tick あたり 1 件に制限します（backpressure）。
//! CLAIMED（取得中）の blob がある job は token を使わずに次の tick へ回します。

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::context::PipelineContext;
use super::tasks::{Aggregate, FetchDesign, FetchMeasurements, RouteBlock};
use crate::cache::{BlobKey, ClaimState, Lease, QUEUE_LEASE};
use crate::domain::{
    JobChange, JobId, JobRecord, JobStatus, PipelineError, Result, SubStatus, partition,
};

/// What one admission tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Another scheduler held the lease.
    pub skipped: bool,
    pub fetches_dispatched: usize,
    /// The job admitted this tick, if any.
    pub admitted: Option<JobId>,
    /// Jobs waiting on an in-flight fetch.
    pub deferred: usize,
    /// Ready jobs left for a later tick because the token was spent.
    pub waiting: usize,
    pub errors: usize,
}

enum Step {
    Fetching,
    Deferred,
    Ready,
}

pub struct AdmissionScheduler {
    ctx: Arc<PipelineContext>,
}

impl AdmissionScheduler {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub async fn tick(&self) -> Result<TickReport> {
        let ctx = &self.ctx;
        let Some(lease) = Lease::acquire(
            &ctx.kv,
            QUEUE_LEASE,
            ctx.ids.generate_token(),
            ctx.settings.lease_ttl,
        )
        .await?
        else {
            debug!("job lease held elsewhere; tick skipped");
            return Ok(TickReport {
                skipped: true,
                ..TickReport::default()
            });
        };

        let result = self.advance_jobs().await;
        if let Err(e) = lease.release().await {
            warn!(lease = QUEUE_LEASE, error = %e, "lease release failed");
        }
        result
    }

    async fn advance_jobs(&self) -> Result<TickReport> {
        let mut report = TickReport::default();
        for job in self.ctx.ledger.jobs_with_status(JobStatus::Launched).await? {
            if let Err(e) = self.advance(&job, &mut report).await {
                error!(job_id = %job.id, error = %e, "could not advance job");
                report.errors += 1;
            }
        }
        Ok(report)
    }

    async fn advance(&self, job: &JobRecord, report: &mut TickReport) -> Result<()> {
        let design = BlobKey::design(&job.design_name);
        let measurements = BlobKey::measurements(job.watch, &job.name);

        match self.warm(job, &design, &measurements).await? {
            Step::Fetching => report.fetches_dispatched += 1,
            Step::Deferred => report.deferred += 1,
            Step::Ready if report.admitted.is_some() => report.waiting += 1,
            Step::Ready => {
                if self.admit(job, &design, &measurements).await? {
                    report.admitted = Some(job.id);
                } else {
                    report.deferred += 1;
                }
            }
        }
        Ok(())
    }

    /// Dispatch the first missing fetch, or report whether both blobs are READY.
    async fn warm(&self, job: &JobRecord, design: &BlobKey, measurements: &BlobKey) -> Result<Step> {
        let ctx = &self.ctx;

        let design_state = ctx.shared.status(design).await?;
        if design_state == ClaimState::Unclaimed {
            ctx.modify_job(job.id, JobChange::SubStatus(SubStatus::FetchingDesign))
                .await?;
            ctx.dispatch(&FetchDesign {
                job_id: job.id,
                claim_token: ctx.ids.generate_token(),
            })
            .await?;
            debug!(job_id = %job.id, design = %job.design_name, "design fetch dispatched");
            return Ok(Step::Fetching);
        }

        let measurement_state = ctx.shared.status(measurements).await?;
        if measurement_state == ClaimState::Unclaimed {
            ctx.modify_job(job.id, JobChange::SubStatus(SubStatus::FetchingMeasurements))
                .await?;
            ctx.dispatch(&FetchMeasurements {
                job_id: job.id,
                claim_token: ctx.ids.generate_token(),
            })
            .await?;
            debug!(job_id = %job.id, "measurement fetch dispatched");
            return Ok(Step::Fetching);
        }

        if design_state == ClaimState::Ready && measurement_state == ClaimState::Ready {
            Ok(Step::Ready)
        } else {
            Ok(Step::Deferred)
        }
    }

    /// Queue the job and fan out its work. Returns `false` if a blob expired
    /// between the status check and the re-lease.
    async fn admit(&self, job: &JobRecord, design: &BlobKey, measurements: &BlobKey) -> Result<bool> {
        let ctx = &self.ctx;
        let ttl = ctx.shared.ttls().blob;
        let design_held = ctx.shared.lease_extend(design, ttl).await?;
        let measurements_held = ctx.shared.lease_extend(measurements, ttl).await?;
        if !(design_held && measurements_held) {
            warn!(job_id = %job.id, "blob expired before admission");
            return Ok(false);
        }

        let requires_routing = parse_meta::<bool>(&ctx.shared.meta(design).await?, design)?;
        let unit_count = parse_meta::<usize>(&ctx.shared.meta(measurements).await?, measurements)?;
        let blocks = if requires_routing {
            partition(unit_count, ctx.settings.block_size)
        } else {
            Vec::new()
        };
        let work_items = u32::try_from(blocks.len() + 2)
            .map_err(|_| PipelineError::Store(format!("{} blocks for {}", blocks.len(), job.id)))?;

        if !blocks.is_empty() {
            ctx.ledger.arm_barrier(job.id, blocks.len()).await?;
        }
        ctx.modify_job(job.id, JobChange::Queue { work_items }).await?;
        info!(
            job_id = %job.id,
            unit_count,
            requires_routing,
            blocks = blocks.len(),
            work_items,
            "job admitted"
        );

        if blocks.is_empty() {
            ctx.dispatch(&Aggregate {
                job_id: job.id,
                block_count: 0,
                routed: requires_routing,
            })
            .await?;
        } else {
            let block_count = blocks.len();
            for block in blocks {
                ctx.dispatch(&RouteBlock {
                    job_id: job.id,
                    block,
                    block_count,
                })
                .await?;
            }
        }
        Ok(true)
    }
}

fn parse_meta<T: std::str::FromStr>(raw: &str, key: &BlobKey) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| PipelineError::Store(format!("{}: unreadable value {raw:?}", key.meta_key())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tasks::WriteOutput;
    use crate::domain::TaskEnvelope;
    use crate::testing::Harness;
    use crate::typed::{Task, decode};

    async fn envelopes(h: &Harness, task_type: &str) -> Vec<TaskEnvelope> {
        h.queue.envelopes_of(task_type).await
    }

    #[tokio::test]
    async fn unclaimed_blobs_are_fetched_design_first() {
        let h = Harness::new().await;
        h.put_design("D000001", "A", true).await;
        let job = h.launch("D000001_A_P1.shifts", "P1", 10).await;
        let scheduler = AdmissionScheduler::new(h.ctx.clone());

        let first = scheduler.tick().await.unwrap();
        assert_eq!(first.fetches_dispatched, 1);
        assert_eq!(envelopes(&h, FetchDesign::TYPE).await.len(), 1);
        assert_eq!(
            h.ctx.ledger.job(job).await.unwrap().sub_status,
            Some(SubStatus::FetchingDesign)
        );

        // design fetch still in flight: nothing new is dispatched
        let second = scheduler.tick().await.unwrap();
        assert_eq!(second.fetches_dispatched, 0);
        assert_eq!(second.deferred, 1);

        h.drain().await;
        let third = scheduler.tick().await.unwrap();
        assert_eq!(third.fetches_dispatched, 1);
        assert_eq!(envelopes(&h, FetchMeasurements::TYPE).await.len(), 1);
        assert_eq!(
            h.ctx.ledger.job(job).await.unwrap().sub_status,
            Some(SubStatus::FetchingMeasurements)
        );
    }

    #[tokio::test]
    async fn at_most_one_job_is_admitted_per_tick() {
        let h = Harness::new().await;
        h.put_design("D000001", "A", true).await;
        let jobs = [
            h.launch("D000001_A_P1.shifts", "P1", 10).await,
            h.launch("D000001_A_P2.shifts", "P2", 10).await,
            h.launch("D000001_A_P3.shifts", "P3", 10).await,
        ];
        h.warm_all().await;
        let scheduler = AdmissionScheduler::new(h.ctx.clone());

        for expected in jobs {
            let report = scheduler.tick().await.unwrap();
            assert_eq!(report.admitted, Some(expected));
            let queued = h
                .ctx
                .ledger
                .jobs()
                .await
                .unwrap()
                .iter()
                .filter(|j| j.status != JobStatus::Launched)
                .count();
            assert_eq!(queued, jobs.iter().position(|j| *j == expected).unwrap() + 1);
        }
        assert_eq!(scheduler.tick().await.unwrap().admitted, None);
    }

    #[tokio::test]
    async fn admission_partitions_and_fans_out() {
        let h = Harness::new().await;
        h.put_design("D000001", "A", true).await;
        let job = h.launch("D000001_A_P1.shifts", "P1", 1000).await;
        h.warm_all().await;

        let report = AdmissionScheduler::new(h.ctx.clone()).tick().await.unwrap();

        assert_eq!(report.admitted, Some(job));
        let record = h.ctx.ledger.job(job).await.unwrap();
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.work_items, 3 + 2);
        let mut blocks: Vec<_> = envelopes(&h, RouteBlock::TYPE)
            .await
            .iter()
            .map(|e| decode::<RouteBlock>(e).unwrap().block)
            .collect();
        blocks.sort_by_key(|b| b.index);
        assert_eq!(blocks, partition(1000, 400));
        assert!(envelopes(&h, Aggregate::TYPE).await.is_empty());
    }

    #[tokio::test]
    async fn design_without_routing_goes_straight_to_aggregation() {
        let h = Harness::new().await;
        h.put_design("D000001", "A", false).await;
        let job = h.launch("D000001_A_P1.shifts", "P1", 1000).await;
        h.warm_all().await;

        AdmissionScheduler::new(h.ctx.clone()).tick().await.unwrap();

        assert_eq!(h.ctx.ledger.job(job).await.unwrap().work_items, 2);
        assert!(envelopes(&h, RouteBlock::TYPE).await.is_empty());
        let aggregate = decode::<Aggregate>(&envelopes(&h, Aggregate::TYPE).await[0]).unwrap();
        assert_eq!(
            aggregate,
            Aggregate {
                job_id: job,
                block_count: 0,
                routed: false,
            }
        );
        assert!(envelopes(&h, WriteOutput::TYPE).await.is_empty());
    }

    #[tokio::test]
    async fn held_job_lease_skips_the_tick() {
        let h = Harness::new().await;
        h.put_design("D000001", "A", true).await;
        h.launch("D000001_A_P1.shifts", "P1", 10).await;
        let _other = Lease::acquire(
            &h.ctx.kv,
            QUEUE_LEASE,
            "other".into(),
            std::time::Duration::from_secs(10),
        )
        .await
        .unwrap()
        .unwrap();

        let report = AdmissionScheduler::new(h.ctx.clone()).tick().await.unwrap();

        assert!(report.skipped);
        assert!(envelopes(&h, FetchDesign::TYPE).await.is_empty());
    }

    #[tokio::test]
    async fn admission_refreshes_blob_expiry() {
        let h = Harness::new().await;
        h.put_design("D000001", "A", false).await;
        let job = h.launch("D000001_A_P1.shifts", "P1", 4).await;
        h.warm_all().await;
        let blob_ttl = h.ctx.shared.ttls().blob;
        // just short of expiry when admitted
        h.clock
            .advance(chrono::Duration::from_std(blob_ttl).unwrap() - chrono::Duration::seconds(1));

        AdmissionScheduler::new(h.ctx.clone()).tick().await.unwrap();
        h.clock.advance(chrono::Duration::seconds(60));

        let record = h.ctx.ledger.job(job).await.unwrap();
        assert_eq!(
            h.ctx
                .shared
                .status(&BlobKey::measurements(record.watch, &record.name))
                .await
                .unwrap(),
            ClaimState::Ready
        );
    }
}
