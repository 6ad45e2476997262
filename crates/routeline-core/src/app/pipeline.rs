//! Fan-out / fan-in - ブロックごとのルーティングと一度きりの集約
//!
//! 各 RouteBlock は結果を共有キャッシュに書いてから ledger の barrier に
//! 到着を記録します。barrier を完了させた到着だけが Aggregate を配送します。
//! どれか一つのブロックが dead になれば barrier を poison し、job を ERROR に
//! します。poison された barrier は二度と開きません。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::context::PipelineContext;
use super::tasks::{Aggregate, RouteBlock, WriteOutput};
use crate::cache::BlobKey;
use crate::domain::{
    AggregationResult, AggregationWorkItem, JobChange, JobRecord, JobStatus, MeasurementSet,
    PipelineError, Result, RoutingResult, RoutingWorkItem, SubStatus, WorkItem,
};
use crate::ports::{BlockArrival, invoke};
use crate::typed::Handler;

/// Design and measurement bytes through this worker's local cache.
async fn job_blobs(ctx: &PipelineContext, job: &JobRecord) -> Result<(Vec<u8>, Vec<u8>)> {
    let design = ctx
        .local
        .get(&BlobKey::design(&job.design_name), &ctx.shared)
        .await?;
    let measurements = ctx
        .local
        .get(&BlobKey::measurements(job.watch, &job.name), &ctx.shared)
        .await?;
    Ok((design, measurements))
}

pub struct RouteBlockHandler {
    ctx: Arc<PipelineContext>,
}

impl RouteBlockHandler {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Handler<RouteBlock> for RouteBlockHandler {
    async fn handle(&self, task: RouteBlock) -> Result<()> {
        let ctx = &self.ctx;
        let job = ctx.ledger.job(task.job_id).await?;
        if job.is_terminal() {
            debug!(job_id = %job.id, block = task.block.index, status = job.status.as_str(), "job closed; block skipped");
            return Ok(());
        }

        let (design, measurements) = job_blobs(ctx, &job).await?;
        if job.status == JobStatus::Queued {
            ctx.modify_job(
                job.id,
                JobChange::Start {
                    sub_status: SubStatus::Routing,
                },
            )
            .await?;
        }

        let item = WorkItem::Routing(RoutingWorkItem {
            job_id: job.id,
            panel_id: job.name.panel_id.clone(),
            design,
            measurements,
            block: task.block,
        });
        let result: RoutingResult =
            invoke(ctx.engine.as_ref(), &ctx.settings.scratch_dir, &item).await?;
        ctx.shared
            .put_block_result(&job.name, job.id, task.block.index, &result)
            .await?;

        match ctx
            .ledger
            .complete_block(job.id, task.block.index, ctx.now())
            .await?
        {
            BlockArrival::Released => {
                info!(job_id = %job.id, blocks = task.block_count, "all blocks routed");
                ctx.dispatch(&Aggregate {
                    job_id: job.id,
                    block_count: task.block_count,
                    routed: true,
                })
                .await?;
            }
            BlockArrival::Recorded { remaining } => {
                debug!(job_id = %job.id, block = task.block.index, remaining, "block routed");
            }
            BlockArrival::Duplicate => {
                debug!(job_id = %job.id, block = task.block.index, "block already recorded");
            }
            BlockArrival::Poisoned => {
                warn!(job_id = %job.id, block = task.block.index, "barrier poisoned; result discarded");
            }
        }
        Ok(())
    }

    async fn on_exhausted(&self, task: RouteBlock, error: &PipelineError) -> Result<()> {
        self.ctx.ledger.poison_barrier(task.job_id).await?;
        self.ctx
            .fail_job(
                task.job_id,
                format!("routing block {} failed: {error}", task.block.index),
            )
            .await
    }
}

pub struct AggregateHandler {
    ctx: Arc<PipelineContext>,
}

impl AggregateHandler {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Handler<Aggregate> for AggregateHandler {
    async fn handle(&self, task: Aggregate) -> Result<()> {
        let ctx = &self.ctx;
        let job = ctx.ledger.job(task.job_id).await?;
        if job.is_terminal() {
            debug!(job_id = %job.id, status = job.status.as_str(), "job closed; aggregation skipped");
            return Ok(());
        }
        if job.aggregated {
            // redelivered after the result was recorded
            ctx.dispatch(&WriteOutput { job_id: job.id }).await?;
            return Ok(());
        }

        let (design, measurements) = job_blobs(ctx, &job).await?;
        ctx.modify_job(
            job.id,
            JobChange::Start {
                sub_status: SubStatus::Aggregating,
            },
        )
        .await?;

        let set = MeasurementSet::parse(&measurements, &job.name)?;
        let mut routed_units = Vec::new();
        if task.routed {
            for index in 0..task.block_count {
                let block = ctx.shared.block_result(&job.name, job.id, index).await?;
                routed_units.extend(block.routed_units);
            }
        }
        let units_good = if task.routed {
            routed_units.iter().filter(|u| u.routing_good).count() as u64
        } else {
            set.valid_units()
        };
        let unit_count = set.unit_count();

        let item = WorkItem::Aggregation(AggregationWorkItem {
            job_id: job.id,
            panel_id: job.name.panel_id.clone(),
            design,
            measurements,
            routed: task.routed,
            routed_units,
        });
        let artifact: AggregationResult =
            invoke(ctx.engine.as_ref(), &ctx.settings.scratch_dir, &item).await?;
        ctx.shared.put_artifact(&job.name, job.id, &artifact).await?;

        let job = ctx
            .modify_job(
                job.id,
                JobChange::Aggregated {
                    unit_count,
                    units_good,
                },
            )
            .await?;
        info!(
            job_id = %job.id,
            unit_count,
            units_good,
            final_yield = ?job.final_yield,
            files = artifact.files.len(),
            "aggregated"
        );
        ctx.dispatch(&WriteOutput { job_id: job.id }).await?;
        Ok(())
    }

    async fn on_exhausted(&self, task: Aggregate, error: &PipelineError) -> Result<()> {
        error!(job_id = %task.job_id, error = %error, "aggregation gave up");
        self.ctx
            .fail_job(task.job_id, format!("aggregation failed: {error}"))
            .await
    }
}
