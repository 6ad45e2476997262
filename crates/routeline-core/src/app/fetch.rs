//! Fetch handlers - リモート共有から共有キャッシュへ blob を取り込む
//!
//! claim に勝ったハンドラだけがリモートを読みます。負けた側は何もしません
//! （scheduler が次の tick で状態を見直します）。失敗はそのまま返し、
//! リトライ判断は queue に任せます。リトライを使い切った claim は
//! TTL で失効し、scheduler が取り直します。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::context::PipelineContext;
use super::tasks::{FetchDesign, FetchMeasurements};
use crate::cache::BlobKey;
use crate::domain::{
    DesignDescriptor, ErrorKind, JobId, MeasurementSet, PipelineError, Result, verify_checksum,
};
use crate::typed::Handler;

/// Read `design_name` from the first design location that lists it.
///
/// `Ok(None)` means no location has it. A location that cannot be listed is
/// skipped, but its error is returned if no other location has the file.
pub(crate) async fn locate_design(
    ctx: &PipelineContext,
    design_name: &str,
) -> Result<Option<Vec<u8>>> {
    let mut listing_error = None;
    for design_location in ctx.ledger.design_locations().await? {
        let location = &design_location.location;
        match ctx.share.list(location).await {
            Ok(names) if names.iter().any(|n| n == design_name) => {
                debug!(design = design_name, location = %location, "design located");
                return ctx.share.read(location, design_name).await.map(Some);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(location = %location, error = %e, "design location not listable");
                listing_error = Some(e);
            }
        }
    }
    match listing_error {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

async fn fail_on_missing(ctx: &PipelineContext, job_id: JobId, what: &str, error: &PipelineError) {
    if error.kind() == ErrorKind::NotFound {
        if let Err(e) = ctx.fail_job(job_id, format!("{what}: {error}")).await {
            error!(job_id = %job_id, error = %e, "could not record fetch failure");
        }
    } else {
        error!(
            job_id = %job_id,
            error = %error,
            "{what} gave up; claim is left to expire"
        );
    }
}

pub struct FetchDesignHandler {
    ctx: Arc<PipelineContext>,
}

impl FetchDesignHandler {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Handler<FetchDesign> for FetchDesignHandler {
    async fn handle(&self, task: FetchDesign) -> Result<()> {
        let ctx = &self.ctx;
        let job = ctx.ledger.job(task.job_id).await?;
        let key = BlobKey::design(&job.design_name);

        if !ctx.shared.claim(&key, &task.claim_token).await? {
            debug!(job_id = %job.id, design = %job.design_name, "design claim lost");
            return Ok(());
        }

        let bytes = locate_design(ctx, &job.design_name)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("design {}", job.design_name)))?;
        verify_checksum(&job.design_name, &bytes, &job.design_checksum)?;
        let descriptor = DesignDescriptor::parse(&bytes, &job.name)?;
        let requires_routing = descriptor.requires_routing();

        ctx.shared
            .mark_ready(&key, bytes, requires_routing.to_string())
            .await?;
        info!(
            job_id = %job.id,
            design = %job.design_name,
            requires_routing,
            "design cached"
        );
        Ok(())
    }

    async fn on_exhausted(&self, task: FetchDesign, error: &PipelineError) -> Result<()> {
        fail_on_missing(&self.ctx, task.job_id, "design fetch", error).await;
        Ok(())
    }
}

pub struct FetchMeasurementsHandler {
    ctx: Arc<PipelineContext>,
}

impl FetchMeasurementsHandler {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Handler<FetchMeasurements> for FetchMeasurementsHandler {
    async fn handle(&self, task: FetchMeasurements) -> Result<()> {
        let ctx = &self.ctx;
        let job = ctx.ledger.job(task.job_id).await?;
        let key = BlobKey::measurements(job.watch, &job.name);

        if !ctx.shared.claim(&key, &task.claim_token).await? {
            debug!(job_id = %job.id, "measurement claim lost");
            return Ok(());
        }

        let file = ctx.ledger.measurement(job.measurement_file).await?;
        let watch = ctx.ledger.watch(job.watch).await?;
        let bytes = ctx.share.read(&watch.drop_location, &file.file_name).await?;
        let set = MeasurementSet::parse(&bytes, &job.name)?;
        let unit_count = set.unit_count();

        ctx.shared
            .mark_ready(&key, bytes, unit_count.to_string())
            .await?;
        info!(job_id = %job.id, file = %file.file_name, unit_count, "measurements cached");
        Ok(())
    }

    async fn on_exhausted(&self, task: FetchMeasurements, error: &PipelineError) -> Result<()> {
        fail_on_missing(&self.ctx, task.job_id, "measurement fetch", error).await;
        Ok(())
    }
}
