//! Output writer - 集約結果を watch の出力先に書き出し、job を閉じる

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::context::PipelineContext;
use super::tasks::WriteOutput;
use crate::domain::{ErrorKind, JobChange, JobStatus, MeasurementName, PipelineError, Result};
use crate::typed::Handler;

/// Destination name of an artifact file: `<designNumber>_<rev>_<fileName>`.
pub fn output_file_name(name: &MeasurementName, file_name: &str) -> String {
    format!("{}_{}", name.design_stem(), file_name)
}

pub struct WriteOutputHandler {
    ctx: Arc<PipelineContext>,
}

impl WriteOutputHandler {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Handler<WriteOutput> for WriteOutputHandler {
    async fn handle(&self, task: WriteOutput) -> Result<()> {
        let ctx = &self.ctx;
        let job = ctx.ledger.job(task.job_id).await?;
        if job.is_terminal() {
            debug!(job_id = %job.id, status = job.status.as_str(), "job closed; output skipped");
            return Ok(());
        }

        let artifact = ctx.shared.artifact(&job.name, job.id).await?;
        let watch = ctx.ledger.watch(job.watch).await?;
        let destination = &watch.output_location;

        for file in &artifact.files {
            let name = output_file_name(&job.name, &file.file_name);
            match ctx.share.delete(destination, &name).await {
                Ok(()) => debug!(file = %name, "replaced existing output"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            ctx.share.write(destination, &name, &file.data).await?;
        }

        let job = ctx.modify_job(job.id, JobChange::Complete).await?;
        debug_assert_eq!(job.status, JobStatus::Complete);
        info!(
            job_id = %job.id,
            files = artifact.files.len(),
            destination = %destination,
            work_items_done = job.work_items_done,
            "job complete"
        );
        Ok(())
    }

    async fn on_exhausted(&self, task: WriteOutput, error: &PipelineError) -> Result<()> {
        self.ctx
            .fail_job(task.job_id, format!("output failed: {error}"))
            .await
    }
}
