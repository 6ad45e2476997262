//! テスト用ハーネス
//!
//! 一時ディレクトリ上の共有・キャッシュと in-memory の ledger / KV / queue で
//! パイプライン一式を組み立てます。エンジンは入力を読んで決まった結果を
//! 返すスクリプトです。

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use tempfile::TempDir;

use crate::app::fetch::{FetchDesignHandler, FetchMeasurementsHandler};
use crate::app::tasks::{FetchDesign, FetchMeasurements};
use crate::app::{AppBuilder, PipelineContext, PipelineSettings, Runtime, execute_lease};
use crate::cache::{CacheTtls, LocalBlobCache, SharedCache};
use crate::domain::{
    AggregationResult, DesignLocation, FileGrammar, JobId, JobRecord, JobStatus, MeasurementFile,
    NetworkLocation, OutputFile, PipelineError, Result, RoutedUnit, RoutingResult, Watch,
    WorkItem, checksum,
};
use crate::impls::{InMemoryKv, InMemoryLedger, LocalShare};
use crate::ports::{Engine, IdGenerator, Ledger, ManualClock, RemoteShare, UlidGenerator};
use crate::queue::{InMemoryTaskQueue, RetryPolicy, TaskQueue};
use crate::typed::Handler;

/// Design descriptor JSON; `routing` adds a route definition to the first layer.
pub(crate) fn design_bytes(design_number: &str, revision: &str, routing: bool) -> Vec<u8> {
    let routes = if routing {
        json!([{ "net": "N1", "from": "A1", "to": "B1" }])
    } else {
        json!([])
    };
    json!({
        "design_number": design_number,
        "design_revision": revision,
        "layers": [
            { "name": "top", "route_definitions": routes },
            { "name": "bottom" },
        ],
    })
    .to_string()
    .into_bytes()
}

fn measurement_bytes(panel_id: &str, units: usize) -> Vec<u8> {
    let units: Vec<_> = (0..units).map(|i| json!({ "id": format!("U{i}") })).collect();
    json!({ "panel_id": panel_id, "units": units })
        .to_string()
        .into_bytes()
}

/// Engine stand-in: routes every unit of a block, and aggregates into a
/// single `panel.gds` naming the panel.
#[derive(Default)]
pub(crate) struct ScriptedEngine {
    calls: AtomicUsize,
    failing_blocks: Mutex<HashSet<usize>>,
}

impl ScriptedEngine {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every routing attempt for block `index` fails from now on.
    pub(crate) fn fail_block(&self, index: usize) {
        self.failing_blocks.lock().unwrap().insert(index);
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn run(&self, input: &Path, output: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let item: WorkItem = serde_json::from_slice(&tokio::fs::read(input).await?)?;
        let body = match item {
            WorkItem::Routing(item) => {
                if self.failing_blocks.lock().unwrap().contains(&item.block.index) {
                    return Err(PipelineError::Engine(format!(
                        "block {} crashed",
                        item.block.index
                    )));
                }
                serde_json::to_vec(&RoutingResult {
                    routed_units: (item.block.start..=item.block.end)
                        .map(|unit| RoutedUnit {
                            unit,
                            routing_good: true,
                        })
                        .collect(),
                })?
            }
            WorkItem::Aggregation(item) => serde_json::to_vec(&AggregationResult {
                files: vec![OutputFile {
                    file_name: "panel.gds".into(),
                    data: format!("panel {}", item.panel_id).into_bytes(),
                }],
            })?,
        };
        tokio::fs::write(output, body).await?;
        Ok(())
    }
}

fn location(ids: &dyn IdGenerator, share: &str, path: &str) -> NetworkLocation {
    NetworkLocation {
        id: ids.generate_location_id(),
        host: "fab".into(),
        share: share.into(),
        path: path.into(),
        credentials: None,
    }
}

pub(crate) struct Harness {
    pub ctx: Arc<PipelineContext>,
    pub queue: Arc<InMemoryTaskQueue>,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<ScriptedEngine>,
    pub share: Arc<LocalShare>,
    pub runtime: Runtime,
    pub watch: Watch,
    pub design_location: NetworkLocation,
    _root: TempDir,
}

impl Harness {
    pub(crate) async fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        let kv = Arc::new(InMemoryKv::new(Arc::clone(&clock)));
        let ledger = Arc::new(InMemoryLedger::new());
        let share = Arc::new(LocalShare::new(root.path().join("share")));
        let engine = Arc::new(ScriptedEngine::default());
        let queue = Arc::new(InMemoryTaskQueue::new(RetryPolicy::fixed(3, Duration::ZERO)));
        let local = LocalBlobCache::open(root.path().join("cache"), 64 * 1024 * 1024)
            .await
            .unwrap();

        let watch = Watch {
            id: ids.generate_watch_id(),
            name: "line3".into(),
            drop_location: location(ids.as_ref(), "measure", "drop"),
            output_location: location(ids.as_ref(), "measure", "out"),
        };
        let design_location = location(ids.as_ref(), "designs", "released");
        tokio::fs::create_dir_all(share.dir(&watch.drop_location).unwrap())
            .await
            .unwrap();
        tokio::fs::create_dir_all(share.dir(&design_location).unwrap())
            .await
            .unwrap();
        ledger.add_watch(watch.clone()).await.unwrap();
        ledger
            .add_design_location(DesignLocation {
                id: design_location.id,
                location: design_location.clone(),
            })
            .await
            .unwrap();

        let ctx = Arc::new(PipelineContext {
            ledger,
            kv: kv.clone(),
            shared: SharedCache::new(kv, CacheTtls::default()),
            local: Arc::new(local),
            share: share.clone(),
            engine: engine.clone(),
            dispatcher: queue.clone(),
            clock: clock.clone(),
            ids,
            grammar: FileGrammar::new("shifts", "layout").unwrap(),
            settings: PipelineSettings {
                scratch_dir: root.path().join("scratch"),
                ..PipelineSettings::default()
            },
        });
        let runtime = AppBuilder::pipeline(&ctx).unwrap().build().unwrap();

        Self {
            ctx,
            queue,
            clock,
            engine,
            share,
            runtime,
            watch,
            design_location,
            _root: root,
        }
    }

    pub(crate) async fn put_design(&self, design_number: &str, revision: &str, routing: bool) {
        self.share
            .write(
                &self.design_location,
                &format!("{design_number}_{revision}.layout"),
                &design_bytes(design_number, revision, routing),
            )
            .await
            .unwrap();
    }

    pub(crate) async fn put_measurement(&self, file_name: &str, panel_id: &str, units: usize) {
        self.put_raw_drop_file(file_name, &measurement_bytes(panel_id, units))
            .await;
    }

    pub(crate) async fn put_raw_drop_file(&self, file_name: &str, bytes: &[u8]) {
        self.share
            .write(&self.watch.drop_location, file_name, bytes)
            .await
            .unwrap();
    }

    /// Register a watch whose drop folder does not exist.
    pub(crate) async fn add_watch_without_folder(&self, name: &str) {
        let ids = self.ctx.ids.as_ref();
        let watch = Watch {
            id: ids.generate_watch_id(),
            name: name.into(),
            drop_location: location(ids, "measure", &format!("missing/{name}")),
            output_location: location(ids, "measure", "out"),
        };
        self.ctx.ledger.add_watch(watch).await.unwrap();
    }

    /// Register a second watch with its own drop and output folders.
    pub(crate) async fn add_watch(&self, name: &str) -> Watch {
        let ids = self.ctx.ids.as_ref();
        let watch = Watch {
            id: ids.generate_watch_id(),
            name: name.into(),
            drop_location: location(ids, name, "drop"),
            output_location: location(ids, name, "out"),
        };
        tokio::fs::create_dir_all(self.share.dir(&watch.drop_location).unwrap())
            .await
            .unwrap();
        self.ctx.ledger.add_watch(watch.clone()).await.unwrap();
        watch
    }

    /// Drop a measurement file and record it as discovery would.
    pub(crate) async fn launch(&self, file_name: &str, panel_id: &str, units: usize) -> JobId {
        self.launch_in(&self.watch, file_name, panel_id, units).await
    }

    pub(crate) async fn launch_in(
        &self,
        watch: &Watch,
        file_name: &str,
        panel_id: &str,
        units: usize,
    ) -> JobId {
        self.share
            .write(
                &watch.drop_location,
                file_name,
                &measurement_bytes(panel_id, units),
            )
            .await
            .unwrap();
        let ctx = &self.ctx;
        let name = ctx.grammar.parse(file_name).unwrap();
        let design_name = ctx.grammar.design_file_name(&name);
        let design = self
            .share
            .read(&self.design_location, &design_name)
            .await
            .unwrap();
        let now = ctx.now();
        let file = MeasurementFile {
            id: ctx.ids.generate_measurement_file_id(),
            watch: watch.id,
            file_name: file_name.into(),
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
        let id = job.id;
        ctx.ledger.record_discovery(file, job).await.unwrap();
        id
    }

    /// Run both fetches for every LAUNCHED job, bypassing the queue.
    pub(crate) async fn warm_all(&self) {
        let design = FetchDesignHandler::new(self.ctx.clone());
        let measurements = FetchMeasurementsHandler::new(self.ctx.clone());
        for job in self
            .ctx
            .ledger
            .jobs_with_status(JobStatus::Launched)
            .await
            .unwrap()
        {
            design
                .handle(FetchDesign {
                    job_id: job.id,
                    claim_token: self.ctx.ids.generate_token(),
                })
                .await
                .unwrap();
            measurements
                .handle(FetchMeasurements {
                    job_id: job.id,
                    claim_token: self.ctx.ids.generate_token(),
                })
                .await
                .unwrap();
        }
    }

    /// Execute queued tasks (and the tasks they dispatch) until the queue is idle.
    pub(crate) async fn drain(&self) {
        for _ in 0..10_000 {
            match self.queue.try_lease().await {
                Some(lease) => execute_lease(&self.runtime, lease).await,
                None if self.queue.is_idle().await => return,
                None => tokio::task::yield_now().await,
            }
        }
        panic!("queue did not drain");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AdmissionScheduler;
    use crate::app::tasks::Aggregate;
    use crate::typed::Task;

    async fn admit_one(h: &Harness) -> Option<JobId> {
        h.warm_all().await;
        AdmissionScheduler::new(h.ctx.clone())
            .tick()
            .await
            .unwrap()
            .admitted
    }

    #[tokio::test]
    async fn routed_job_runs_to_completion() {
        let h = Harness::new().await;
        h.put_design("D000001", "A", true).await;
        let job = h.launch("D000001_A_P1.shifts", "P1", 1000).await;

        assert_eq!(admit_one(&h).await, Some(job));
        h.drain().await;

        let record = h.ctx.ledger.job(job).await.unwrap();
        assert_eq!(record.status, JobStatus::Complete);
        assert_eq!(record.work_items, 5);
        assert_eq!(record.work_items_done, record.work_items);
        assert_eq!(record.unit_count, 1000);
        assert_eq!(record.units_good, 1000);
        assert_eq!(record.final_yield, Some(1.0));
        assert!(record.started_time.is_some() && record.finished_time.is_some());
        assert_eq!(h.queue.envelopes_of(Aggregate::TYPE).await.len(), 1);
        // 3 blocks + 1 aggregation
        assert_eq!(h.engine.calls(), 4);

        let written = h
            .share
            .read(&h.watch.output_location, "D000001_A_panel.gds")
            .await
            .unwrap();
        assert_eq!(written, b"panel P1");
    }

    #[tokio::test]
    async fn failed_block_stops_the_job_before_aggregation() {
        let h = Harness::new().await;
        h.put_design("D000001", "A", true).await;
        let job = h.launch("D000001_A_P1.shifts", "P1", 1000).await;
        h.engine.fail_block(2);

        admit_one(&h).await;
        h.drain().await;

        let record = h.ctx.ledger.job(job).await.unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.work_items_done, 2);
        assert!(record.error.unwrap().contains("block 2"));
        assert!(h.queue.envelopes_of(Aggregate::TYPE).await.is_empty());
        assert!(h.share.list(&h.watch.output_location).await.is_err());
    }

    #[tokio::test]
    async fn unrouted_job_aggregates_measurements_directly() {
        let h = Harness::new().await;
        h.put_design("D000002", "B", false).await;
        let job = h.launch("D000002_B_P7.shifts", "P7", 12).await;

        admit_one(&h).await;
        h.drain().await;

        let record = h.ctx.ledger.job(job).await.unwrap();
        assert_eq!(record.status, JobStatus::Complete);
        assert_eq!(record.work_items_done, 2);
        assert_eq!(record.units_good, 12);
        assert_eq!(h.engine.calls(), 1);
        assert_eq!(
            h.share.list(&h.watch.output_location).await.unwrap(),
            vec!["D000002_B_panel.gds".to_string()]
        );
    }

    #[tokio::test]
    async fn restarted_job_completes_under_a_new_id() {
        let h = Harness::new().await;
        h.put_design("D000001", "A", false).await;
        let first = h.launch("D000001_A_P1.shifts", "P1", 3).await;
        h.ctx.fail_job(first, "operator").await.unwrap();

        let restarted = h.ctx.restart_job(first).await.unwrap();
        assert_ne!(restarted.id, first);
        assert_eq!(restarted.status, JobStatus::Launched);

        assert_eq!(admit_one(&h).await, Some(restarted.id));
        h.drain().await;

        let jobs = h.ctx.ledger.jobs().await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].status, JobStatus::Error);
        assert_eq!(jobs[1].status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn rewritten_output_replaces_the_previous_file() {
        let h = Harness::new().await;
        h.put_design("D000001", "A", false).await;
        h.share
            .write(&h.watch.output_location, "D000001_A_panel.gds", b"stale")
            .await
            .unwrap();
        h.launch("D000001_A_P1.shifts", "P1", 3).await;

        admit_one(&h).await;
        h.drain().await;

        assert_eq!(
            h.share
                .read(&h.watch.output_location, "D000001_A_panel.gds")
                .await
                .unwrap(),
            b"panel P1"
        );
    }

    #[tokio::test]
    async fn revision_and_panel_boundaries_do_not_share_measurements() {
        let h = Harness::new().await;
        h.put_design("D1", "AB", false).await;
        h.put_design("D1", "A", false).await;
        let long_revision = h.launch("D1_AB_C.shifts", "C", 5).await;
        let long_panel = h.launch("D1_A_BC.shifts", "BC", 7).await;

        for _ in 0..2 {
            admit_one(&h).await;
            h.drain().await;
        }

        let first = h.ctx.ledger.job(long_revision).await.unwrap();
        let second = h.ctx.ledger.job(long_panel).await.unwrap();
        assert_eq!(first.status, JobStatus::Complete);
        assert_eq!(first.unit_count, 5);
        assert_eq!(second.status, JobStatus::Complete);
        assert_eq!(second.unit_count, 7);
        assert_eq!(
            h.share
                .read(&h.watch.output_location, "D1_A_panel.gds")
                .await
                .unwrap(),
            b"panel BC"
        );
    }

    #[tokio::test]
    async fn same_file_name_in_two_watches_keeps_its_own_measurements() {
        let h = Harness::new().await;
        h.put_design("D000001", "A", false).await;
        let other = h.add_watch("line4").await;
        let here = h.launch("D000001_A_P1.shifts", "P1", 3).await;
        let there = h.launch_in(&other, "D000001_A_P1.shifts", "P1", 9).await;

        for _ in 0..2 {
            admit_one(&h).await;
            h.drain().await;
        }

        let here = h.ctx.ledger.job(here).await.unwrap();
        let there = h.ctx.ledger.job(there).await.unwrap();
        assert_eq!(here.status, JobStatus::Complete);
        assert_eq!(here.unit_count, 3);
        assert_eq!(there.status, JobStatus::Complete);
        assert_eq!(there.unit_count, 9);
        assert!(
            h.share
                .read(&other.output_location, "D000001_A_panel.gds")
                .await
                .is_ok()
        );
    }
}
