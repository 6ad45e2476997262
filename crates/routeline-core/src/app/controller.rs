//! Controller - discovery と admission の periodic loop を回す
//!
//! 2 つの loop は独立しており、lease と ledger だけで協調します。
//! どちらもワーカーの完了を待ちません。停止は WorkerGroup と同じく
//! watch channel で伝えます。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::context::PipelineContext;
use super::discovery::DiscoveryLoop;
use super::scheduler::AdmissionScheduler;
use crate::domain::Result;

pub struct Controller {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl Controller {
    /// Spawn the discovery and admission loops, each ticking every `interval`.
    pub fn spawn(ctx: Arc<PipelineContext>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let discovery = Arc::new(DiscoveryLoop::new(Arc::clone(&ctx)));
        let scheduler = Arc::new(AdmissionScheduler::new(ctx));

        let joins = vec![
            tokio::spawn(run_periodic(
                "discovery",
                interval,
                shutdown_rx.clone(),
                move || {
                    let discovery = Arc::clone(&discovery);
                    async move {
                        let report = discovery.tick().await?;
                        if !report.launched.is_empty() || report.failed_watches > 0 {
                            info!(
                                launched = report.launched.len(),
                                failed_watches = report.failed_watches,
                                "discovery tick"
                            );
                        }
                        Ok(())
                    }
                },
            )),
            tokio::spawn(run_periodic(
                "admission",
                interval,
                shutdown_rx,
                move || {
                    let scheduler = Arc::clone(&scheduler);
                    async move {
                        let report = scheduler.tick().await?;
                        debug!(?report, "admission tick");
                        Ok(())
                    }
                },
            )),
        ];
        info!(interval_ms = interval.as_millis() as u64, "controller started");

        Self { shutdown_tx, joins }
    }

    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn run_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
{
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        if let Err(e) = tick().await {
            warn!(loop_name = name, error = %e, "tick failed");
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // controller dropped
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!(loop_name = name, "loop stopped");
}
