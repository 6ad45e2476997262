//! WorkerGroup - キューから lease を取り、Runtime で実行するワーカー群

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::runtime::Runtime;
use crate::queue::{FailureDisposition, TaskLease, TaskQueue};

/// Worker group handle.
/// - `request_shutdown()` で新しい lease の取得を止める
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers.
    pub fn spawn(n: usize, queue: Arc<dyn TaskQueue>, runtime: Arc<Runtime>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let q = Arc::clone(&queue);
            let rt = Arc::clone(&runtime);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, q, rt, &mut rx).await;
            });
            joins.push(join);
        }
        info!(workers = n, "worker group started");

        Self { shutdown_tx, joins }
    }

    /// Request shutdown for all workers.
    /// In-flight handlers run to completion; workers just stop taking leases.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<dyn TaskQueue>,
    runtime: Arc<Runtime>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // lease は待つので shutdown と競合させる
        let lease = tokio::select! {
            _ = shutdown_rx.changed() => continue,
            lease = queue.lease() => lease,
        };

        let Some(lease) = lease else {
            tokio::task::yield_now().await;
            continue;
        };

        debug!(
            worker_id,
            task_id = %lease.envelope().task_id(),
            stage = lease.envelope().task_type().stage(),
            attempt = lease.attempt(),
            "lease acquired"
        );
        execute_lease(&runtime, lease).await;
    }
    debug!(worker_id, "worker stopped");
}

/// Run one leased task and report the result to the queue.
///
/// A task the queue declares dead gets its handler's exhaustion hook.
pub async fn execute_lease(runtime: &Runtime, lease: Box<dyn TaskLease>) {
    let envelope = lease.envelope().clone();

    let err = match runtime.execute(&envelope).await {
        Ok(()) => {
            if let Err(e) = lease.ack().await {
                warn!(task_id = %envelope.task_id(), error = %e, "ack failed");
            }
            return;
        }
        Err(err) => err,
    };

    match lease.fail(&err).await {
        Ok(FailureDisposition::RetryScheduled { .. }) => {}
        Ok(FailureDisposition::Dead) => {
            if let Err(e) = runtime.exhausted(&envelope, &err).await {
                error!(
                    task_id = %envelope.task_id(),
                    task_type = %envelope.task_type(),
                    error = %e,
                    "exhaustion hook failed"
                );
            }
        }
        Err(e) => {
            error!(task_id = %envelope.task_id(), error = %e, "fail report failed");
        }
    }
}
