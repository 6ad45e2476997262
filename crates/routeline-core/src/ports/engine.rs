//! Engine port - 外部計算エンジン
//!
//! エンジンは入力パス（シリアライズ済み work descriptor）と出力パスを受け取る
//! 不透明なプロセスです。出力が無い・空の場合は失敗として扱います。

use std::path::Path;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::domain::{PipelineError, Result, WorkItem};

#[async_trait]
pub trait Engine: Send + Sync {
    async fn run(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Serialize `item` into a scratch directory, run the engine on it and decode
/// its output.
pub async fn invoke<R: DeserializeOwned>(
    engine: &dyn Engine,
    scratch_dir: &Path,
    item: &WorkItem,
) -> Result<R> {
    tokio::fs::create_dir_all(scratch_dir).await?;
    let workdir = tempfile::Builder::new()
        .prefix("routeline-")
        .tempdir_in(scratch_dir)?;
    let input = workdir.path().join("input.json");
    let output = workdir.path().join("output.json");

    tokio::fs::write(&input, serde_json::to_vec(item)?).await?;
    debug!(job_id = %item.job_id(), input = %input.display(), "invoking engine");
    engine.run(&input, &output).await?;

    let bytes = match tokio::fs::read(&output).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::Engine("engine produced no output".into()));
        }
        Err(e) => return Err(e.into()),
    };
    if bytes.is_empty() {
        return Err(PipelineError::Engine("engine produced empty output".into()));
    }
    serde_json::from_slice(&bytes)
        .map_err(|e| PipelineError::Engine(format!("unreadable engine output: {e}")))
}
