//! ProcessEngine - 外部プロセスとして計算エンジンを起動する実装

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::{PipelineError, Result};
use crate::ports::Engine;

/// Runs `<program> [args..] -i <input> -o <output>`.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessEngine {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Engine for ProcessEngine {
    async fn run(&self, input: &Path, output: &Path) -> Result<()> {
        debug!(program = %self.program.display(), input = %input.display(), "spawning engine");
        let result = Command::new(&self.program)
            .args(&self.args)
            .arg("-i")
            .arg(input)
            .arg("-o")
            .arg(output)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                PipelineError::Engine(format!("failed to spawn {}: {e}", self.program.display()))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            warn!(status = %result.status, stderr = %stderr.trim(), "engine exited with failure");
            return Err(PipelineError::Engine(format!(
                "{} exited with {}",
                self.program.display(),
                result.status
            )));
        }
        Ok(())
    }
}
