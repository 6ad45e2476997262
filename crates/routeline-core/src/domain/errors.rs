//! Errors - エラー型と分類
//!
//! `ErrorKind` はリトライ判断に使う運用分類です。
//! dispatch 側（queue）は `kind()` だけを見て retry / dead を決めます。

use thiserror::Error;

use super::ids::JobId;
use super::job::JobStatus;

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Integrity: checksum / panel id 不一致など（上限までリトライ）
/// - NotFound: リソースが存在しない（即座に失敗、リトライしない）
/// - Permanent: 恒久的なエラー（リトライ無意味）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Integrity,
    NotFound,
    Permanent,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::Integrity)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("checksum mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("design {found} does not match expected {expected}")]
    DesignMismatch { expected: String, found: String },

    #[error("panel id {found} in measurement file does not match {expected}")]
    PanelMismatch { expected: String, found: String },

    #[error("shared cache entry {key} is not ready")]
    CacheMiss { key: String },

    #[error("engine failed: {0}")]
    Engine(String),

    #[error("remote share error: {0}")]
    Share(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("job {job}: invalid transition {from:?} -> {to}")]
    InvalidTransition {
        job: JobId,
        from: JobStatus,
        to: String,
    },

    #[error("job {0} does not exist")]
    UnknownJob(JobId),

    #[error("measurement file {0} is already recorded for this watch")]
    DuplicateMeasurement(String),

    #[error("handler not found for task_type={0}")]
    HandlerNotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NotFound { .. } | PipelineError::UnknownJob(_) => ErrorKind::NotFound,
            PipelineError::ChecksumMismatch { .. }
            | PipelineError::DesignMismatch { .. }
            | PipelineError::PanelMismatch { .. } => ErrorKind::Integrity,
            PipelineError::CacheMiss { .. }
            | PipelineError::Engine(_)
            | PipelineError::Share(_)
            | PipelineError::Store(_)
            | PipelineError::Io(_) => ErrorKind::Transient,
            PipelineError::Json(_)
            | PipelineError::InvalidTransition { .. }
            | PipelineError::DuplicateMeasurement(_)
            | PipelineError::HandlerNotFound(_)
            | PipelineError::Config(_) => ErrorKind::Permanent,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
