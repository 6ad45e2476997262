//! Pipeline tasks - ステージごとの型付きメッセージ
//!
//! ペイロードは小さく保ちます。blob 本体は共有キャッシュにあり、
//! ハンドラが job から key を組み立てて取りに行きます。

use serde::{Deserialize, Serialize};

use crate::domain::{JobId, WorkBlock};
use crate::typed::Task;

/// Pull the job's design descriptor into the shared cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchDesign {
    pub job_id: JobId,
    /// Identifies this fetch's claim so a redelivery can re-enter it.
    pub claim_token: String,
}

impl Task for FetchDesign {
    const TYPE: &'static str = "routeline.fetch.design.v1";
}

/// Pull the job's measurement file into the shared cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchMeasurements {
    pub job_id: JobId,
    pub claim_token: String,
}

impl Task for FetchMeasurements {
    const TYPE: &'static str = "routeline.fetch.measurements.v1";
}

/// Route one block of units through the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteBlock {
    pub job_id: JobId,
    pub block: WorkBlock,
    pub block_count: usize,
}

impl Task for RouteBlock {
    const TYPE: &'static str = "routeline.route.block.v1";
}

/// Merge block results (or the raw measurements) into the job's artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub job_id: JobId,
    pub block_count: usize,
    /// False when the design needs no routing; aggregation then reads no blocks.
    pub routed: bool,
}

impl Task for Aggregate {
    const TYPE: &'static str = "routeline.aggregate.v1";
}

/// Deliver the artifact's files to the watch's output location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutput {
    pub job_id: JobId,
}

impl Task for WriteOutput {
    const TYPE: &'static str = "routeline.output.write.v1";
}

/// Every task type the pipeline runtime must be able to execute.
pub const PIPELINE_TASKS: &[&str] = &[
    FetchDesign::TYPE,
    FetchMeasurements::TYPE,
    RouteBlock::TYPE,
    Aggregate::TYPE,
    WriteOutput::TYPE,
];
