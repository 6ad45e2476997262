//! Engine work descriptors and results.
//!
//! Blobs travel as base64 strings so a descriptor is a single JSON document
//! the external engine can read from disk.

use serde::{Deserialize, Serialize};

use super::ids::JobId;
use super::partition::WorkBlock;

mod b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Input for one engine invocation, tagged by `work_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "work_type", rename_all = "snake_case")]
pub enum WorkItem {
    Routing(RoutingWorkItem),
    Aggregation(AggregationWorkItem),
}

impl WorkItem {
    pub fn job_id(&self) -> JobId {
        match self {
            WorkItem::Routing(item) => item.job_id,
            WorkItem::Aggregation(item) => item.job_id,
        }
    }
}

/// Route the units of one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingWorkItem {
    pub job_id: JobId,
    pub panel_id: String,
    #[serde(with = "b64")]
    pub design: Vec<u8>,
    #[serde(with = "b64")]
    pub measurements: Vec<u8>,
    pub block: WorkBlock,
}

/// Merge routed units (if any) with both blobs into the final artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationWorkItem {
    pub job_id: JobId,
    pub panel_id: String,
    #[serde(with = "b64")]
    pub design: Vec<u8>,
    #[serde(with = "b64")]
    pub measurements: Vec<u8>,
    pub routed: bool,
    #[serde(default)]
    pub routed_units: Vec<RoutedUnit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutedUnit {
    pub unit: usize,
    pub routing_good: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoutingResult {
    #[serde(default)]
    pub routed_units: Vec<RoutedUnit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub file_name: String,
    #[serde(with = "b64")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregationResult {
    #[serde(default)]
    pub files: Vec<OutputFile>,
}
