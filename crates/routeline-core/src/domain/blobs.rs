//! Parsed forms of the two fetched blobs and their integrity checks.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::errors::{PipelineError, Result};
use super::measurement::MeasurementName;

/// Lowercase hex SHA-256 of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Fails with `ChecksumMismatch` unless `bytes` hash to `expected`.
pub fn verify_checksum(name: &str, bytes: &[u8], expected: &str) -> Result<()> {
    let actual = checksum(bytes);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(PipelineError::ChecksumMismatch {
            name: name.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    #[serde(default)]
    pub route_definitions: Vec<serde_json::Value>,
}

/// Design descriptor file contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignDescriptor {
    pub design_number: String,
    pub design_revision: String,
    #[serde(default)]
    pub layers: Vec<Layer>,
}

impl DesignDescriptor {
    /// Parse and check that the descriptor belongs to `expected`'s design.
    pub fn parse(bytes: &[u8], expected: &MeasurementName) -> Result<Self> {
        let descriptor: DesignDescriptor = serde_json::from_slice(bytes)?;
        let matches = descriptor
            .design_number
            .eq_ignore_ascii_case(&expected.design_number)
            && descriptor
                .design_revision
                .eq_ignore_ascii_case(&expected.design_revision);
        if !matches {
            return Err(PipelineError::DesignMismatch {
                expected: expected.design_stem(),
                found: format!("{}_{}", descriptor.design_number, descriptor.design_revision),
            });
        }
        Ok(descriptor)
    }

    /// Routing is required as soon as any layer carries a route definition.
    pub fn requires_routing(&self) -> bool {
        self.layers
            .iter()
            .any(|layer| !layer.route_definitions.is_empty())
    }
}

fn default_valid() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    #[serde(default = "default_valid")]
    pub valid: bool,
}

/// Measurement file contents: one panel's units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSet {
    pub panel_id: String,
    #[serde(default)]
    pub units: Vec<Unit>,
}

impl MeasurementSet {
    pub fn parse(bytes: &[u8], expected: &MeasurementName) -> Result<Self> {
        let set: MeasurementSet = serde_json::from_slice(bytes)?;
        if !set.panel_id.eq_ignore_ascii_case(&expected.panel_id) {
            return Err(PipelineError::PanelMismatch {
                expected: expected.panel_id.clone(),
                found: set.panel_id,
            });
        }
        Ok(set)
    }

    pub fn unit_count(&self) -> u64 {
        self.units.len() as u64
    }

    pub fn valid_units(&self) -> u64 {
        self.units.iter().filter(|u| u.valid).count() as u64
    }
}
