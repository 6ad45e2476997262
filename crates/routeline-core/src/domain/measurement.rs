//! Measurement files and the file naming grammar.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::errors::{PipelineError, Result};
use super::ids::{MeasurementFileId, WatchId};

/// The three fields encoded in a measurement file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeasurementName {
    pub design_number: String,
    pub design_revision: String,
    pub panel_id: String,
}

impl MeasurementName {
    pub fn new(
        design_number: impl Into<String>,
        design_revision: impl Into<String>,
        panel_id: impl Into<String>,
    ) -> Self {
        Self {
            design_number: design_number.into(),
            design_revision: design_revision.into(),
            panel_id: panel_id.into(),
        }
    }

    /// `<designNumber>_<revision>`
    pub fn design_stem(&self) -> String {
        format!("{}_{}", self.design_number, self.design_revision)
    }

    /// `<designNumber>_<revision>_<panelId>`, used for result keys and output names.
    pub fn panel_stem(&self) -> String {
        format!(
            "{}_{}_{}",
            self.design_number, self.design_revision, self.panel_id
        )
    }
}

/// One discovered raw measurement file. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementFile {
    pub id: MeasurementFileId,
    pub watch: WatchId,
    pub file_name: String,
    pub name: MeasurementName,
    pub valid: bool,
    pub discovered_at: DateTime<Utc>,
}

/// Naming rules for measurement and design files.
///
/// Measurement files look like `<designNumber>_<revisionLetters>_<panelId>.<ext>`
/// (e.g. `D000123_B_P42.shifts`); the matching design descriptor is
/// `<designNumber>_<revision>.<designExt>`.
#[derive(Debug, Clone)]
pub struct FileGrammar {
    measurement: Regex,
    design_extension: String,
}

impl FileGrammar {
    pub fn new(measurement_extension: &str, design_extension: &str) -> Result<Self> {
        let pattern = format!(
            r"^([A-Za-z][0-9]+)_([A-Za-z]+)_(.+)\.{}$",
            regex::escape(measurement_extension)
        );
        let measurement = Regex::new(&pattern)
            .map_err(|e| PipelineError::Config(format!("measurement grammar: {e}")))?;
        Ok(Self {
            measurement,
            design_extension: design_extension.to_string(),
        })
    }

    /// Parse a measurement file name, or `None` if it does not follow the grammar.
    pub fn parse(&self, file_name: &str) -> Option<MeasurementName> {
        let caps = self.measurement.captures(file_name)?;
        Some(MeasurementName::new(&caps[1], &caps[2], &caps[3]))
    }

    pub fn design_file_name(&self, name: &MeasurementName) -> String {
        format!("{}.{}", name.design_stem(), self.design_extension)
    }
}
