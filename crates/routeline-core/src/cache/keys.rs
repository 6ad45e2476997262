//! Shared cache key namespace.

use crate::domain::{JobId, MeasurementName, WatchId};

/// Lease guarding the discovery scan.
pub const SCAN_LEASE: &str = "lease.measurement_scan";

/// Lease guarding the admission tick.
pub const QUEUE_LEASE: &str = "lease.queue_jobs";

/// One of the two claimable blobs a job depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlobKey {
    /// Keyed by design file name, e.g. `D000123_B.layout`.
    Design(String),
    /// Keyed by `<watch>.<designNumber>_<rev>_<panelId>`. The same file name
    /// dropped into two watches names two different blobs.
    Measurements(String),
}

impl BlobKey {
    pub fn design(design_name: impl Into<String>) -> Self {
        BlobKey::Design(design_name.into())
    }

    pub fn measurements(watch: WatchId, name: &MeasurementName) -> Self {
        BlobKey::Measurements(format!("{}.{}", watch.as_ulid(), name.panel_stem()))
    }

    /// Key of the blob bytes. Also used as the file name in the local cache.
    pub fn data_key(&self) -> String {
        match self {
            BlobKey::Design(name) => format!("design.{name}"),
            BlobKey::Measurements(name) => format!("shifts.{name}"),
        }
    }

    pub fn status_key(&self) -> String {
        format!("{}.status", self.data_key())
    }

    /// Derived metadata: `requires_routing` for designs, unit `count` for measurements.
    pub fn meta_key(&self) -> String {
        match self {
            BlobKey::Design(_) => format!("{}.requires_routing", self.data_key()),
            BlobKey::Measurements(_) => format!("{}.count", self.data_key()),
        }
    }
}

/// Partial routing result of one block. Scoped by job so a restarted job
/// never reads a predecessor's blocks.
pub fn block_result_key(name: &MeasurementName, job: JobId, index: usize) -> String {
    format!("results.{}.{}.{}", name.panel_stem(), job.as_ulid(), index)
}

/// Aggregated artifact of one job.
pub fn artifact_key(name: &MeasurementName, job: JobId) -> String {
    format!("gds.{}.{}", name.panel_stem(), job.as_ulid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn blob_keys_follow_namespace() {
        let name = MeasurementName::new("D000123", "B", "P42");
        let watch_ulid = Ulid::new();
        let design = BlobKey::design("D000123_B.layout");
        let shifts = BlobKey::measurements(WatchId::from_ulid(watch_ulid), &name);

        assert_eq!(design.data_key(), "design.D000123_B.layout");
        assert_eq!(design.status_key(), "design.D000123_B.layout.status");
        assert_eq!(
            design.meta_key(),
            "design.D000123_B.layout.requires_routing"
        );
        assert_eq!(shifts.data_key(), format!("shifts.{watch_ulid}.D000123_B_P42"));
        assert_eq!(
            shifts.status_key(),
            format!("shifts.{watch_ulid}.D000123_B_P42.status")
        );
        assert_eq!(
            shifts.meta_key(),
            format!("shifts.{watch_ulid}.D000123_B_P42.count")
        );
    }

    #[test]
    fn measurement_keys_keep_revision_and_panel_apart() {
        let watch = WatchId::from_ulid(Ulid::new());
        let long_revision = MeasurementName::new("D1", "AB", "C");
        let long_panel = MeasurementName::new("D1", "A", "BC");

        assert_ne!(
            BlobKey::measurements(watch, &long_revision),
            BlobKey::measurements(watch, &long_panel)
        );
    }

    #[test]
    fn measurement_keys_are_watch_scoped() {
        let name = MeasurementName::new("D000123", "B", "P42");
        let first = WatchId::from_ulid(Ulid::new());
        let second = WatchId::from_ulid(Ulid::new());

        assert_ne!(
            BlobKey::measurements(first, &name).data_key(),
            BlobKey::measurements(second, &name).data_key()
        );
    }

    #[test]
    fn result_keys_are_job_scoped() {
        let name = MeasurementName::new("D000123", "B", "P42");
        let ulid = Ulid::new();
        let job = JobId::from_ulid(ulid);

        assert_eq!(
            block_result_key(&name, job, 2),
            format!("results.D000123_B_P42.{ulid}.2")
        );
        assert_eq!(artifact_key(&name, job), format!("gds.D000123_B_P42.{ulid}"));
    }
}
