//! Domain model (IDs, records, file formats, work descriptors).

pub mod blobs;
pub mod errors;
pub mod ids;
pub mod job;
pub mod location;
pub mod measurement;
pub mod partition;
pub mod task;
pub mod work;

pub use self::blobs::{DesignDescriptor, MeasurementSet, checksum, verify_checksum};
pub use self::errors::{ErrorKind, PipelineError, Result};
pub use self::ids::{JobId, LocationId, MeasurementFileId, TaskId, WatchId};
pub use self::job::{JobChange, JobRecord, JobStatus, SubStatus};
pub use self::location::{Credentials, DesignLocation, NetworkLocation, Watch};
pub use self::measurement::{FileGrammar, MeasurementFile, MeasurementName};
pub use self::partition::{DEFAULT_BLOCK_SIZE, WorkBlock, partition};
pub use self::task::{TaskEnvelope, TaskType};
pub use self::work::{
    AggregationResult, AggregationWorkItem, OutputFile, RoutedUnit, RoutingResult,
    RoutingWorkItem, WorkItem,
};
