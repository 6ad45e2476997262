//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::{
    Id, IdMarker, JobId, LocationId, MeasurementFileId, TaskId, WatchId,
};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散システムで使える ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（controller と worker から共有される）
pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;

    fn generate_task_id(&self) -> TaskId;

    fn generate_measurement_file_id(&self) -> MeasurementFileId;

    fn generate_watch_id(&self) -> WatchId;

    fn generate_location_id(&self) -> LocationId;

    /// Random token identifying one claim or lease holder.
    fn generate_token(&self) -> String;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// タイムスタンプ部分は Clock から取るので、ManualClock を使えば
/// 時刻部分が決定的になります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next<T: IdMarker>(&self) -> Id<T> {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Id::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        self.next()
    }

    fn generate_task_id(&self) -> TaskId {
        self.next()
    }

    fn generate_measurement_file_id(&self) -> MeasurementFileId {
        self.next()
    }

    fn generate_watch_id(&self) -> WatchId {
        self.next()
    }

    fn generate_location_id(&self) -> LocationId {
        self.next()
    }

    fn generate_token(&self) -> String {
        Ulid::from_parts(
            self.clock.now().timestamp_millis().max(0) as u64,
            rand::random(),
        )
        .to_string()
    }
}
