//! Domain identifiers (strongly-typed IDs).
//!
//! すべての ID は ULID ベースの `Id<T>` です。
//! `T` は PhantomData のマーカー型で、実行時にはメモリを消費しませんが、
//! JobId と WatchId のような別種の ID をコンパイル時に区別できます。
//!
//! ## ULID の特性
//! - **時刻でソート可能**: 生成順序でソートできる（ledger の FIFO 順に使う）
//! - **分散生成可能**: controller と worker が調整なしで生成できる

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"job-", "watch-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Accepts both the bare ULID and the prefixed display form.
impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

impl IdMarker for Job {
    fn prefix() -> &'static str {
        "job-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Watch {}

impl IdMarker for Watch {
    fn prefix() -> &'static str {
        "watch-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MeasurementFile {}

impl IdMarker for MeasurementFile {
    fn prefix() -> &'static str {
        "mfile-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Location {}

impl IdMarker for Location {
    fn prefix() -> &'static str {
        "loc-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Identifier of a Job (one pipeline execution for one measurement file).
pub type JobId = Id<Job>;

/// Identifier of a Watch (drop location + output location pair).
pub type WatchId = Id<Watch>;

/// Identifier of a discovered measurement file.
pub type MeasurementFileId = Id<MeasurementFile>;

/// Identifier of a network location or design location.
pub type LocationId = Id<Location>;

/// Identifier of one dispatched task message (stable across its retries).
pub type TaskId = Id<Task>;
