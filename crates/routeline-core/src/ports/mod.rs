//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（ledger, 共有 KV, ファイル共有, 計算エンジン,
//! タスク配送基盤）へのインターフェースです。
//!
//! # 設計原則
//! - ledger が source of truth（正本）
//! - 共有 KV は期限付きキャッシュ（完了判定には使わない）
//! - 外部エンジンは不透明なプロセス

pub mod clock;
pub mod dispatch;
pub mod engine;
pub mod id_generator;
pub mod kv;
pub mod ledger;
pub mod share;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::dispatch::{Dispatcher, dispatch_task};
pub use self::engine::{Engine, invoke};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::kv::KeyValueStore;
pub use self::ledger::{BlockArrival, Ledger};
pub use self::share::{RemoteShare, is_ignored_entry};
