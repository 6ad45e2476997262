//! Impls - ports の実装（開発用・単一プロセス用）
//!
//! # 含まれる実装
//! - **InMemoryKv**: 期限付き KV ストア（共有キャッシュ・lease の下地）
//! - **InMemoryLedger**: ledger（正本）
//! - **LocalShare**: ローカルディレクトリ上のファイル共有
//! - **ProcessEngine**: 外部プロセスとしての計算エンジン
//!
//! タスク配送は `queue::InMemoryTaskQueue` が `Dispatcher` を実装します。

pub mod local_share;
pub mod memory_kv;
pub mod memory_ledger;
pub mod process_engine;

pub use self::local_share::LocalShare;
pub use self::memory_kv::InMemoryKv;
pub use self::memory_ledger::InMemoryLedger;
pub use self::process_engine::ProcessEngine;
