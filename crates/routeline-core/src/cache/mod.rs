//! Cache - 二層キャッシュ
//!
//! - **shared**: 共有 KV 上の claim プロトコル（UNCLAIMED / CLAIMED / READY）
//! - **local**: ワーカーごとの LRU ディスクキャッシュ
//! - **lease**: TTL 付きの排他ロック（periodic loop 用）
//!
//! 共有キャッシュは期限付きであり、ジョブ完了の判定には使いません。

pub mod keys;
pub mod lease;
pub mod local;
pub mod shared;

pub use self::keys::{BlobKey, QUEUE_LEASE, SCAN_LEASE, artifact_key, block_result_key};
pub use self::lease::Lease;
pub use self::local::LocalBlobCache;
pub use self::shared::{CacheTtls, ClaimState, SharedCache};
