//! App - アプリケーション層
//!
//! ports を組み合わせてパイプラインを実装します。
//!
//! # 主要コンポーネント
//! - **DiscoveryLoop**: 測定ファイルの発見と job の作成
//! - **AdmissionScheduler**: 取得の配送と tick あたり 1 件の投入
//! - **Handlers**: fetch / route / aggregate / output の各ステージ
//! - **AppBuilder / Runtime / WorkerGroup**: タスク実行基盤
//! - **Controller**: periodic loop の起動と停止

pub mod builder;
pub mod context;
pub mod controller;
pub mod discovery;
pub mod fetch;
pub mod output;
pub mod pipeline;
pub mod runtime;
pub mod scheduler;
pub mod status;
pub mod tasks;
pub mod worker;

pub use self::builder::{AppBuilder, BuildError};
pub use self::context::{PipelineContext, PipelineSettings};
pub use self::controller::Controller;
pub use self::discovery::{DiscoveryLoop, ScanReport};
pub use self::runtime::Runtime;
pub use self::scheduler::{AdmissionScheduler, TickReport};
pub use self::status::{JobView, job_views};
pub use self::worker::{WorkerGroup, execute_lease};
