//! Typed - パイプラインの各ステージを型付き Task として扱う
//!
//! ステージのメッセージ（`FetchDesign`, `RouteBlock`, ...）は `Task` を実装し、
//! 対応する `Handler<T>` が処理します。queue には `TaskEnvelope` として
//! 型消去された形で載り、`TaskRegistry` が `TYPE` から Handler を引きます。
//! リトライを使い切ったときの後始末は `Handler::on_exhausted` に置きます。

pub mod handler;
pub mod registry;
pub mod task;

pub use self::handler::{DynHandler, Handler};
pub use self::registry::{RegistryError, TaskRegistry};
pub use self::task::{Task, decode, encode};
