//! routeline-core
//!
//! 測定ファイルを発見し、設計に沿ってルーティングし、パネル出力を書き出す
//! パイプラインの中核です。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job, measurement, partition, work, errors）
//! - **ports**: 抽象化レイヤー（Ledger, KeyValueStore, RemoteShare, Engine, Dispatcher, Clock）
//! - **cache**: 共有キャッシュの claim プロトコル、lease、ローカル LRU キャッシュ
//! - **queue**: in-process のタスク配送（リトライ・dead 判定）
//! - **typed**: 型付き Task API（Task trait, Handler trait, TaskRegistry）
//! - **app**: discovery / admission / 各ステージのハンドラ / worker
//! - **impls**: ports の単一プロセス向け実装
//! - **config**: TOML 設定

pub mod app;
pub mod cache;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod typed;

#[cfg(test)]
mod testing;

pub use self::config::PipelineConfig;
