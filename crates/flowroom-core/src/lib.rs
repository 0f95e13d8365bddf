//! flowroom-core
//!
//! Core of a collaborative focus timer: a per-client timer state machine whose
//! time survives reloads, crashes and device switches, reconciled between a fast
//! ephemeral store and a durable system of record, plus room presence.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, buffer, presence, events, records, errors）
//! - **ports**: 抽象化レイヤー（EphemeralStore, DurableStore, LocalTaskCache, Clock, など）
//! - **timer**: Timer Engine（drift 補正、countdown、inactivity）
//! - **app**: アプリケーションロジック（builder, lifecycle, ledger, presence, loops）
//! - **impls**: 実装（開発・テスト用の in-memory / file）
//! - **config**: 設定（defaults ← TOML ← overrides）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod timer;
