//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。各 trait は外部システムへの
//! インターフェースで、実装の詳細は `impls` 側に閉じ込めます。
//!
//! # 設計原則
//! - DurableStore が source of truth（正本）
//! - EphemeralStore は低遅延のバッファ（presence, timer state, broadcast）
//! - LocalTaskCache はゲスト専用
//! - Clock / IdGenerator を注入してテストを決定的にする

pub mod clock;
pub mod cue_sink;
pub mod durable_store;
pub mod ephemeral_store;
pub mod id_generator;
pub mod local_cache;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::cue_sink::{CueSink, NoopCueSink};
pub use self::durable_store::DurableStore;
pub use self::ephemeral_store::{EphemeralStore, StoreChange, StorePath, Subscription};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::local_cache::LocalTaskCache;
