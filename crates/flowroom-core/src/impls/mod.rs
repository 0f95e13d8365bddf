//! Impls - 開発・テスト用の実装
//!
//! - InMemoryEphemeralStore: JSON ツリー + TTL + 購読
//! - InMemoryDurableStore: 正本の代替（障害注入つき）
//! - InMemoryTaskCache / JsonFileTaskCache: ゲスト用ローカルキャッシュ
//! - RecordingCueSink: 合図の記録

pub mod file_cache;
pub mod inmem_cache;
pub mod inmem_durable;
pub mod inmem_ephemeral;
pub mod recording_sink;

pub use self::file_cache::JsonFileTaskCache;
pub use self::inmem_cache::InMemoryTaskCache;
pub use self::inmem_durable::InMemoryDurableStore;
pub use self::inmem_ephemeral::InMemoryEphemeralStore;
pub use self::recording_sink::RecordingCueSink;
