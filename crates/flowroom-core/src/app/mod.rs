//! App - アプリケーション層
//!
//! ports を組み合わせてクライアントセッションのロジックを実装します。
//!
//! # 主要コンポーネント
//! - **ContextBuilder / SessionContext**: セッション単位の構築とワイヤリング
//! - **TaskCoordinator**: タスクのライフサイクル（start/pause/complete/quit/restore）
//! - **TaskLedger**: 状態の保存先（RemoteLedger / GuestLedger）
//! - **PresenceTracker**: 部屋ごとのプレゼンスと排他
//! - **RoomBroadcaster**: 部屋へのイベント配信（TTL つき）
//! - **LeaderboardCache**: ランキングの楽観更新
//! - **Loops**: tick / presence heartbeat / exclusivity guard / sweeper

pub mod broadcast;
pub mod builder;
pub mod guard_loop;
pub mod handle;
pub mod leaderboard;
pub mod ledger;
pub mod lifecycle;
pub mod paths;
pub mod presence;
pub mod presence_loop;
pub mod reaper_loop;
pub mod tick_loop;

// 主要な型を再エクスポート
pub use self::broadcast::RoomBroadcaster;
pub use self::builder::{BuildError, ContextBuilder, SessionContext, SignInError};
pub use self::handle::LoopHandle;
pub use self::leaderboard::LeaderboardCache;
pub use self::ledger::guest::MigrationReport;
pub use self::ledger::{GuestLedger, RecoveredTask, RecoverySource, RemoteLedger, TaskLedger};
pub use self::lifecycle::{
    CompletedTask, CoordinatorParts, MIN_COMPLETE_SECS, TaskCoordinator, TimerView,
};
pub use self::presence::{PresenceTracker, RoomMember};
pub use self::reaper_loop::{PresenceSweeper, SweepReport};
