//! TaskLedger - タスク状態の保存先
//!
//! The coordinator owns the state machine; a ledger owns where that state goes.
//! Which ledger a session gets is decided once, when the session context is built:
//!
//! - `RemoteLedger`: ephemeral buffer + durable store (signed-in users)
//! - `GuestLedger`: client-local cache only
//!
//! # 設計原則
//! - 非終端遷移（start/pause/snapshot/heartbeat）の書き込みは best-effort。
//!   エラーは返すが、呼び出し側はログに残して先へ進む
//! - 終端遷移（complete/quit）の handoff は正本への書き込みが成功して初めて
//!   バッファを消す

pub mod guest;
pub mod remote;

use async_trait::async_trait;

use crate::domain::{
    EpochMillis, LifecycleError, Preferences, PreferencesPatch, RoomId, RunSegment, Task,
    TaskBuffer, TaskId, TaskPatch,
};

pub use self::guest::GuestLedger;
pub use self::remote::RemoteLedger;

/// Where a restored task was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySource {
    /// The "last active task" pointer.
    Pointer,
    /// Scan of every buffered task.
    Scan,
}

/// A task brought back on reconnect. Always paused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredTask {
    pub buffer: TaskBuffer,
    /// An open run segment was found and folded into `buffer.time_spent`.
    pub closed_segment: bool,
    pub source: RecoverySource,
}

#[async_trait]
pub trait TaskLedger: Send + Sync {
    async fn list_tasks(&self) -> Result<Vec<Task>, LifecycleError>;

    /// Persist a task minted by the client.
    async fn create_task(&self, task: &Task) -> Result<Task, LifecycleError>;

    /// A run segment opened for `task` (buffer upsert, timer state, heartbeat, pointer).
    async fn open_segment(
        &self,
        task: &Task,
        segment: RunSegment,
        room: Option<&RoomId>,
    ) -> Result<(), LifecycleError>;

    /// Pause every other task still marked in progress (other devices, crashed
    /// tabs). Returns the ids that were paused.
    async fn pause_stray(
        &self,
        keep: TaskId,
        now: EpochMillis,
    ) -> Result<Vec<TaskId>, LifecycleError>;

    /// Persist the current `expected(now)` of a running task.
    async fn snapshot(
        &self,
        task_id: TaskId,
        elapsed: u64,
        now: EpochMillis,
    ) -> Result<(), LifecycleError>;

    async fn heartbeat(
        &self,
        task_id: TaskId,
        segment: RunSegment,
        now: EpochMillis,
    ) -> Result<(), LifecycleError>;

    /// Close the open segment. `Ok(false)` when the buffered task is gone.
    async fn close_segment(
        &self,
        task: &Task,
        elapsed: u64,
        now: EpochMillis,
    ) -> Result<bool, LifecycleError>;

    /// Time buffered for a task, `None` when its record is already gone.
    async fn buffered_elapsed(
        &self,
        task_id: TaskId,
        now: EpochMillis,
    ) -> Result<Option<u64>, LifecycleError>;

    /// Completion handoff.
    async fn finalize(&self, task: &Task, patch: &TaskPatch) -> Result<(), LifecycleError>;

    /// Quit handoff: the durable row is reset, the buffer is discarded.
    async fn discard(&self, task: &Task, patch: &TaskPatch) -> Result<(), LifecycleError>;

    /// Reconnect path. Never resumes a timer.
    async fn recover(&self, now: EpochMillis) -> Result<Option<RecoveredTask>, LifecycleError>;

    async fn load_preferences(&self) -> Result<Preferences, LifecycleError>;

    async fn save_preferences(
        &self,
        patch: &PreferencesPatch,
    ) -> Result<Preferences, LifecycleError>;
}
