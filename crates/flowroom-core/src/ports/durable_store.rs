//! DurableStore port - 正本（system of record）
//!
//! The relational store that owns users, tasks, preferences and task history.
//!
//! # 設計原則
//! - task 行を書き換えるのは complete/quit の handoff と明示的な CRUD のみ
//! - タイマーの tick から呼ばれることはない
//! - すべての呼び出しは非同期で、失敗は `DurableError` で返す

use async_trait::async_trait;

use crate::domain::{
    DurableError, HistoryEntry, LeaderboardEntry, LeaderboardPeriod, Preferences,
    PreferencesPatch, Task, TaskId, TaskName, TaskPatch, UserId,
};

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Create the row for a client-minted id. Creating an existing id returns the
    /// stored row unchanged.
    async fn create_task(
        &self,
        id: TaskId,
        name: &TaskName,
        user_id: &UserId,
    ) -> Result<Task, DurableError>;

    /// Used by the complete/quit handoff only.
    async fn patch_task(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, DurableError>;

    async fn list_tasks(&self, user_id: &UserId) -> Result<Vec<Task>, DurableError>;

    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), DurableError>;

    /// Entries sorted by `total_seconds`, highest first.
    async fn fetch_leaderboard(
        &self,
        period: LeaderboardPeriod,
    ) -> Result<Vec<LeaderboardEntry>, DurableError>;

    /// Users without stored preferences get the defaults.
    async fn fetch_preferences(&self, user_id: &UserId) -> Result<Preferences, DurableError>;

    async fn update_preferences(
        &self,
        user_id: &UserId,
        patch: &PreferencesPatch,
    ) -> Result<Preferences, DurableError>;
}
