//! LocalTaskCache port - ゲスト用のローカル保存
//!
//! Device-local storage for sessions without a durable identity. Holds the same
//! `Task` shape as the durable store and is emptied (migrated or dropped) on sign-in.

use async_trait::async_trait;

use crate::domain::{CacheError, Task, TaskId};

#[async_trait]
pub trait LocalTaskCache: Send + Sync {
    async fn get_tasks(&self) -> Result<Vec<Task>, CacheError>;

    /// Replace the whole cached list.
    async fn save_tasks(&self, tasks: &[Task]) -> Result<(), CacheError>;

    /// Insert, or replace a task with the same id.
    async fn add_task(&self, task: &Task) -> Result<(), CacheError>;

    /// Fails with `CacheError::NotFound` when the id is not cached.
    async fn update_task(&self, task: &Task) -> Result<(), CacheError>;

    async fn delete_task(&self, id: TaskId) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;
}
