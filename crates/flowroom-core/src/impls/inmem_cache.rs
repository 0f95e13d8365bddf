//! InMemoryTaskCache - テスト用のローカルキャッシュ

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{CacheError, Task, TaskId};
use crate::ports::LocalTaskCache;

#[derive(Default)]
pub struct InMemoryTaskCache {
    tasks: Mutex<Vec<Task>>,
}

impl InMemoryTaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
        }
    }
}

/// Shared list semantics for every cache backend.
pub(crate) fn upsert(tasks: &mut Vec<Task>, task: &Task) {
    match tasks.iter_mut().find(|t| t.id == task.id) {
        Some(existing) => *existing = task.clone(),
        None => tasks.push(task.clone()),
    }
}

pub(crate) fn replace(tasks: &mut [Task], task: &Task) -> Result<(), CacheError> {
    let existing = tasks
        .iter_mut()
        .find(|t| t.id == task.id)
        .ok_or(CacheError::NotFound(task.id))?;
    *existing = task.clone();
    Ok(())
}

#[async_trait]
impl LocalTaskCache for InMemoryTaskCache {
    async fn get_tasks(&self) -> Result<Vec<Task>, CacheError> {
        Ok(self.tasks.lock().await.clone())
    }

    async fn save_tasks(&self, tasks: &[Task]) -> Result<(), CacheError> {
        *self.tasks.lock().await = tasks.to_vec();
        Ok(())
    }

    async fn add_task(&self, task: &Task) -> Result<(), CacheError> {
        upsert(&mut *self.tasks.lock().await, task);
        Ok(())
    }

    async fn update_task(&self, task: &Task) -> Result<(), CacheError> {
        replace(&mut self.tasks.lock().await, task)
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), CacheError> {
        self.tasks.lock().await.retain(|t| t.id != id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.tasks.lock().await.clear();
        Ok(())
    }
}
