//! JsonFileTaskCache - ゲストのタスクを JSON ファイルに保存
//!
//! # 実装詳細
//! - ファイル全体を読み書きする（件数は少ない前提）
//! - 書き込みは一時ファイル + rename で、途中で落ちても壊れたファイルを残さない
//! - ファイルが無ければ空リスト扱い

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::inmem_cache::{replace, upsert};
use crate::domain::{CacheError, Task, TaskId};
use crate::ports::LocalTaskCache;

pub struct JsonFileTaskCache {
    path: PathBuf,
    // serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl JsonFileTaskCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<Task>, CacheError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, tasks: &[Task]) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec_pretty(tasks)?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn modify<F>(&self, apply: F) -> Result<(), CacheError>
    where
        F: FnOnce(&mut Vec<Task>) -> Result<(), CacheError> + Send,
    {
        let _guard = self.lock.lock().await;
        let mut tasks = self.load().await?;
        apply(&mut tasks)?;
        self.store(&tasks).await
    }
}

#[async_trait]
impl LocalTaskCache for JsonFileTaskCache {
    async fn get_tasks(&self) -> Result<Vec<Task>, CacheError> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    async fn save_tasks(&self, tasks: &[Task]) -> Result<(), CacheError> {
        let _guard = self.lock.lock().await;
        self.store(tasks).await
    }

    async fn add_task(&self, task: &Task) -> Result<(), CacheError> {
        self.modify(|tasks| {
            upsert(tasks, task);
            Ok(())
        })
        .await
    }

    async fn update_task(&self, task: &Task) -> Result<(), CacheError> {
        self.modify(|tasks| replace(tasks, task)).await
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), CacheError> {
        self.modify(|tasks| {
            tasks.retain(|t| t.id != id);
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskName, TaskStatus, UserId};
    use ulid::Ulid;

    fn task(name: &str) -> Task {
        Task::new(
            TaskId::from_ulid(Ulid::new()),
            UserId::new("guest-1"),
            TaskName::parse(name).unwrap(),
            1_000,
        )
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonFileTaskCache::new(dir.path().join("tasks.json"));
        assert!(cache.get_tasks().await.unwrap().is_empty());
        cache.clear().await.unwrap();
    }

    #[tokio::test]
    async fn tasks_survive_a_new_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tasks.json");
        let mut t = task("Draft email");

        let cache = JsonFileTaskCache::new(&path);
        cache.add_task(&t).await.unwrap();
        t.mark_started(2_000).unwrap();
        t.mark_paused(42, 44_000).unwrap();
        cache.update_task(&t).await.unwrap();

        let reopened = JsonFileTaskCache::new(&path);
        let tasks = reopened.get_tasks().await.unwrap();
        assert_eq!(tasks, vec![t.clone()]);
        assert_eq!(tasks[0].status, TaskStatus::Paused);

        reopened.delete_task(t.id).await.unwrap();
        assert!(reopened.get_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_of_unknown_task_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonFileTaskCache::new(dir.path().join("tasks.json"));
        let t = task("x");
        let err = cache.update_task(&t).await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound(id) if id == t.id));
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, b"{not json").unwrap();
        let cache = JsonFileTaskCache::new(&path);
        assert!(matches!(
            cache.get_tasks().await,
            Err(CacheError::Corrupt(_))
        ));
    }
}
