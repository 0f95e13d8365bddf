//! InMemoryDurableStore - 開発・テスト用の正本
//!
//! Task rows, history and preferences live in one mutex-guarded state. The
//! leaderboard is aggregated from history on every fetch, the same way a SQL
//! `GROUP BY` would.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    DurableError, HistoryEntry, LeaderboardEntry, LeaderboardPeriod, Preferences,
    PreferencesPatch, Task, TaskId, TaskName, TaskPatch, TaskStatus, UserId,
};
use crate::ports::{Clock, DurableStore};

#[derive(Default)]
struct DurableState {
    tasks: HashMap<TaskId, Task>,
    history: Vec<HistoryEntry>,
    preferences: HashMap<UserId, Preferences>,
    unavailable: bool,
    patch_calls: usize,
}

impl DurableState {
    fn ensure_available(&self) -> Result<(), DurableError> {
        if self.unavailable {
            return Err(DurableError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }
}

pub struct InMemoryDurableStore {
    state: Mutex<DurableState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryDurableStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(DurableState::default()),
            clock,
        }
    }

    /// While set, every call fails with `DurableError::Unavailable`.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    pub async fn task(&self, id: TaskId) -> Option<Task> {
        self.state.lock().await.tasks.get(&id).cloned()
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.state.lock().await.history.clone()
    }

    /// Number of `patch_task` calls that reached the store.
    pub async fn patch_calls(&self) -> usize {
        self.state.lock().await.patch_calls
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn create_task(
        &self,
        id: TaskId,
        name: &TaskName,
        user_id: &UserId,
    ) -> Result<Task, DurableError> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        let task = state
            .tasks
            .entry(id)
            .or_insert_with(|| Task::new(id, user_id.clone(), name.clone(), now));
        if &task.user_id != user_id {
            return Err(DurableError::Rejected(format!(
                "{id} belongs to another user"
            )));
        }
        Ok(task.clone())
    }

    async fn patch_task(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, DurableError> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        state.patch_calls += 1;
        let task = state.tasks.get_mut(&id).ok_or(DurableError::NotFound(id))?;
        // completed rows are final
        if task.status == TaskStatus::Completed && patch.status != TaskStatus::Completed {
            return Err(DurableError::Rejected(format!(
                "{id} is already completed"
            )));
        }
        task.status = patch.status;
        task.time_spent = patch.duration;
        task.completed_at = patch.completed_at;
        task.last_active = now;
        Ok(task.clone())
    }

    async fn list_tasks(&self, user_id: &UserId) -> Result<Vec<Task>, DurableError> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| &t.user_id == user_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.created_at, t.id));
        Ok(tasks)
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), DurableError> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        state.history.push(entry.clone());
        Ok(())
    }

    async fn fetch_leaderboard(
        &self,
        period: LeaderboardPeriod,
    ) -> Result<Vec<LeaderboardEntry>, DurableError> {
        let now = self.clock.now_millis();
        let state = self.state.lock().await;
        state.ensure_available()?;

        let since = period.window_ms().map(|w| now - w);
        let mut totals: HashMap<&UserId, LeaderboardEntry> = HashMap::new();
        for entry in &state.history {
            if since.is_some_and(|s| entry.completed_at < s) {
                continue;
            }
            let row = totals
                .entry(&entry.user_id)
                .or_insert_with(|| LeaderboardEntry {
                    user_id: entry.user_id.clone(),
                    display_name: entry.display_name.clone(),
                    total_seconds: 0,
                    tasks_completed: 0,
                });
            row.total_seconds += entry.duration_secs;
            row.tasks_completed += 1;
        }
        let mut rows: Vec<LeaderboardEntry> = totals.into_values().collect();
        rows.sort_by(|a, b| {
            b.total_seconds
                .cmp(&a.total_seconds)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(rows)
    }

    async fn fetch_preferences(&self, user_id: &UserId) -> Result<Preferences, DurableError> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        Ok(state.preferences.get(user_id).cloned().unwrap_or_default())
    }

    async fn update_preferences(
        &self,
        user_id: &UserId,
        patch: &PreferencesPatch,
    ) -> Result<Preferences, DurableError> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        let prefs = state.preferences.entry(user_id.clone()).or_default();
        prefs.apply(patch);
        Ok(prefs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use rstest::rstest;
    use ulid::Ulid;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn store() -> (Arc<FixedClock>, InMemoryDurableStore) {
        let clock = Arc::new(FixedClock::from_millis(100 * DAY_MS));
        let store = InMemoryDurableStore::new(clock.clone());
        (clock, store)
    }

    fn entry(user: &str, secs: u64, at: i64) -> HistoryEntry {
        HistoryEntry {
            task_id: TaskId::from_ulid(Ulid::new()),
            user_id: UserId::new(user),
            display_name: user.to_uppercase(),
            task_name: "t".into(),
            duration_secs: secs,
            completed_at: at,
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_per_id() {
        let (_, store) = store();
        let id = TaskId::from_ulid(Ulid::new());
        let name = TaskName::parse("Write report").unwrap();
        let user = UserId::new("u1");

        let first = store.create_task(id, &name, &user).await.unwrap();
        let again = store.create_task(id, &name, &user).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(store.list_tasks(&user).await.unwrap().len(), 1);

        let other = store.create_task(id, &name, &UserId::new("u2")).await;
        assert!(matches!(other, Err(DurableError::Rejected(_))));
    }

    #[tokio::test]
    async fn patch_missing_task_is_not_found() {
        let (_, store) = store();
        let id = TaskId::from_ulid(Ulid::new());
        let patch = TaskPatch {
            status: TaskStatus::Completed,
            duration: 10,
            completed_at: Some(1),
        };
        assert_eq!(
            store.patch_task(id, &patch).await,
            Err(DurableError::NotFound(id))
        );
    }

    #[tokio::test]
    async fn completed_row_cannot_be_reopened() {
        let (_, store) = store();
        let id = TaskId::from_ulid(Ulid::new());
        let user = UserId::new("u1");
        store
            .create_task(id, &TaskName::parse("Essay").unwrap(), &user)
            .await
            .unwrap();
        let done = TaskPatch {
            status: TaskStatus::Completed,
            duration: 30,
            completed_at: Some(1),
        };
        store.patch_task(id, &done).await.unwrap();

        let reset = TaskPatch {
            status: TaskStatus::NotStarted,
            duration: 0,
            completed_at: None,
        };
        let err = store.patch_task(id, &reset).await.unwrap_err();
        assert!(matches!(err, DurableError::Rejected(_)));
        let row = store.task(id).await.unwrap();
        assert_eq!((row.status, row.time_spent), (TaskStatus::Completed, 30));
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let (_, store) = store();
        store.set_unavailable(true).await;
        let err = store.list_tasks(&UserId::new("u1")).await.unwrap_err();
        assert!(matches!(err, DurableError::Unavailable(_)));
        store.set_unavailable(false).await;
        assert!(store.list_tasks(&UserId::new("u1")).await.is_ok());
    }

    #[rstest]
    #[case::day(LeaderboardPeriod::Day, 600)]
    #[case::week(LeaderboardPeriod::Week, 1_500)]
    #[case::all_time(LeaderboardPeriod::AllTime, 3_500)]
    #[tokio::test]
    async fn leaderboard_respects_period(#[case] period: LeaderboardPeriod, #[case] u1_total: u64) {
        let (clock, store) = store();
        let now = clock.now_millis();
        for e in [
            entry("u1", 600, now - 1_000),
            entry("u1", 900, now - 3 * DAY_MS),
            entry("u1", 2_000, now - 60 * DAY_MS),
            entry("u2", 300, now - 1_000),
        ] {
            store.append_history(&e).await.unwrap();
        }

        let board = store.fetch_leaderboard(period).await.unwrap();
        assert_eq!(board[0].user_id, UserId::new("u1"));
        assert_eq!(board[0].total_seconds, u1_total);
        assert_eq!(board[1].total_seconds, 300);
    }

    #[tokio::test]
    async fn preferences_default_then_patch() {
        let (_, store) = store();
        let user = UserId::new("u1");
        assert_eq!(
            store.fetch_preferences(&user).await.unwrap(),
            Preferences::default()
        );
        let updated = store
            .update_preferences(
                &user,
                &PreferencesPatch {
                    sound_enabled: Some(false),
                    ..PreferencesPatch::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.sound_enabled);
        assert!(!store.fetch_preferences(&user).await.unwrap().sound_enabled);
    }
}
