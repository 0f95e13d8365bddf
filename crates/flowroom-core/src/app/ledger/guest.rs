//! GuestLedger - ローカルキャッシュだけで動くゲスト用 ledger
//!
//! Guests have no ephemeral subtree, so an open run segment is encoded in the cached
//! row itself: `status = in_progress`, `time_spent` = seconds before the segment,
//! `last_active` = segment start. Elapsed time is then exact from the row alone,
//! which is why snapshots and heartbeats are no-ops here.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{RecoveredTask, RecoverySource, TaskLedger};
use crate::app::paths;
use crate::domain::{
    EpochMillis, HistoryEntry, LifecycleError, Preferences, PreferencesPatch, RoomId,
    RunSegment, Task, TaskBuffer, TaskId, TaskPatch, TaskStatus, UserId,
};
use crate::ports::ephemeral_store::write_as;
use crate::ports::{DurableStore, EphemeralStore, LocalTaskCache};
use crate::timer::expected_elapsed;

/// Outcome of moving guest tasks to a signed-in account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: usize,
    pub completed: usize,
    /// Open tasks whose time was carried over into the ephemeral buffer.
    pub buffered: usize,
}

pub struct GuestLedger {
    cache: Arc<dyn LocalTaskCache>,
    preferences: Mutex<Preferences>,
}

impl GuestLedger {
    pub fn new(cache: Arc<dyn LocalTaskCache>) -> Self {
        Self {
            cache,
            preferences: Mutex::new(Preferences::default()),
        }
    }

    async fn find(&self, id: TaskId) -> Result<Option<Task>, LifecycleError> {
        Ok(self.cache.get_tasks().await?.into_iter().find(|t| t.id == id))
    }

    /// Elapsed seconds of a cached row at `now`.
    fn row_elapsed(task: &Task, now: EpochMillis) -> u64 {
        match task.status {
            TaskStatus::InProgress => expected_elapsed(task.time_spent, task.last_active, now),
            _ => task.time_spent,
        }
    }

    fn close_row(task: &mut Task, now: EpochMillis) {
        task.time_spent = Self::row_elapsed(task, now);
        task.status = TaskStatus::Paused;
        task.last_active = now;
    }

    fn apply_patch(task: &Task, patch: &TaskPatch, now: EpochMillis) -> Task {
        let mut row = task.clone();
        row.status = patch.status;
        row.time_spent = patch.duration;
        row.completed_at = patch.completed_at;
        row.last_active = patch.completed_at.unwrap_or(now);
        row
    }

    /// Copy every cached task into the durable store under `user`, carry open time
    /// over into the ephemeral buffer, then clear the cache.
    ///
    /// Completed guest tasks also get a history entry, so their time counts on the
    /// leaderboard. The cache is only cleared once every durable write succeeded,
    /// so a failed migration can be retried; rows a previous attempt already
    /// completed are left alone.
    pub async fn migrate(
        &self,
        durable: &dyn DurableStore,
        ephemeral: &dyn EphemeralStore,
        user: &UserId,
        display_name: &str,
        now: EpochMillis,
    ) -> Result<MigrationReport, LifecycleError> {
        let tasks = self.cache.get_tasks().await?;
        let mut report = MigrationReport::default();

        for mut task in tasks {
            let stored = durable
                .create_task(task.id, &task.name, user)
                .await
                .map_err(|e| LifecycleError::durable(task.id, e))?;
            report.migrated += 1;

            match task.status {
                TaskStatus::Completed if stored.status == TaskStatus::Completed => {
                    report.completed += 1;
                }
                TaskStatus::Completed => {
                    let completed_at = task.completed_at.unwrap_or(task.last_active);
                    let patch = TaskPatch {
                        status: TaskStatus::Completed,
                        duration: task.time_spent,
                        completed_at: Some(completed_at),
                    };
                    durable
                        .patch_task(task.id, &patch)
                        .await
                        .map_err(|e| LifecycleError::durable(task.id, e))?;
                    let entry = HistoryEntry {
                        task_id: task.id,
                        user_id: user.clone(),
                        display_name: display_name.to_string(),
                        task_name: task.name.as_str().to_string(),
                        duration_secs: task.time_spent,
                        completed_at,
                    };
                    durable
                        .append_history(&entry)
                        .await
                        .map_err(|e| LifecycleError::durable(task.id, e))?;
                    report.completed += 1;
                }
                TaskStatus::InProgress | TaskStatus::Paused => {
                    Self::close_row(&mut task, now);
                    task.user_id = user.clone();
                    let buffer = TaskBuffer::from_task(&task, None);
                    let path = paths::task_buffer(user, task.id);
                    match write_as(ephemeral, &path, &buffer).await {
                        Ok(()) => report.buffered += 1,
                        Err(e) => {
                            tracing::warn!(task_id = %task.id, error = %e, "guest time not carried over");
                        }
                    }
                }
                TaskStatus::NotStarted | TaskStatus::Quit => {}
            }
        }

        self.cache.clear().await?;
        tracing::info!(
            user_id = %user,
            migrated = report.migrated,
            completed = report.completed,
            buffered = report.buffered,
            "guest tasks migrated"
        );
        Ok(report)
    }
}

#[async_trait]
impl TaskLedger for GuestLedger {
    async fn list_tasks(&self) -> Result<Vec<Task>, LifecycleError> {
        Ok(self.cache.get_tasks().await?)
    }

    async fn create_task(&self, task: &Task) -> Result<Task, LifecycleError> {
        self.cache.add_task(task).await?;
        Ok(task.clone())
    }

    async fn open_segment(
        &self,
        task: &Task,
        segment: RunSegment,
        _room: Option<&RoomId>,
    ) -> Result<(), LifecycleError> {
        let mut row = task.clone();
        row.status = TaskStatus::InProgress;
        row.time_spent = segment.base_seconds;
        row.last_active = segment.start_time;
        self.cache.add_task(&row).await?;
        Ok(())
    }

    async fn pause_stray(
        &self,
        keep: TaskId,
        now: EpochMillis,
    ) -> Result<Vec<TaskId>, LifecycleError> {
        let mut tasks = self.cache.get_tasks().await?;
        let mut paused = Vec::new();
        for task in tasks
            .iter_mut()
            .filter(|t| t.id != keep && t.status == TaskStatus::InProgress)
        {
            Self::close_row(task, now);
            paused.push(task.id);
        }
        if !paused.is_empty() {
            self.cache.save_tasks(&tasks).await?;
        }
        Ok(paused)
    }

    async fn snapshot(
        &self,
        _task_id: TaskId,
        _elapsed: u64,
        _now: EpochMillis,
    ) -> Result<(), LifecycleError> {
        Ok(())
    }

    async fn heartbeat(
        &self,
        _task_id: TaskId,
        _segment: RunSegment,
        _now: EpochMillis,
    ) -> Result<(), LifecycleError> {
        Ok(())
    }

    async fn close_segment(
        &self,
        task: &Task,
        elapsed: u64,
        now: EpochMillis,
    ) -> Result<bool, LifecycleError> {
        let Some(mut row) = self.find(task.id).await? else {
            return Ok(false);
        };
        let computed = Self::row_elapsed(&row, now);
        row.status = TaskStatus::Paused;
        row.time_spent = computed.max(elapsed);
        row.last_active = now;
        self.cache.update_task(&row).await?;
        Ok(true)
    }

    async fn buffered_elapsed(
        &self,
        task_id: TaskId,
        now: EpochMillis,
    ) -> Result<Option<u64>, LifecycleError> {
        Ok(self
            .find(task_id)
            .await?
            .filter(|t| t.status.is_open())
            .map(|t| Self::row_elapsed(&t, now)))
    }

    async fn finalize(&self, task: &Task, patch: &TaskPatch) -> Result<(), LifecycleError> {
        let row = Self::apply_patch(task, patch, task.last_active);
        self.cache.add_task(&row).await?;
        Ok(())
    }

    async fn discard(&self, task: &Task, patch: &TaskPatch) -> Result<(), LifecycleError> {
        let row = Self::apply_patch(task, patch, task.last_active);
        self.cache.add_task(&row).await?;
        Ok(())
    }

    async fn recover(&self, now: EpochMillis) -> Result<Option<RecoveredTask>, LifecycleError> {
        let tasks = self.cache.get_tasks().await?;
        let Some(mut task) = tasks
            .into_iter()
            .filter(|t| {
                t.status.is_open() && (t.time_spent > 0 || t.status == TaskStatus::InProgress)
            })
            .max_by_key(|t| t.last_active)
        else {
            return Ok(None);
        };

        let closed_segment = task.status == TaskStatus::InProgress;
        if closed_segment {
            Self::close_row(&mut task, now);
            self.cache.update_task(&task).await?;
        }
        Ok(Some(RecoveredTask {
            buffer: TaskBuffer::from_task(&task, None),
            closed_segment,
            source: RecoverySource::Scan,
        }))
    }

    async fn load_preferences(&self) -> Result<Preferences, LifecycleError> {
        Ok(self.preferences.lock().await.clone())
    }

    async fn save_preferences(
        &self,
        patch: &PreferencesPatch,
    ) -> Result<Preferences, LifecycleError> {
        let mut prefs = self.preferences.lock().await;
        prefs.apply(patch);
        Ok(prefs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskName;
    use crate::impls::{InMemoryDurableStore, InMemoryEphemeralStore, InMemoryTaskCache};
    use crate::ports::ephemeral_store::read_as;
    use crate::ports::{Clock, FixedClock};
    use ulid::Ulid;

    const T0: EpochMillis = 1_700_000_000_000;

    fn task(name: &str) -> Task {
        Task::new(
            TaskId::from_ulid(Ulid::new()),
            UserId::new("local-1"),
            TaskName::parse(name).unwrap(),
            T0,
        )
    }

    fn ledger() -> (Arc<InMemoryTaskCache>, GuestLedger) {
        let cache = Arc::new(InMemoryTaskCache::new());
        (cache.clone(), GuestLedger::new(cache))
    }

    #[tokio::test]
    async fn open_row_recovers_with_the_gap() {
        let (_, ledger) = ledger();
        let t = task("Read paper");
        ledger.create_task(&t).await.unwrap();
        ledger
            .open_segment(&t, RunSegment::new(T0, 30), None)
            .await
            .unwrap();

        let recovered = ledger.recover(T0 + 90_000).await.unwrap().unwrap();
        assert!(recovered.closed_segment);
        assert_eq!(recovered.buffer.time_spent, 120);
        assert_eq!(recovered.buffer.status, TaskStatus::Paused);
        assert_eq!(
            ledger.buffered_elapsed(t.id, T0 + 500_000).await.unwrap(),
            Some(120)
        );
    }

    #[tokio::test]
    async fn pause_stray_closes_other_rows() {
        let (cache, ledger) = ledger();
        let a = task("a");
        let b = task("b");
        ledger
            .open_segment(&a, RunSegment::new(T0, 0), None)
            .await
            .unwrap();
        ledger.create_task(&b).await.unwrap();

        let paused = ledger.pause_stray(b.id, T0 + 10_000).await.unwrap();
        assert_eq!(paused, vec![a.id]);
        let rows = cache.get_tasks().await.unwrap();
        let a_row = rows.iter().find(|t| t.id == a.id).unwrap();
        assert_eq!((a_row.status, a_row.time_spent), (TaskStatus::Paused, 10));
    }

    #[tokio::test]
    async fn close_segment_on_missing_row_is_false() {
        let (_, ledger) = ledger();
        assert!(!ledger.close_segment(&task("x"), 5, T0).await.unwrap());
    }

    #[tokio::test]
    async fn migration_moves_everything_and_clears_the_cache() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::from_millis(T0));
        let durable = InMemoryDurableStore::new(clock.clone());
        let ephemeral = InMemoryEphemeralStore::new(clock.clone());
        let (cache, ledger) = ledger();

        let mut done = task("done");
        done.mark_started(T0).unwrap();
        done.mark_completed(600, T0 + 600_000).unwrap();
        let mut open = task("open");
        open.mark_started(T0).unwrap();
        open.mark_paused(42, T0 + 42_000).unwrap();
        let fresh = task("fresh");
        cache.save_tasks(&[done.clone(), open.clone(), fresh]).await.unwrap();

        let user = UserId::new("u1");
        let report = ledger
            .migrate(&durable, &ephemeral, &user, "Ann", T0 + 100_000)
            .await
            .unwrap();
        assert_eq!(
            report,
            MigrationReport {
                migrated: 3,
                completed: 1,
                buffered: 1
            }
        );
        assert!(cache.get_tasks().await.unwrap().is_empty());

        let stored = durable.task(done.id).await.unwrap();
        assert_eq!((stored.status, stored.time_spent), (TaskStatus::Completed, 600));
        assert_eq!(stored.user_id, user);
        let history = durable.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(
            (history[0].task_id, history[0].duration_secs, history[0].display_name.as_str()),
            (done.id, 600, "Ann")
        );

        let buffer: TaskBuffer = read_as(&ephemeral, &paths::task_buffer(&user, open.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buffer.time_spent, 42);
    }

    #[tokio::test]
    async fn retried_migration_does_not_repeat_history() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::from_millis(T0));
        let durable = InMemoryDurableStore::new(clock.clone());
        let ephemeral = InMemoryEphemeralStore::new(clock);
        let (cache, ledger) = ledger();
        let user = UserId::new("u1");

        let mut done = task("done");
        done.mark_started(T0).unwrap();
        done.mark_completed(120, T0 + 120_000).unwrap();
        cache.save_tasks(std::slice::from_ref(&done)).await.unwrap();

        // an earlier attempt got this far before failing
        durable.create_task(done.id, &done.name, &user).await.unwrap();
        let patch = TaskPatch {
            status: TaskStatus::Completed,
            duration: 120,
            completed_at: done.completed_at,
        };
        durable.patch_task(done.id, &patch).await.unwrap();
        let entry = HistoryEntry {
            task_id: done.id,
            user_id: user.clone(),
            display_name: "Ann".into(),
            task_name: "done".into(),
            duration_secs: 120,
            completed_at: T0 + 120_000,
        };
        durable.append_history(&entry).await.unwrap();

        let report = ledger
            .migrate(&durable, &ephemeral, &user, "Ann", T0 + 200_000)
            .await
            .unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(durable.history().await.len(), 1);
        assert!(cache.get_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_migration_keeps_the_cache() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::from_millis(T0));
        let durable = InMemoryDurableStore::new(clock.clone());
        let ephemeral = InMemoryEphemeralStore::new(clock);
        let (cache, ledger) = ledger();
        ledger.create_task(&task("keep me")).await.unwrap();
        durable.set_unavailable(true).await;

        let err = ledger
            .migrate(&durable, &ephemeral, &UserId::new("u1"), "Ann", T0)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::DurableWrite { .. }));
        assert_eq!(cache.get_tasks().await.unwrap().len(), 1);
    }
}
