//! RemoteLedger - ephemeral buffer と正本の突き合わせ
//!
//! # フロー
//! - start/pause/snapshot: `users/{uid}/...` への best-effort 書き込み
//! - complete/quit: 正本の patch → 成功したらバッファを掃除
//! - restore: last_task ポインタ優先、無ければ全バッファを走査

use std::sync::Arc;

use async_trait::async_trait;

use super::{RecoveredTask, RecoverySource, TaskLedger};
use crate::app::paths;
use crate::domain::{
    EpochMillis, Heartbeat, LastTaskPointer, LifecycleError, Preferences, PreferencesPatch,
    RoomId, RunSegment, StoreError, Task, TaskBuffer, TaskId, TaskPatch, TaskStatus,
    TimerStateRecord, UserId,
};
use crate::ports::ephemeral_store::{fields, read_as, read_children, write_as};
use crate::ports::{DurableStore, EphemeralStore, StorePath};

/// Independent writes: every one is attempted, the first failure is reported.
#[derive(Default)]
struct Writes {
    first_error: Option<StoreError>,
}

impl Writes {
    fn note(&mut self, what: &'static str, result: Result<(), StoreError>) {
        if let Err(e) = result {
            tracing::debug!(write = what, error = %e, "ephemeral write failed");
            self.first_error.get_or_insert(e);
        }
    }

    fn finish(self) -> Result<(), LifecycleError> {
        match self.first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

pub struct RemoteLedger {
    user: UserId,
    ephemeral: Arc<dyn EphemeralStore>,
    durable: Arc<dyn DurableStore>,
    /// Caps how far a crashed tab's open segment may run past its last heartbeat.
    staleness_ms: i64,
}

impl RemoteLedger {
    pub fn new(
        user: UserId,
        ephemeral: Arc<dyn EphemeralStore>,
        durable: Arc<dyn DurableStore>,
        staleness_ms: i64,
    ) -> Self {
        Self {
            user,
            ephemeral,
            durable,
            staleness_ms,
        }
    }

    fn store(&self) -> &dyn EphemeralStore {
        self.ephemeral.as_ref()
    }

    async fn read_buffer(&self, task_id: TaskId) -> Result<Option<TaskBuffer>, StoreError> {
        read_as(self.store(), &paths::task_buffer(&self.user, task_id)).await
    }

    async fn write_buffer(&self, buffer: &TaskBuffer) -> Result<(), StoreError> {
        write_as(
            self.store(),
            &paths::task_buffer(&self.user, buffer.task_id),
            buffer,
        )
        .await
    }

    async fn write_pointer(&self, task_id: TaskId, now: EpochMillis) -> Result<(), StoreError> {
        let pointer = LastTaskPointer {
            task_id,
            updated_at: now,
        };
        write_as(self.store(), &paths::last_task(&self.user), &pointer).await
    }

    /// Write the records that describe a paused task.
    async fn write_paused(&self, buffer: &TaskBuffer, now: EpochMillis, writes: &mut Writes) {
        writes.note("task_buffer", self.write_buffer(buffer).await);
        let state = TimerStateRecord::paused(buffer.task_id, buffer.time_spent);
        writes.note(
            "timer_state",
            write_as(self.store(), &paths::timer_state(&self.user), &state).await,
        );
        let heartbeat = Heartbeat {
            task_id: buffer.task_id,
            start_time: buffer.last_active,
            last_seen: now,
            is_running: false,
        };
        writes.note(
            "heartbeat",
            write_as(self.store(), &paths::heartbeat(&self.user), &heartbeat).await,
        );
        writes.note("last_task", self.write_pointer(buffer.task_id, now).await);
    }

    /// Delete `path` if the record stored there refers to `task_id`.
    async fn delete_if_refers<T>(
        &self,
        path: &StorePath,
        task_id: TaskId,
        refers: impl Fn(&T) -> TaskId + Send,
    ) -> Result<(), StoreError>
    where
        T: serde::de::DeserializeOwned + Send,
    {
        let stored: Option<T> = match read_as(self.store(), path).await {
            Ok(v) => v,
            // unreadable record: nobody can use it anyway
            Err(StoreError::Decode { .. }) => return self.store().delete(path).await,
            Err(e) => return Err(e),
        };
        match stored {
            Some(record) if refers(&record) == task_id => self.store().delete(path).await,
            _ => Ok(()),
        }
    }

    /// Remove a finished task's whole ephemeral footprint. Each deletion is independent.
    async fn purge(&self, task_id: TaskId) -> Writes {
        let mut writes = Writes::default();
        writes.note(
            "task_buffer",
            self.store()
                .delete(&paths::task_buffer(&self.user, task_id))
                .await,
        );
        writes.note(
            "timer_state",
            self.delete_if_refers(&paths::timer_state(&self.user), task_id, |s: &TimerStateRecord| {
                s.task_id
            })
            .await,
        );
        writes.note(
            "heartbeat",
            self.delete_if_refers(&paths::heartbeat(&self.user), task_id, |h: &Heartbeat| {
                h.task_id
            })
            .await,
        );
        writes.note(
            "last_task",
            self.delete_if_refers(&paths::last_task(&self.user), task_id, |p: &LastTaskPointer| {
                p.task_id
            })
            .await,
        );

        match self.store().read(&paths::user_tasks(&self.user)).await {
            Ok(None) => writes.note(
                "user_root",
                self.store().delete(&paths::user_root(&self.user)).await,
            ),
            Ok(Some(_)) => {}
            Err(e) => writes.note("user_root", Err(e)),
        }
        writes
    }

    /// Pointer first, then a scan of every buffered task.
    async fn find_recoverable(&self) -> Result<Option<(TaskBuffer, RecoverySource)>, StoreError> {
        match read_as::<LastTaskPointer>(self.store(), &paths::last_task(&self.user)).await {
            Ok(Some(pointer)) => match self.read_buffer(pointer.task_id).await {
                Ok(Some(buffer)) if buffer.status.is_open() => {
                    return Ok(Some((buffer, RecoverySource::Pointer)));
                }
                Ok(_) => {
                    tracing::debug!(task_id = %pointer.task_id, "last task pointer is stale");
                }
                Err(e) => {
                    tracing::warn!(task_id = %pointer.task_id, error = %e, "pointed task unreadable, scanning");
                }
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "last task pointer unreadable, scanning"),
        }

        let buffers: Vec<(String, TaskBuffer)> =
            read_children(self.store(), &paths::user_tasks(&self.user)).await?;
        Ok(buffers
            .into_iter()
            .map(|(_, b)| b)
            .filter(TaskBuffer::is_recoverable)
            .max_by_key(|b| b.last_active)
            .map(|b| (b, RecoverySource::Scan)))
    }

    /// End of an unclosed segment: now, but no later than the heartbeat allows.
    async fn segment_end(&self, task_id: TaskId, now: EpochMillis) -> EpochMillis {
        match read_as::<Heartbeat>(self.store(), &paths::heartbeat(&self.user)).await {
            Ok(Some(hb)) if hb.task_id == task_id => {
                now.min(hb.last_seen.saturating_add(self.staleness_ms))
            }
            Ok(_) => now,
            Err(e) => {
                tracing::debug!(error = %e, "heartbeat unreadable, closing segment at now");
                now
            }
        }
    }
}

#[async_trait]
impl TaskLedger for RemoteLedger {
    async fn list_tasks(&self) -> Result<Vec<Task>, LifecycleError> {
        self.durable
            .list_tasks(&self.user)
            .await
            .map_err(LifecycleError::Durable)
    }

    async fn create_task(&self, task: &Task) -> Result<Task, LifecycleError> {
        self.durable
            .create_task(task.id, &task.name, &self.user)
            .await
            .map_err(|e| LifecycleError::durable(task.id, e))
    }

    async fn open_segment(
        &self,
        task: &Task,
        segment: RunSegment,
        room: Option<&RoomId>,
    ) -> Result<(), LifecycleError> {
        let mut buffer = self
            .read_buffer(task.id)
            .await?
            .unwrap_or_else(|| TaskBuffer::from_task(task, room.cloned()));
        buffer.name = task.name.as_str().to_string();
        buffer.status = TaskStatus::InProgress;
        buffer.time_spent = buffer.time_spent.max(segment.base_seconds);
        buffer.segment = Some(segment);
        buffer.last_active = segment.start_time;
        if let Some(room) = room {
            buffer.room_id = Some(room.clone());
        }

        let mut writes = Writes::default();
        writes.note("task_buffer", self.write_buffer(&buffer).await);
        writes.note(
            "timer_state",
            write_as(
                self.store(),
                &paths::timer_state(&self.user),
                &TimerStateRecord::running(task.id, segment),
            )
            .await,
        );
        let heartbeat = Heartbeat {
            task_id: task.id,
            start_time: segment.start_time,
            last_seen: segment.start_time,
            is_running: true,
        };
        writes.note(
            "heartbeat",
            write_as(self.store(), &paths::heartbeat(&self.user), &heartbeat).await,
        );
        writes.note(
            "last_task",
            self.write_pointer(task.id, segment.start_time).await,
        );
        writes.finish()
    }

    async fn pause_stray(
        &self,
        keep: TaskId,
        now: EpochMillis,
    ) -> Result<Vec<TaskId>, LifecycleError> {
        let buffers: Vec<(String, TaskBuffer)> =
            read_children(self.store(), &paths::user_tasks(&self.user)).await?;
        let mut paused = Vec::new();
        let mut writes = Writes::default();
        for (_, mut buffer) in buffers {
            if buffer.task_id == keep || buffer.status != TaskStatus::InProgress {
                continue;
            }
            buffer.close_segment(now);
            writes.note("task_buffer", self.write_buffer(&buffer).await);
            tracing::info!(task_id = %buffer.task_id, elapsed = buffer.time_spent, "paused task left running elsewhere");
            paused.push(buffer.task_id);
        }
        writes.finish()?;
        Ok(paused)
    }

    async fn snapshot(
        &self,
        task_id: TaskId,
        elapsed: u64,
        now: EpochMillis,
    ) -> Result<(), LifecycleError> {
        // a missing buffer was removed elsewhere; do not resurrect it
        let Some(buffer) = self.read_buffer(task_id).await? else {
            return Ok(());
        };
        if elapsed <= buffer.time_spent {
            return Ok(());
        }
        let path = paths::task_buffer(&self.user, task_id);
        self.store()
            .update(
                &path,
                fields(serde_json::json!({ "time_spent": elapsed, "last_active": now })),
            )
            .await?;
        Ok(())
    }

    async fn heartbeat(
        &self,
        task_id: TaskId,
        segment: RunSegment,
        now: EpochMillis,
    ) -> Result<(), LifecycleError> {
        let heartbeat = Heartbeat {
            task_id,
            start_time: segment.start_time,
            last_seen: now,
            is_running: true,
        };
        write_as(self.store(), &paths::heartbeat(&self.user), &heartbeat).await?;
        Ok(())
    }

    async fn close_segment(
        &self,
        task: &Task,
        elapsed: u64,
        now: EpochMillis,
    ) -> Result<bool, LifecycleError> {
        let Some(mut buffer) = self.read_buffer(task.id).await? else {
            return Ok(false);
        };
        buffer.segment = None;
        buffer.status = TaskStatus::Paused;
        buffer.time_spent = buffer.time_spent.max(elapsed);
        buffer.last_active = now;

        let mut writes = Writes::default();
        self.write_paused(&buffer, now, &mut writes).await;
        writes.finish()?;
        Ok(true)
    }

    async fn buffered_elapsed(
        &self,
        task_id: TaskId,
        now: EpochMillis,
    ) -> Result<Option<u64>, LifecycleError> {
        Ok(self
            .read_buffer(task_id)
            .await?
            .map(|buffer| buffer.elapsed_at(now)))
    }

    async fn finalize(&self, task: &Task, patch: &TaskPatch) -> Result<(), LifecycleError> {
        self.durable
            .patch_task(task.id, patch)
            .await
            .map_err(|e| LifecycleError::durable(task.id, e))?;
        if let Err(e) = self.purge(task.id).await.finish() {
            // the durable row is final; leftovers are swept with the user root later
            tracing::warn!(task_id = %task.id, error = %e, "ephemeral purge after completion was partial");
        }
        Ok(())
    }

    async fn discard(&self, task: &Task, patch: &TaskPatch) -> Result<(), LifecycleError> {
        self.durable
            .patch_task(task.id, patch)
            .await
            .map_err(|e| LifecycleError::durable(task.id, e))?;
        if let Err(e) = self.purge(task.id).await.finish() {
            tracing::warn!(task_id = %task.id, error = %e, "ephemeral purge after quit was partial");
        }
        Ok(())
    }

    async fn recover(&self, now: EpochMillis) -> Result<Option<RecoveredTask>, LifecycleError> {
        let Some((mut buffer, source)) = self.find_recoverable().await? else {
            return Ok(None);
        };

        let was_running = buffer.status == TaskStatus::InProgress || buffer.segment.is_some();
        let end = match buffer.segment {
            Some(_) => self.segment_end(buffer.task_id, now).await,
            None => now,
        };
        let closed_segment = buffer.close_segment(end);

        if was_running {
            let mut writes = Writes::default();
            self.write_paused(&buffer, now, &mut writes).await;
            if let Err(e) = writes.finish() {
                tracing::warn!(task_id = %buffer.task_id, error = %e, "could not persist recovered segment");
            }
        } else if let Err(e) = self.write_pointer(buffer.task_id, now).await {
            tracing::debug!(task_id = %buffer.task_id, error = %e, "could not refresh last task pointer");
        }

        tracing::info!(
            task_id = %buffer.task_id,
            elapsed = buffer.time_spent,
            closed_segment,
            ?source,
            "restored task"
        );
        Ok(Some(RecoveredTask {
            buffer,
            closed_segment,
            source,
        }))
    }

    async fn load_preferences(&self) -> Result<Preferences, LifecycleError> {
        self.durable
            .fetch_preferences(&self.user)
            .await
            .map_err(LifecycleError::Durable)
    }

    async fn save_preferences(
        &self,
        patch: &PreferencesPatch,
    ) -> Result<Preferences, LifecycleError> {
        self.durable
            .update_preferences(&self.user, patch)
            .await
            .map_err(LifecycleError::Durable)
    }
}
