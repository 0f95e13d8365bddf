//! TaskCoordinator - タスクのライフサイクル（状態機械）
//!
//! ```text
//! not_started -> in_progress <-> paused -> completed
//!                      \            /
//!                       +-> quit --+-> not_started (time_spent = 0)
//! ```
//!
//! # 設計原則
//! - 1 クライアント内の操作は `state` の Mutex で直列化（start は前の pause を await する）
//! - 楽観的更新 → 永続化 → 失敗したら補償（巻き戻し）を同じ関数内に置く
//! - tick / heartbeat 系は fire-and-forget（ログのみ、エラーを返さない）
//! - complete / quit / start の失敗は呼び出し元へ返す

use std::sync::Arc;

use tokio::sync::Mutex;

use super::broadcast::RoomBroadcaster;
use super::leaderboard::LeaderboardCache;
use super::ledger::TaskLedger;
use super::presence::PresenceTracker;
use crate::domain::{
    AutoPauseReason, ClientCue, EpochMillis, HistoryEntry, LifecycleError, Preferences,
    PreferencesPatch, RoomEventKind, RoomId, Session, Task, TaskId, TaskName, TaskPatch,
    TaskStatus, TimerMode, ValidationError,
};
use crate::ports::{Clock, CueSink, IdGenerator};
use crate::timer::{
    DriftCorrection, DurationEdit, EngineSettings, InactivityMonitor, InactivityState,
    TickOutcome, TimerEngine, clamp_minutes,
};

/// Minimum tracked seconds before a task can be completed.
pub const MIN_COMPLETE_SECS: u64 = 1;

/// What the timer panel shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerView {
    pub task_id: Option<TaskId>,
    pub task_name: Option<String>,
    pub status: Option<TaskStatus>,
    pub running: bool,
    pub mode: TimerMode,
    pub elapsed: u64,
    pub remaining: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTask {
    pub task_id: TaskId,
    pub duration_secs: u64,
}

/// Everything a coordinator talks to. Guests get `None` for the room-facing parts.
pub struct CoordinatorParts {
    pub session: Session,
    pub room: Option<RoomId>,
    pub ledger: Arc<dyn TaskLedger>,
    pub presence: Option<Arc<PresenceTracker>>,
    pub broadcaster: Option<Arc<RoomBroadcaster>>,
    pub leaderboard: Option<Arc<LeaderboardCache>>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub cues: Arc<dyn CueSink>,
    pub engine_settings: EngineSettings,
    pub heartbeat_interval_ms: i64,
}

struct CoordinatorState {
    tasks: Vec<Task>,
    selected: Option<TaskId>,
    /// Task the engine is bound to.
    active: Option<TaskId>,
    engine: TimerEngine,
    preferences: Preferences,
    inactivity: Option<InactivityMonitor>,
    prompt_open: bool,
    last_heartbeat: EpochMillis,
}

impl CoordinatorState {
    fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    fn task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    fn fresh_engine(&self, elapsed: u64, settings: EngineSettings) -> TimerEngine {
        TimerEngine::new(
            self.preferences.timer_mode,
            self.preferences.countdown_minutes,
            elapsed,
            settings,
        )
    }

    /// Which task `start(name)` refers to: the selected task if its name matches,
    /// then a not-started task of that name.
    fn resolve(&self, name: &TaskName) -> Option<TaskId> {
        let selected = self
            .selected
            .and_then(|id| self.task(id))
            .filter(|t| t.name == *name && t.status != TaskStatus::Completed);
        selected
            .or_else(|| {
                self.tasks
                    .iter()
                    .find(|t| t.status == TaskStatus::NotStarted && t.name == *name)
            })
            .map(|t| t.id)
    }
}

pub struct TaskCoordinator {
    session: Session,
    room: Option<RoomId>,
    ledger: Arc<dyn TaskLedger>,
    presence: Option<Arc<PresenceTracker>>,
    broadcaster: Option<Arc<RoomBroadcaster>>,
    leaderboard: Option<Arc<LeaderboardCache>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    cues: Arc<dyn CueSink>,
    engine_settings: EngineSettings,
    heartbeat_interval_ms: i64,
    state: Mutex<CoordinatorState>,
}

impl TaskCoordinator {
    pub fn new(parts: CoordinatorParts) -> Self {
        let preferences = Preferences::default();
        let engine = TimerEngine::new(
            preferences.timer_mode,
            preferences.countdown_minutes,
            0,
            parts.engine_settings,
        );
        let now = parts.clock.now_millis();
        Self {
            session: parts.session,
            room: parts.room,
            ledger: parts.ledger,
            presence: parts.presence,
            broadcaster: parts.broadcaster,
            leaderboard: parts.leaderboard,
            clock: parts.clock,
            ids: parts.ids,
            cues: parts.cues,
            engine_settings: parts.engine_settings,
            heartbeat_interval_ms: parts.heartbeat_interval_ms,
            state: Mutex::new(CoordinatorState {
                tasks: Vec::new(),
                selected: None,
                active: None,
                engine,
                preferences,
                inactivity: None,
                prompt_open: false,
                last_heartbeat: now,
            }),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    /// Load tasks and preferences, then restore the last active task.
    pub async fn initialize(&self) -> Result<TimerView, LifecycleError> {
        let tasks = self.ledger.list_tasks().await?;
        let preferences = match self.ledger.load_preferences().await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "preferences unavailable, using defaults");
                Preferences::default()
            }
        };
        {
            let mut state = self.state.lock().await;
            state.tasks = tasks;
            state.preferences = preferences;
            state.engine = state.fresh_engine(0, self.engine_settings);
        }
        self.restore().await
    }

    // ------------------------------------------------------------------
    // start / resume
    // ------------------------------------------------------------------

    /// Start (or resume) the task called `name`.
    pub async fn start(&self, name: &str) -> Result<TimerView, LifecycleError> {
        let name = TaskName::parse(name)?;
        let mut state = self.state.lock().await;
        let existing = state.resolve(&name);

        if existing.is_some() && existing == state.active && state.engine.is_running() {
            return Ok(self.view_of(&state));
        }

        // one active task: pause the running one first, and wait for it
        if state.engine.is_running() {
            let now = self.clock.now_millis();
            self.pause_locked(&mut state, now).await;
        }

        let now = self.clock.now_millis();
        let task_id = match existing {
            Some(id) => id,
            None => self.create_task(&mut state, name, now).await?,
        };

        match self.ledger.pause_stray(task_id, now).await {
            Ok(paused) if !paused.is_empty() => {
                tracing::info!(count = paused.len(), "paused tasks running on other devices");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "could not pause tasks on other devices"),
        }

        let buffered = match self.ledger.buffered_elapsed(task_id, now).await {
            Ok(v) => v.unwrap_or(0),
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "buffered time unreadable");
                0
            }
        };
        let known = state.task(task_id).map_or(0, |t| t.time_spent);
        let bound = if state.active == Some(task_id) {
            state.engine.elapsed()
        } else {
            0
        };
        let base = known.max(bound).max(buffered);
        if state.active != Some(task_id) || base != bound {
            state.engine = state.fresh_engine(base, self.engine_settings);
        }

        let segment = match state.engine.start(now) {
            Ok(segment) => segment,
            Err(e) => {
                tracing::debug!(error = %e, "engine already running");
                return Ok(self.view_of(&state));
            }
        };
        let Some(task) = state.task_mut(task_id) else {
            return Err(ValidationError::NoTask.into());
        };
        if task.status != TaskStatus::InProgress {
            task.mark_started(now)?;
        }
        task.record_elapsed(base);
        let task = task.clone();

        state.active = Some(task_id);
        state.selected = Some(task_id);
        state.inactivity = Some(InactivityMonitor::new(
            state.preferences.inactivity_timeout_minutes(),
            now,
        ));
        state.prompt_open = false;
        state.last_heartbeat = now;

        if let Err(e) = self
            .ledger
            .open_segment(&task, segment, self.room.as_ref())
            .await
        {
            tracing::warn!(task_id = %task_id, error = %e, "start not buffered, continuing");
        }
        self.mark_presence(true).await;
        self.announce_start(&task).await;

        tracing::info!(task_id = %task_id, base_seconds = base, "task started");
        Ok(self.view_of(&state))
    }

    /// Optimistically create a new task, compensating if the store refuses it.
    async fn create_task(
        &self,
        state: &mut CoordinatorState,
        name: TaskName,
        now: EpochMillis,
    ) -> Result<TaskId, LifecycleError> {
        let id = self.ids.generate_task_id();
        let task = Task::new(id, self.session.user_id().clone(), name, now);
        state.tasks.push(task.clone());
        match self.ledger.create_task(&task).await {
            Ok(stored) => {
                if let Some(t) = state.task_mut(id) {
                    t.created_at = stored.created_at;
                }
                Ok(id)
            }
            Err(e) => {
                state.tasks.retain(|t| t.id != id);
                tracing::error!(task_id = %id, error = %e, "task creation failed");
                Err(e)
            }
        }
    }

    /// Resume the selected task.
    pub async fn resume(&self) -> Result<TimerView, LifecycleError> {
        let name = {
            let state = self.state.lock().await;
            state
                .selected
                .and_then(|id| state.task(id))
                .filter(|t| t.status.is_open() || t.status == TaskStatus::NotStarted)
                .map(|t| t.name.as_str().to_string())
        };
        match name {
            Some(name) => self.start(&name).await,
            None => Err(ValidationError::NoTask.into()),
        }
    }

    // ------------------------------------------------------------------
    // pause
    // ------------------------------------------------------------------

    /// Pause the running timer. A no-op when nothing runs.
    pub async fn pause(&self) -> Result<TimerView, LifecycleError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now_millis();
        self.pause_locked(&mut state, now).await;
        Ok(self.view_of(&state))
    }

    /// Returns the elapsed total, or `None` when nothing was running.
    async fn pause_locked(&self, state: &mut CoordinatorState, now: EpochMillis) -> Option<u64> {
        if !state.engine.is_running() {
            return None;
        }
        let elapsed = state.engine.pause(now);
        self.settle_pause(state, elapsed, now).await;
        Some(elapsed)
    }

    /// Bookkeeping once the engine has stopped: local task, buffer, presence.
    async fn settle_pause(&self, state: &mut CoordinatorState, elapsed: u64, now: EpochMillis) {
        state.inactivity = None;
        state.prompt_open = false;
        let Some(task_id) = state.active else {
            return;
        };
        let Some(task) = state.task_mut(task_id) else {
            return;
        };
        if task.status == TaskStatus::InProgress {
            if let Err(e) = task.mark_paused(elapsed, now) {
                tracing::debug!(task_id = %task_id, error = %e, "local pause transition skipped");
            }
        } else {
            task.record_elapsed(elapsed);
        }
        let task = task.clone();

        match self.ledger.close_segment(&task, elapsed, now).await {
            Ok(true) => {}
            // removed by a quit or complete on another device
            Ok(false) => tracing::debug!(task_id = %task_id, "buffer already gone, pause is local only"),
            Err(e) => tracing::warn!(task_id = %task_id, error = %e, "pause not buffered"),
        }
        self.mark_presence(false).await;
        tracing::info!(task_id = %task_id, elapsed, "task paused");
    }

    /// Pause on the coordinator's own initiative. Returns false when nothing ran.
    pub async fn auto_pause(&self, reason: AutoPauseReason) -> bool {
        let mut state = self.state.lock().await;
        let now = self.clock.now_millis();
        let Some(task_id) = state.active else {
            return false;
        };
        if self.pause_locked(&mut state, now).await.is_none() {
            return false;
        }
        tracing::info!(task_id = %task_id, ?reason, "timer auto-paused");
        self.cues.emit(ClientCue::AutoPaused { task_id, reason });
        true
    }

    /// Cross-room exclusivity: yield if this user became active in another room.
    pub async fn enforce_exclusivity(&self) -> Option<RoomId> {
        let presence = self.presence.as_ref()?;
        match presence.active_elsewhere().await {
            Ok(Some(room)) => self
                .auto_pause(AutoPauseReason::ActiveElsewhere(room.clone()))
                .await
                .then_some(room),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(error = %e, "presence unreadable, exclusivity check skipped");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // complete / quit
    // ------------------------------------------------------------------

    /// Finish the current task. `explicit_duration` wins over the computed one.
    pub async fn complete(
        &self,
        explicit_duration: Option<u64>,
    ) -> Result<CompletedTask, LifecycleError> {
        let mut state = self.state.lock().await;
        let task_id = state
            .active
            .or(state.selected)
            .ok_or(ValidationError::NoTask)?;
        let Some(task) = state.task(task_id) else {
            return Err(ValidationError::NoTask.into());
        };
        if task.status == TaskStatus::Completed {
            return Err(LifecycleError::AlreadyCompleted(task_id));
        }

        let now = self.clock.now_millis();
        let bound = state.active == Some(task_id);
        let local = if bound {
            state.engine.expected(now).max(task.time_spent)
        } else {
            task.time_spent
        };
        if explicit_duration.unwrap_or(local) < MIN_COMPLETE_SECS {
            return Err(ValidationError::InsufficientTime {
                min: MIN_COMPLETE_SECS,
            }
            .into());
        }

        if bound {
            self.pause_locked(&mut state, now).await;
        }

        // a record that is already gone was finished on another device
        let Some(buffered) = self.ledger.buffered_elapsed(task_id, now).await? else {
            let status = self.adopt_finished_elsewhere(&mut state, task_id).await;
            tracing::info!(task_id = %task_id, ?status, "task already finished elsewhere");
            return Err(LifecycleError::AlreadyCompleted(task_id));
        };
        let computed = if bound {
            state.engine.elapsed().max(buffered)
        } else {
            local.max(buffered)
        };
        let duration = explicit_duration.unwrap_or(computed);
        if duration < MIN_COMPLETE_SECS {
            return Err(ValidationError::InsufficientTime {
                min: MIN_COMPLETE_SECS,
            }
            .into());
        }

        let Some(task) = state.task_mut(task_id) else {
            return Err(ValidationError::NoTask.into());
        };
        let before = task.clone();
        task.mark_completed(duration, now)?;
        let patch = TaskPatch {
            status: TaskStatus::Completed,
            duration,
            completed_at: Some(now),
        };

        if let Err(e) = self.ledger.finalize(&before, &patch).await {
            // compensate: the task is not complete
            if let Some(t) = state.task_mut(task_id) {
                *t = before;
            }
            tracing::error!(task_id = %task_id, error = %e, "completion handoff failed");
            return Err(e);
        }

        let task_name = before.name.as_str().to_string();
        state.active = None;
        state.selected = None;
        state.engine = state.fresh_engine(0, self.engine_settings);
        drop(state);

        tracing::info!(task_id = %task_id, duration, "task completed");
        self.cues.emit(ClientCue::TaskCompleted {
            task_id,
            duration_secs: duration,
        });
        self.announce_finish(RoomEventKind::Completed, &task_name, duration)
            .await;
        if let Some(board) = &self.leaderboard {
            let entry = HistoryEntry {
                task_id,
                user_id: self.session.user_id().clone(),
                display_name: self.session.display_name().to_string(),
                task_name,
                duration_secs: duration,
                completed_at: now,
            };
            board.record_completion(&entry).await;
        }

        Ok(CompletedTask {
            task_id,
            duration_secs: duration,
        })
    }

    /// Throw away the current task's time. Calling it again is a no-op.
    pub async fn quit(&self) -> Result<(), LifecycleError> {
        let mut state = self.state.lock().await;
        let Some(task_id) = state.active.or(state.selected) else {
            return Ok(());
        };
        let Some(task) = state.task(task_id) else {
            return Ok(());
        };
        match task.status {
            TaskStatus::NotStarted | TaskStatus::Quit => return Ok(()),
            TaskStatus::Completed => return Err(LifecycleError::AlreadyCompleted(task_id)),
            TaskStatus::InProgress | TaskStatus::Paused => {}
        }

        let now = self.clock.now_millis();
        if state.active == Some(task_id) {
            self.pause_locked(&mut state, now).await;
        }
        let Some(task) = state.task(task_id).cloned() else {
            return Ok(());
        };

        // never reset a row another device already finalized
        if self.ledger.buffered_elapsed(task_id, now).await?.is_none() {
            let status = self.adopt_finished_elsewhere(&mut state, task_id).await;
            tracing::info!(task_id = %task_id, ?status, "task already finished elsewhere, quit is local only");
            return match status {
                Some(TaskStatus::NotStarted | TaskStatus::Quit) => Ok(()),
                _ => Err(LifecycleError::AlreadyCompleted(task_id)),
            };
        }

        let discarded = if state.active == Some(task_id) {
            state.engine.elapsed().max(task.time_spent)
        } else {
            task.time_spent
        };

        let patch = TaskPatch {
            status: TaskStatus::NotStarted,
            duration: 0,
            completed_at: None,
        };
        if let Err(e) = self.ledger.discard(&task, &patch).await {
            tracing::error!(task_id = %task_id, error = %e, "quit handoff failed");
            return Err(e);
        }

        if let Some(t) = state.task_mut(task_id) {
            t.reset(now);
        }
        state.active = None;
        state.engine = state.fresh_engine(0, self.engine_settings);
        drop(state);

        tracing::info!(task_id = %task_id, discarded, "task quit");
        self.cues.emit(ClientCue::TaskQuit { task_id });
        self.announce_finish(RoomEventKind::Quit, task.name.as_str(), discarded)
            .await;
        Ok(())
    }

    /// The buffer vanished under us: unbind the task and take the durable row as
    /// the truth. Returns the row's status, or `None` when it could not be read.
    async fn adopt_finished_elsewhere(
        &self,
        state: &mut CoordinatorState,
        task_id: TaskId,
    ) -> Option<TaskStatus> {
        if state.active == Some(task_id) {
            state.active = None;
            state.inactivity = None;
            state.prompt_open = false;
            state.engine = state.fresh_engine(0, self.engine_settings);
        }

        let row = match self.ledger.list_tasks().await {
            Ok(tasks) => tasks.into_iter().find(|t| t.id == task_id),
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "could not reload finished task");
                None
            }
        };
        let status = row.as_ref().map(|t| t.status);
        if let (Some(row), Some(local)) = (row, state.task_mut(task_id)) {
            *local = row;
        }
        if status != Some(TaskStatus::NotStarted) && state.selected == Some(task_id) {
            state.selected = None;
        }
        status
    }

    // ------------------------------------------------------------------
    // restore
    // ------------------------------------------------------------------

    /// Reconnect path: bring back the last task, paused.
    pub async fn restore(&self) -> Result<TimerView, LifecycleError> {
        let now = self.clock.now_millis();
        let recovered = self.ledger.recover(now).await?;
        let mut state = self.state.lock().await;
        let Some(recovered) = recovered else {
            return Ok(self.view_of(&state));
        };
        let buffer = recovered.buffer;

        if state.task(buffer.task_id).is_none() {
            match TaskName::parse(&buffer.name) {
                Ok(name) => {
                    let mut task =
                        Task::new(buffer.task_id, self.session.user_id().clone(), name, buffer.created_at);
                    task.status = TaskStatus::Paused;
                    state.tasks.push(task);
                }
                Err(e) => {
                    tracing::warn!(task_id = %buffer.task_id, error = %e, "buffered task has no usable name");
                    return Ok(self.view_of(&state));
                }
            }
        }
        if let Some(task) = state.task_mut(buffer.task_id) {
            task.status = TaskStatus::Paused;
            task.record_elapsed(buffer.time_spent);
            task.last_active = task.last_active.max(buffer.last_active);
        }
        let elapsed = state
            .task(buffer.task_id)
            .map_or(buffer.time_spent, |t| t.time_spent);

        state.engine = state.fresh_engine(elapsed, self.engine_settings);
        state.active = Some(buffer.task_id);
        state.selected = Some(buffer.task_id);
        state.inactivity = None;
        self.mark_presence(false).await;

        tracing::info!(
            task_id = %buffer.task_id,
            elapsed,
            closed_segment = recovered.closed_segment,
            "task restored paused"
        );
        Ok(self.view_of(&state))
    }

    // ------------------------------------------------------------------
    // tick / refocus
    // ------------------------------------------------------------------

    /// Scheduled tick. Never fails; persistence problems are logged.
    pub async fn tick(&self) -> Option<TickOutcome> {
        let mut state = self.state.lock().await;
        if !state.engine.is_running() {
            return None;
        }
        let now = self.clock.now_millis();
        let outcome = state.engine.tick(now);
        self.after_reconcile(&mut state, &outcome, now).await;
        Some(outcome)
    }

    /// Tab visible again / window focused.
    pub async fn refocus(&self) -> Option<TickOutcome> {
        let mut state = self.state.lock().await;
        if !state.engine.is_running() {
            return None;
        }
        let now = self.clock.now_millis();
        let outcome = state.engine.refocus(now);
        self.after_reconcile(&mut state, &outcome, now).await;
        Some(outcome)
    }

    async fn after_reconcile(
        &self,
        state: &mut CoordinatorState,
        outcome: &TickOutcome,
        now: EpochMillis,
    ) {
        let Some(task_id) = state.active else {
            return;
        };
        if let Some(c) = &outcome.correction {
            tracing::debug!(task_id = %task_id, from = c.from, to = c.to, source = ?c.source, "drift corrected");
        }
        if let Some(elapsed) = outcome.snapshot {
            if let Err(e) = self.ledger.snapshot(task_id, elapsed, now).await {
                tracing::debug!(task_id = %task_id, error = %e, "snapshot not persisted");
            }
        }

        if outcome.times_up {
            // the engine stopped itself at zero
            self.settle_pause(state, outcome.elapsed, now).await;
            self.cues.emit(ClientCue::TimesUp { task_id });
            self.cues.emit(ClientCue::AutoPaused {
                task_id,
                reason: AutoPauseReason::TimesUp,
            });
            return;
        }

        if now.saturating_sub(state.last_heartbeat) >= self.heartbeat_interval_ms {
            if let Some(segment) = state.engine.segment() {
                state.last_heartbeat = now;
                if let Err(e) = self.ledger.heartbeat(task_id, segment, now).await {
                    tracing::debug!(task_id = %task_id, error = %e, "heartbeat not written");
                }
            }
        }

        let Some(monitor) = &state.inactivity else {
            return;
        };
        match monitor.observe(now) {
            InactivityState::Attentive => state.prompt_open = false,
            InactivityState::Prompting { remaining_secs } => {
                if !state.prompt_open {
                    state.prompt_open = true;
                    self.cues.emit(ClientCue::InactivityPrompt {
                        task_id,
                        remaining_secs,
                    });
                }
            }
            InactivityState::Expired => {
                if let Some(elapsed) = self.pause_locked(state, now).await {
                    tracing::info!(task_id = %task_id, elapsed, "no answer to inactivity prompt");
                    self.cues.emit(ClientCue::AutoPaused {
                        task_id,
                        reason: AutoPauseReason::Inactivity,
                    });
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // interaction, selection, preferences
    // ------------------------------------------------------------------

    /// Any user input resets the inactivity clock.
    pub async fn record_interaction(&self) {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().await;
        if let Some(monitor) = state.inactivity.as_mut() {
            monitor.record_interaction(now);
        }
        state.prompt_open = false;
    }

    /// Answer to "are you still working?". Returns whether a prompt was open.
    pub async fn confirm_still_working(&self) -> bool {
        let was_open = self.state.lock().await.prompt_open;
        self.record_interaction().await;
        was_open
    }

    pub async fn select_task(&self, id: TaskId) -> Result<TimerView, LifecycleError> {
        let mut state = self.state.lock().await;
        if state.task(id).is_none() {
            return Err(ValidationError::NoTask.into());
        }
        state.selected = Some(id);
        Ok(self.view_of(&state))
    }

    /// Change the countdown length; a running timer is paused first.
    pub async fn set_countdown_minutes(&self, minutes: u32) -> DurationEdit {
        let minutes = clamp_minutes(minutes);
        let mut state = self.state.lock().await;
        let now = self.clock.now_millis();
        let forced_pause = self.pause_locked(&mut state, now).await;
        let edit = state.engine.set_countdown_minutes(minutes, now);
        state.preferences.countdown_minutes = minutes;
        drop(state);

        self.persist_preferences(PreferencesPatch {
            countdown_minutes: Some(minutes),
            ..PreferencesPatch::default()
        })
        .await;
        DurationEdit {
            forced_pause,
            remaining: edit.remaining,
        }
    }

    /// Switch stopwatch/countdown; a running timer is paused first.
    pub async fn set_mode(&self, mode: TimerMode) -> Option<u64> {
        let mut state = self.state.lock().await;
        if state.engine.mode() == mode {
            return None;
        }
        let now = self.clock.now_millis();
        let forced_pause = self.pause_locked(&mut state, now).await;
        state.engine.set_mode(mode, now);
        state.preferences.timer_mode = mode;
        drop(state);

        self.persist_preferences(PreferencesPatch {
            timer_mode: Some(mode),
            ..PreferencesPatch::default()
        })
        .await;
        forced_pause
    }

    pub async fn update_preferences(&self, patch: PreferencesPatch) -> Preferences {
        let mut state = self.state.lock().await;
        state.preferences.apply(&patch);
        let prefs = state.preferences.clone();
        drop(state);
        self.persist_preferences(patch).await;
        prefs
    }

    async fn persist_preferences(&self, patch: PreferencesPatch) {
        if let Err(e) = self.ledger.save_preferences(&patch).await {
            tracing::warn!(error = %e, "preferences not saved");
        }
    }

    // ------------------------------------------------------------------
    // views
    // ------------------------------------------------------------------

    pub async fn view(&self) -> TimerView {
        let state = self.state.lock().await;
        self.view_of(&state)
    }

    fn view_of(&self, state: &CoordinatorState) -> TimerView {
        let task = state.active.or(state.selected).and_then(|id| state.task(id));
        TimerView {
            task_id: task.map(|t| t.id),
            task_name: task.map(|t| t.name.as_str().to_string()),
            status: task.map(|t| t.status),
            running: state.engine.is_running(),
            mode: state.engine.mode(),
            elapsed: state.engine.elapsed(),
            remaining: state.engine.remaining(),
        }
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.state.lock().await.tasks.clone()
    }

    pub async fn task(&self, id: TaskId) -> Option<Task> {
        self.state.lock().await.task(id).cloned()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.engine.is_running()
    }

    pub async fn preferences(&self) -> Preferences {
        self.state.lock().await.preferences.clone()
    }

    /// Recent drift corrections, oldest first (diagnostics only).
    pub async fn corrections(&self) -> Vec<DriftCorrection> {
        self.state
            .lock()
            .await
            .engine
            .corrections()
            .iter()
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // room-facing side effects (best effort)
    // ------------------------------------------------------------------

    async fn mark_presence(&self, active: bool) {
        let Some(presence) = &self.presence else {
            return;
        };
        if let Err(e) = presence.set_active(active).await {
            tracing::warn!(active, error = %e, "presence not updated");
        }
    }

    async fn announce_start(&self, task: &Task) {
        let (Some(broadcaster), Some(room)) = (&self.broadcaster, &self.room) else {
            return;
        };
        if let Err(e) = broadcaster
            .announce_started(
                room,
                self.session.user_id(),
                self.session.display_name(),
                task.name.as_str(),
            )
            .await
        {
            tracing::debug!(room = %room, error = %e, "start not announced");
        }
    }

    async fn announce_finish(&self, kind: RoomEventKind, task_name: &str, duration: u64) {
        let (Some(broadcaster), Some(room)) = (&self.broadcaster, &self.room) else {
            return;
        };
        if let Err(e) = broadcaster
            .announce_finished(
                room,
                kind,
                self.session.user_id(),
                self.session.display_name(),
                task_name,
                duration,
            )
            .await
        {
            tracing::debug!(room = %room, ?kind, error = %e, "finish not announced");
        }
    }
}
