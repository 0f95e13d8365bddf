//! Records kept in the fast ephemeral store while a task is in flight.
//!
//! None of these are the system of record. They exist so a reload, a crashed tab or
//! a second device can pick up where the last client left off.

use serde::{Deserialize, Serialize};

use super::ids::{RoomId, TaskId};
use super::state::TaskStatus;
use super::task::{EpochMillis, Task};
use crate::timer::drift::expected_elapsed;

/// An open run segment: `start_time` is when the timer last started running and
/// `base_seconds` is what had accumulated before that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSegment {
    pub start_time: EpochMillis,
    pub base_seconds: u64,
}

impl RunSegment {
    pub fn new(start_time: EpochMillis, base_seconds: u64) -> Self {
        Self {
            start_time,
            base_seconds,
        }
    }

    /// Total elapsed seconds if the segment were closed at `now`.
    pub fn elapsed_at(&self, now: EpochMillis) -> u64 {
        expected_elapsed(self.base_seconds, self.start_time, now)
    }
}

/// Per-user, per-task buffer entry (`users/{uid}/tasks/{tid}`).
///
/// `time_spent` is the last persisted `expected(now)` value (a snapshot), while
/// `segment` is set only while the timer is running. When both are present the
/// segment is authoritative; the snapshot bounds loss if the segment is lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBuffer {
    pub task_id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub time_spent: u64,
    #[serde(default)]
    pub segment: Option<RunSegment>,
    #[serde(default)]
    pub room_id: Option<RoomId>,
    pub created_at: EpochMillis,
    pub last_active: EpochMillis,
}

impl TaskBuffer {
    pub fn from_task(task: &Task, room_id: Option<RoomId>) -> Self {
        Self {
            task_id: task.id,
            name: task.name.as_str().to_string(),
            status: task.status,
            time_spent: task.time_spent,
            segment: None,
            room_id,
            created_at: task.created_at,
            last_active: task.last_active,
        }
    }

    /// Best estimate of accumulated time at `now`.
    pub fn elapsed_at(&self, now: EpochMillis) -> u64 {
        match self.segment {
            Some(segment) => segment.elapsed_at(now).max(self.time_spent),
            None => self.time_spent,
        }
    }

    /// Worth restoring: still open and carrying time (or a running segment).
    pub fn is_recoverable(&self) -> bool {
        self.status.is_open() && (self.time_spent > 0 || self.segment.is_some())
    }

    /// Close the open segment at `end`, leaving the buffer paused.
    /// Returns true when a segment was actually closed.
    pub fn close_segment(&mut self, end: EpochMillis) -> bool {
        let Some(segment) = self.segment.take() else {
            if self.status == TaskStatus::InProgress {
                self.status = TaskStatus::Paused;
            }
            return false;
        };
        self.time_spent = self.time_spent.max(segment.elapsed_at(end));
        self.status = TaskStatus::Paused;
        self.last_active = self.last_active.max(end);
        true
    }
}

/// `users/{uid}/timer_state`: what the user's active timer is doing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStateRecord {
    pub running: bool,
    pub start_time: Option<EpochMillis>,
    pub base_seconds: u64,
    pub task_id: TaskId,
}

impl TimerStateRecord {
    pub fn running(task_id: TaskId, segment: RunSegment) -> Self {
        Self {
            running: true,
            start_time: Some(segment.start_time),
            base_seconds: segment.base_seconds,
            task_id,
        }
    }

    pub fn paused(task_id: TaskId, elapsed: u64) -> Self {
        Self {
            running: false,
            start_time: None,
            base_seconds: elapsed,
            task_id,
        }
    }
}

/// `users/{uid}/heartbeat`: liveness of the running timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub task_id: TaskId,
    pub start_time: EpochMillis,
    pub last_seen: EpochMillis,
    pub is_running: bool,
}

/// `users/{uid}/last_task`: the task the user touched last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastTaskPointer {
    pub task_id: TaskId,
    pub updated_at: EpochMillis,
}
