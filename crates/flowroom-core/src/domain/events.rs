//! Events - ルームへの一斉通知とクライアント内の合図
//!
//! `RoomEvent` is fanned out to everyone in a room through self-expiring keys in the
//! ephemeral store. `ClientCue` never leaves the client; it drives sounds and toasts.

use serde::{Deserialize, Serialize};

use super::ids::{EventId, RoomId, TaskId, UserId};
use super::task::EpochMillis;

/// Minimum tracked time before a complete/quit is announced to the room.
pub const MIN_BROADCAST_SECS: u64 = 5 * 60;

/// Minimum gap between two "started" announcements from the same user.
pub const START_BROADCAST_COOLDOWN_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomEventKind {
    Started,
    Completed,
    Quit,
}

/// Broadcast written under `room_events/{rid}/{eid}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub event_id: EventId,
    pub room_id: RoomId,
    pub kind: RoomEventKind,
    pub user_id: UserId,
    pub display_name: String,
    pub task_name: String,
    pub duration_secs: u64,
    pub at: EpochMillis,
}

/// Why the coordinator paused a timer on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoPauseReason {
    /// Countdown reached zero.
    TimesUp,
    /// The same user became active in another room.
    ActiveElsewhere(RoomId),
    /// Nobody answered the "are you still working?" prompt.
    Inactivity,
}

/// Local sound/visual feedback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCue {
    TimesUp { task_id: TaskId },
    TaskCompleted { task_id: TaskId, duration_secs: u64 },
    TaskQuit { task_id: TaskId },
    InactivityPrompt { task_id: TaskId, remaining_secs: u64 },
    AutoPaused { task_id: TaskId, reason: AutoPauseReason },
}
