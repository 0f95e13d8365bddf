//! Durable-store records other than tasks: history, leaderboard, preferences.

use serde::{Deserialize, Serialize};

use super::ids::{TaskId, UserId};
use super::state::TaskStatus;
use super::task::EpochMillis;

/// Inactivity timeouts below this are raised to it.
pub const MIN_INACTIVITY_TIMEOUT_MINUTES: u32 = 15;

/// Fields the complete/quit handoff writes to the durable task row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub status: TaskStatus,
    pub duration: u64,
    pub completed_at: Option<EpochMillis>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub task_id: TaskId,
    pub user_id: UserId,
    pub display_name: String,
    pub task_name: String,
    pub duration_secs: u64,
    pub completed_at: EpochMillis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardPeriod {
    Day,
    Week,
    Month,
    AllTime,
}

impl LeaderboardPeriod {
    /// Length of the trailing window, `None` for all time.
    pub fn window_ms(self) -> Option<i64> {
        const DAY: i64 = 24 * 60 * 60 * 1000;
        match self {
            LeaderboardPeriod::Day => Some(DAY),
            LeaderboardPeriod::Week => Some(7 * DAY),
            LeaderboardPeriod::Month => Some(30 * DAY),
            LeaderboardPeriod::AllTime => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    pub display_name: String,
    pub total_seconds: u64,
    pub tasks_completed: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerMode {
    /// Open-ended stopwatch ("Deep Work").
    Stopwatch,
    /// Fixed-duration countdown ("Pomodoro").
    Countdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub timer_mode: TimerMode,
    pub countdown_minutes: u32,
    pub inactivity_timeout_minutes: u32,
    pub sound_enabled: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            timer_mode: TimerMode::Stopwatch,
            countdown_minutes: 25,
            inactivity_timeout_minutes: 60,
            sound_enabled: true,
        }
    }
}

impl Preferences {
    pub fn inactivity_timeout_minutes(&self) -> u32 {
        self.inactivity_timeout_minutes
            .max(MIN_INACTIVITY_TIMEOUT_MINUTES)
    }
}

/// Partial preferences update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencesPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_mode: Option<TimerMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactivity_timeout_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound_enabled: Option<bool>,
}

impl Preferences {
    pub fn apply(&mut self, patch: &PreferencesPatch) {
        if let Some(mode) = patch.timer_mode {
            self.timer_mode = mode;
        }
        if let Some(minutes) = patch.countdown_minutes {
            self.countdown_minutes = minutes;
        }
        if let Some(minutes) = patch.inactivity_timeout_minutes {
            self.inactivity_timeout_minutes = minutes;
        }
        if let Some(sound) = patch.sound_enabled {
            self.sound_enabled = sound;
        }
    }
}
