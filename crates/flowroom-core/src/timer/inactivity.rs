//! "Are you still working?" prompt.
//!
//! After `timeout` without user interaction while a timer runs, a confirmation
//! prompt opens with its own countdown. If nobody answers before it runs out, the
//! coordinator auto-pauses the timer.

use crate::domain::EpochMillis;
use crate::domain::records::MIN_INACTIVITY_TIMEOUT_MINUTES;

/// How long the confirmation prompt waits for an answer.
pub const CONFIRMATION_WINDOW_SECS: u64 = 5 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InactivityState {
    Attentive,
    Prompting { remaining_secs: u64 },
    Expired,
}

#[derive(Debug, Clone)]
pub struct InactivityMonitor {
    timeout_ms: i64,
    confirm_ms: i64,
    last_interaction: EpochMillis,
}

impl InactivityMonitor {
    /// `timeout_minutes` below the 15-minute floor is raised to it.
    pub fn new(timeout_minutes: u32, now: EpochMillis) -> Self {
        let minutes = i64::from(timeout_minutes.max(MIN_INACTIVITY_TIMEOUT_MINUTES));
        Self {
            timeout_ms: minutes * 60 * 1000,
            confirm_ms: CONFIRMATION_WINDOW_SECS as i64 * 1000,
            last_interaction: now,
        }
    }

    pub fn timeout_ms(&self) -> i64 {
        self.timeout_ms
    }

    /// Any user input, including answering the prompt.
    pub fn record_interaction(&mut self, now: EpochMillis) {
        self.last_interaction = self.last_interaction.max(now);
    }

    pub fn observe(&self, now: EpochMillis) -> InactivityState {
        let idle = now.saturating_sub(self.last_interaction);
        if idle < self.timeout_ms {
            return InactivityState::Attentive;
        }
        let prompt_age = idle - self.timeout_ms;
        if prompt_age >= self.confirm_ms {
            return InactivityState::Expired;
        }
        let left_ms = self.confirm_ms - prompt_age;
        InactivityState::Prompting {
            remaining_secs: (left_ms as u64).div_ceil(1000),
        }
    }
}
