//! Task record and name validation.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::ValidationError;
use super::ids::{TaskId, UserId};
use super::state::TaskStatus;

/// Maximum task name length, in characters.
pub const MAX_TASK_NAME_CHARS: usize = 100;

/// Epoch milliseconds.
pub type EpochMillis = i64;

/// A validated, trimmed task name (1..=100 chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskName(String);

impl TaskName {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if trimmed.chars().count() > MAX_TASK_NAME_CHARS {
            return Err(ValidationError::NameTooLong {
                max: MAX_TASK_NAME_CHARS,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TaskName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TaskName> for String {
    fn from(name: TaskName) -> Self {
        name.0
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A task as the client holds it in memory (and as the durable store returns it).
///
/// Design:
/// - `time_spent` only grows, except on quit which resets it to 0.
/// - State transitions go through methods so the status machine is enforced in one place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub user_id: UserId,
    pub name: TaskName,
    pub status: TaskStatus,
    pub time_spent: u64,
    pub created_at: EpochMillis,
    pub completed_at: Option<EpochMillis>,
    pub last_active: EpochMillis,
}

impl Task {
    pub fn new(id: TaskId, user_id: UserId, name: TaskName, now: EpochMillis) -> Self {
        Self {
            id,
            user_id,
            name,
            status: TaskStatus::NotStarted,
            time_spent: 0,
            created_at: now,
            completed_at: None,
            last_active: now,
        }
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), ValidationError> {
        if !self.status.can_transition_to(next) {
            return Err(ValidationError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// NotStarted/Paused -> InProgress.
    pub fn mark_started(&mut self, now: EpochMillis) -> Result<(), ValidationError> {
        self.transition(TaskStatus::InProgress)?;
        self.last_active = now;
        Ok(())
    }

    /// InProgress -> Paused, folding in the elapsed seconds of the closed segment.
    pub fn mark_paused(&mut self, elapsed: u64, now: EpochMillis) -> Result<(), ValidationError> {
        self.transition(TaskStatus::Paused)?;
        self.record_elapsed(elapsed);
        self.last_active = now;
        Ok(())
    }

    pub fn mark_completed(
        &mut self,
        duration: u64,
        now: EpochMillis,
    ) -> Result<(), ValidationError> {
        self.transition(TaskStatus::Completed)?;
        self.time_spent = duration;
        self.completed_at = Some(now);
        self.last_active = now;
        Ok(())
    }

    /// Quit: identity survives, accumulated time does not.
    pub fn reset(&mut self, now: EpochMillis) {
        self.status = TaskStatus::NotStarted;
        self.time_spent = 0;
        self.completed_at = None;
        self.last_active = now;
    }

    /// Monotonic update of the accumulated time.
    pub fn record_elapsed(&mut self, elapsed: u64) {
        self.time_spent = self.time_spent.max(elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use ulid::Ulid;

    fn task() -> Task {
        Task::new(
            TaskId::from_ulid(Ulid::new()),
            UserId::new("u1"),
            TaskName::parse("Write report").unwrap(),
            1_000,
        )
    }

    #[rstest]
    #[case::empty("")]
    #[case::blank("   \t ")]
    fn empty_names_are_rejected(#[case] raw: &str) {
        assert_eq!(TaskName::parse(raw), Err(ValidationError::EmptyName));
    }

    #[test]
    fn names_are_trimmed_and_bounded() {
        assert_eq!(TaskName::parse("  Draft email ").unwrap().as_str(), "Draft email");
        let long = "x".repeat(MAX_TASK_NAME_CHARS + 1);
        assert!(matches!(
            TaskName::parse(&long),
            Err(ValidationError::NameTooLong { max: 100 })
        ));
        assert!(TaskName::parse(&"é".repeat(MAX_TASK_NAME_CHARS)).is_ok());
    }

    #[test]
    fn pause_is_monotonic() {
        let mut t = task();
        t.mark_started(2_000).unwrap();
        t.mark_paused(10, 12_000).unwrap();
        t.mark_started(13_000).unwrap();
        t.mark_paused(4, 14_000).unwrap();
        assert_eq!(t.time_spent, 10);
        assert_eq!(t.status, TaskStatus::Paused);
    }

    #[test]
    fn reset_keeps_identity() {
        let mut t = task();
        let id = t.id;
        t.mark_started(2_000).unwrap();
        t.mark_paused(400, 402_000).unwrap();
        t.reset(403_000);
        assert_eq!(t.id, id);
        assert_eq!(t.status, TaskStatus::NotStarted);
        assert_eq!(t.time_spent, 0);
    }

    #[test]
    fn completed_task_cannot_restart() {
        let mut t = task();
        t.mark_started(2_000).unwrap();
        t.mark_completed(15, 17_000).unwrap();
        assert_eq!(t.completed_at, Some(17_000));
        assert!(t.mark_started(18_000).is_err());
    }
}
