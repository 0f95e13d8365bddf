//! Task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a task.
///
/// State transitions:
/// - NotStarted -> InProgress
/// - InProgress <-> Paused (any number of times)
/// - InProgress | Paused -> Completed (terminal)
/// - InProgress | Paused -> Quit, which resets the task to NotStarted with zero time
///
/// `Quit` is never stored on a task; it exists so callers can name the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Paused,
    Completed,
    Quit,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Quit)
    }

    /// Statuses that still carry buffered time in the ephemeral store.
    pub fn is_open(self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::Paused)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (NotStarted, InProgress) => true,
            (InProgress, Paused) | (Paused, InProgress) => true,
            (InProgress | Paused, Completed) => true,
            (InProgress | Paused, Quit) => true,
            // a restarted quit task goes through NotStarted again
            (Quit, NotStarted) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "not_started",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Quit => "quit",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::start(TaskStatus::NotStarted, TaskStatus::InProgress)]
    #[case::pause(TaskStatus::InProgress, TaskStatus::Paused)]
    #[case::resume(TaskStatus::Paused, TaskStatus::InProgress)]
    #[case::complete_running(TaskStatus::InProgress, TaskStatus::Completed)]
    #[case::complete_paused(TaskStatus::Paused, TaskStatus::Completed)]
    #[case::quit(TaskStatus::Paused, TaskStatus::Quit)]
    fn allowed_transitions(#[case] from: TaskStatus, #[case] to: TaskStatus) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case::skip_start(TaskStatus::NotStarted, TaskStatus::Completed)]
    #[case::pause_unstarted(TaskStatus::NotStarted, TaskStatus::Paused)]
    #[case::revive_completed(TaskStatus::Completed, TaskStatus::InProgress)]
    #[case::double_complete(TaskStatus::Completed, TaskStatus::Completed)]
    fn rejected_transitions(#[case] from: TaskStatus, #[case] to: TaskStatus) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_value(TaskStatus::InProgress).unwrap();
        assert_eq!(json, serde_json::json!("in_progress"));
        assert_eq!(TaskStatus::NotStarted.to_string(), "not_started");
    }
}
