//! Errors - エラー型と分類
//!
//! Store-level errors (`StoreError`, `DurableError`, `CacheError`) are produced by
//! the ports; the coordinator folds them into `LifecycleError`, whose variants map
//! one-to-one onto how the caller is expected to react.

use thiserror::Error;

use super::ids::{RoomId, TaskId};
use super::state::TaskStatus;

/// ErrorKind は運用上の分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Infrastructure: ストアの障害
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Input rejected before any state changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("task name must not be empty")]
    EmptyName,

    #[error("task name is longer than {max} characters")]
    NameTooLong { max: usize },

    #[error("no task is selected")]
    NoTask,

    #[error("at least {min} second(s) must be tracked before completing")]
    InsufficientTime { min: u64 },

    #[error("cannot move task from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}

/// Fast ephemeral store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ephemeral store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to decode value at {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode value for {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("value at {0} is not an object")]
    NotAnObject(String),
}

/// Durable store (system of record) failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurableError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("durable store unavailable: {0}")]
    Unavailable(String),

    #[error("durable store rejected the request: {0}")]
    Rejected(String),
}

impl DurableError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DurableError::NotFound(_) | DurableError::Rejected(_) => ErrorKind::Permanent,
            DurableError::Unavailable(_) => ErrorKind::Infrastructure,
        }
    }
}

/// Client-local cache failure (guest sessions).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("local cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("local cache contents are corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("task {0} is not in the local cache")]
    NotFound(TaskId),
}

/// Lifecycle coordinator error taxonomy.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Recovered locally, surfaced as inline feedback, no state mutation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The ephemeral record is already gone (raced with another device).
    #[error("task {0} was already completed or removed elsewhere")]
    AlreadyCompleted(TaskId),

    /// Ephemeral read/write failure on a path the caller must hear about.
    #[error("ephemeral store error: {0}")]
    TransientStore(#[from] StoreError),

    /// Durable handoff failed; ephemeral state was left intact for a retry.
    #[error("durable write failed for {task_id}: {source}")]
    DurableWrite {
        task_id: TaskId,
        #[source]
        source: DurableError,
    },

    /// Durable request outside the handoff (task list, preferences).
    #[error("durable store request failed: {0}")]
    Durable(#[source] DurableError),

    #[error("local cache error: {0}")]
    LocalCache(#[from] CacheError),

    /// Derived presence disagrees with live sessions. Healed, never shown to users.
    #[error("presence index for room {room} disagrees with live sessions")]
    PresenceDesync { room: RoomId },
}

impl LifecycleError {
    pub fn durable(task_id: TaskId, source: DurableError) -> Self {
        LifecycleError::DurableWrite { task_id, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::Validation(_) | LifecycleError::AlreadyCompleted(_) => {
                ErrorKind::Permanent
            }
            LifecycleError::TransientStore(_) | LifecycleError::PresenceDesync { .. } => {
                ErrorKind::Transient
            }
            LifecycleError::DurableWrite { source, .. } | LifecycleError::Durable(source) => {
                source.kind()
            }
            LifecycleError::LocalCache(_) => ErrorKind::Infrastructure,
        }
    }

    /// "Success-adjacent": the work was already done by someone else.
    pub fn is_already_completed(&self) -> bool {
        matches!(self, LifecycleError::AlreadyCompleted(_))
    }
}
