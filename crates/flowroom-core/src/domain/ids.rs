//! Domain identifiers (strongly-typed IDs).
//!
//! Ids minted by this crate (tasks, presence sessions, room events) are ULIDs
//! wrapped in a phantom-typed `Id<T>`, so a `TaskId` can never be passed where a
//! `SessionId` is expected. Task ids are generated client-side before the task
//! reaches the durable store, which is what makes optimistic creation possible.
//!
//! Users and rooms are owned by external systems (auth, room CRUD), so their ids
//! are opaque string newtypes instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"task-", "session-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData なので実行時のサイズは Ulid と同じです。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Key used for this id inside the ephemeral store tree (no prefix).
    pub fn key(&self) -> String {
        self.ulid.to_string()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    /// Accepts both the store key form and the prefixed display form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// One browser tab / connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Session {}

impl IdMarker for Session {
    fn prefix() -> &'static str {
        "session-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {}

impl IdMarker for Event {
    fn prefix() -> &'static str {
        "event-"
    }
}

/// Identifier of a task (optimistically minted on first start).
pub type TaskId = Id<Task>;

/// Identifier of a presence session.
pub type SessionId = Id<Session>;

/// Identifier of a room broadcast event.
pub type EventId = Id<Event>;

/// Externally-owned user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Externally-owned room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_prefix_but_key_does_not() {
        let ulid = Ulid::new();
        let task = TaskId::from_ulid(ulid);
        assert_eq!(task.to_string(), format!("task-{ulid}"));
        assert_eq!(task.key(), ulid.to_string());
    }

    #[test]
    fn parses_key_and_display_forms() {
        let task = TaskId::from_ulid(Ulid::new());
        assert_eq!(task.key().parse::<TaskId>().unwrap(), task);
        assert_eq!(task.to_string().parse::<TaskId>().unwrap(), task);
        assert!("not-a-ulid".parse::<TaskId>().is_err());
    }

    #[test]
    fn serializes_as_bare_ulid() {
        let task = TaskId::from_ulid(Ulid::new());
        let json = serde_json::to_value(task).unwrap();
        assert_eq!(json, serde_json::Value::String(task.key()));
        let back: TaskId = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<TaskId>(), size_of::<Ulid>());
        assert_eq!(size_of::<SessionId>(), 16);
    }
}
