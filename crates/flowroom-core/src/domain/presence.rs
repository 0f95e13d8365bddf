//! Presence status types.
//!
//! Status is always derived from session timestamps at observation time; a cached
//! value is never trusted because a client can vanish without saying goodbye.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{RoomId, SessionId};
use super::task::EpochMillis;

/// One live tab/connection (`presence/{uid}/{sid}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSession {
    pub session_id: SessionId,
    pub room_id: RoomId,
    pub is_active: bool,
    /// When this session last switched to active; orders competing rooms.
    #[serde(default)]
    pub active_since: Option<EpochMillis>,
    pub last_seen: EpochMillis,
}

impl PresenceSession {
    pub fn is_fresh(&self, now: EpochMillis, freshness_ms: i64) -> bool {
        now.saturating_sub(self.last_seen) <= freshness_ms
    }

    pub fn is_active_at(&self, now: EpochMillis, freshness_ms: i64) -> bool {
        self.is_active && self.is_fresh(now, freshness_ms)
    }
}

/// Three-tier status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// A fresh session has a running timer.
    ActivelyWorking,
    /// Online, but no fresh session is running a timer.
    Idle,
    /// No fresh session at all.
    Offline,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActivelyWorking => write!(f, "actively working"),
            Self::Idle => write!(f, "idle"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Derive a user's status from their sessions.
///
/// With `room` set, only sessions in that room count.
pub fn derive_status<'a>(
    sessions: impl IntoIterator<Item = &'a PresenceSession>,
    room: Option<&RoomId>,
    now: EpochMillis,
    freshness_ms: i64,
) -> UserStatus {
    let mut status = UserStatus::Offline;
    for session in sessions {
        if room.is_some_and(|r| *r != session.room_id) {
            continue;
        }
        if !session.is_fresh(now, freshness_ms) {
            continue;
        }
        if session.is_active {
            return UserStatus::ActivelyWorking;
        }
        status = UserStatus::Idle;
    }
    status
}
