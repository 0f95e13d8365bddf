//! Who the client is: a guest with no durable identity, or a signed-in user.
//!
//! Resolved once when the session context is built; nothing downstream branches on
//! "is there a user id yet".

use serde::{Deserialize, Serialize};

use super::ids::{SessionId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestSession {
    /// Local-only owner id stamped on cached tasks.
    pub local_id: UserId,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedSession {
    pub user_id: UserId,
    pub display_name: String,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Session {
    Guest(GuestSession),
    Authenticated(AuthenticatedSession),
}

impl Session {
    /// Owner id for tasks created in this session.
    pub fn user_id(&self) -> &UserId {
        match self {
            Session::Guest(g) => &g.local_id,
            Session::Authenticated(a) => &a.user_id,
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            Session::Guest(g) => g.session_id,
            Session::Authenticated(a) => a.session_id,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Session::Guest(_) => "Guest",
            Session::Authenticated(a) => &a.display_name,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Session::Guest(_))
    }
}
