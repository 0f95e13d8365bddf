//! Ephemeral tree layout.
//!
//! ```text
//! users/{uid}/tasks/{tid}     TaskBuffer
//! users/{uid}/timer_state     TimerStateRecord
//! users/{uid}/heartbeat       Heartbeat
//! users/{uid}/last_task       LastTaskPointer
//! presence/{uid}/{sid}        PresenceSession
//! active_users/{rid}/{uid}    bool (is active)
//! room_events/{rid}/{eid}     RoomEvent (expiring)
//! start_cooldowns/{uid}       EpochMillis of the last "started" event (expiring)
//! ```

use crate::domain::{EventId, RoomId, SessionId, TaskId, UserId};
use crate::ports::StorePath;

pub fn user_root(user: &UserId) -> StorePath {
    StorePath::root().child("users").child(user.as_str())
}

pub fn user_tasks(user: &UserId) -> StorePath {
    user_root(user).child("tasks")
}

pub fn task_buffer(user: &UserId, task: TaskId) -> StorePath {
    user_tasks(user).child(task.key())
}

pub fn timer_state(user: &UserId) -> StorePath {
    user_root(user).child("timer_state")
}

pub fn heartbeat(user: &UserId) -> StorePath {
    user_root(user).child("heartbeat")
}

pub fn last_task(user: &UserId) -> StorePath {
    user_root(user).child("last_task")
}

pub fn presence_root() -> StorePath {
    StorePath::root().child("presence")
}

pub fn user_presence(user: &UserId) -> StorePath {
    presence_root().child(user.as_str())
}

pub fn presence_session(user: &UserId, session: SessionId) -> StorePath {
    user_presence(user).child(session.key())
}

pub fn room_index(room: &RoomId) -> StorePath {
    StorePath::root().child("active_users").child(room.as_str())
}

pub fn room_index_entry(room: &RoomId, user: &UserId) -> StorePath {
    room_index(room).child(user.as_str())
}

pub fn room_events(room: &RoomId) -> StorePath {
    StorePath::root().child("room_events").child(room.as_str())
}

pub fn room_event(room: &RoomId, event: EventId) -> StorePath {
    room_events(room).child(event.key())
}

/// Outside `users/{uid}`: the user root is purged when the last task finishes.
pub fn start_cooldown(user: &UserId) -> StorePath {
    StorePath::root().child("start_cooldowns").child(user.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn layout() {
        let user = UserId::new("u1");
        let task = TaskId::from_ulid(Ulid::nil());
        assert_eq!(
            task_buffer(&user, task).to_string(),
            format!("/users/u1/tasks/{}", Ulid::nil())
        );
        assert_eq!(heartbeat(&user).to_string(), "/users/u1/heartbeat");
        assert!(user_root(&user).contains(&last_task(&user)));
        assert_eq!(
            room_index_entry(&RoomId::new("r1"), &user).to_string(),
            "/active_users/r1/u1"
        );
        assert!(!user_root(&user).contains(&start_cooldown(&user)));
    }
}
