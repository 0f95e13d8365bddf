//! Domain model (IDs, tasks, ephemeral records, presence, events, errors).

pub mod buffer;
pub mod errors;
pub mod events;
pub mod ids;
pub mod presence;
pub mod records;
pub mod session;
pub mod state;
pub mod task;

pub use self::buffer::{Heartbeat, LastTaskPointer, RunSegment, TaskBuffer, TimerStateRecord};
pub use self::errors::{
    CacheError, DurableError, ErrorKind, LifecycleError, StoreError, ValidationError,
};
pub use self::events::{AutoPauseReason, ClientCue, RoomEvent, RoomEventKind};
pub use self::ids::{EventId, RoomId, SessionId, TaskId, UserId};
pub use self::presence::{PresenceSession, UserStatus, derive_status};
pub use self::records::{
    HistoryEntry, LeaderboardEntry, LeaderboardPeriod, Preferences, PreferencesPatch, TaskPatch,
    TimerMode,
};
pub use self::session::{AuthenticatedSession, GuestSession, Session};
pub use self::state::TaskStatus;
pub use self::task::{EpochMillis, Task, TaskName};
