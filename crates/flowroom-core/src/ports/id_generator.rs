//! IdGenerator port - ID 生成の抽象化
//!
//! Task ids are minted on the client before the durable store has seen the task,
//! so they must be unique without coordination: ULIDs from the injected clock.

use crate::domain::ids::{EventId, SessionId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散環境で衝突しない ID を生成
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_session_id(&self) -> SessionId;

    fn generate_event_id(&self) -> EventId;
}

/// ULID ベースの ID 生成器
///
/// Clock を使って時刻部分を決めるので、FixedClock なら timestamp が決定的になります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = u64::try_from(self.clock.now_millis()).unwrap_or(0);
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next())
    }

    fn generate_session_id(&self) -> SessionId {
        SessionId::from(self.next())
    }

    fn generate_event_id(&self) -> EventId {
        EventId::from(self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);
        let id1 = id_gen.generate_task_id();
        let id2 = id_gen.generate_task_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn ulid_generator_with_fixed_clock_shares_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_task_id();
        let id2 = id_gen.generate_task_id();

        // ランダム部分があるので ID は異なるが、timestamp 部分は同じ
        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), id2.as_ulid().timestamp_ms());
        assert_eq!(
            id1.as_ulid().timestamp_ms(),
            fixed_time.timestamp_millis() as u64
        );
    }

    #[test]
    fn different_id_types_are_generated() {
        let id_gen = UlidGenerator::new(SystemClock);
        assert!(id_gen.generate_task_id().to_string().starts_with("task-"));
        assert!(id_gen.generate_session_id().to_string().starts_with("session-"));
        assert!(id_gen.generate_event_id().to_string().starts_with("event-"));
    }
}
