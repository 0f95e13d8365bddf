//! RoomBroadcaster - ルームへの一時イベント
//!
//! Events are written under `room_events/{rid}/{eid}` with a store-native TTL, so
//! they disappear even if the writing client does not stay around to clean up.
//!
//! Policy:
//! - "started" is announced at most once per cooldown window per user; the last
//!   announcement lives in the store, so reloads and other tabs share it
//! - "completed" / "quit" only for sessions of at least `MIN_BROADCAST_SECS`

use std::sync::Arc;
use std::time::Duration;

use super::paths;
use crate::domain::events::{MIN_BROADCAST_SECS, START_BROADCAST_COOLDOWN_MS};
use crate::domain::{EpochMillis, RoomEvent, RoomEventKind, RoomId, StoreError, UserId};
use crate::ports::ephemeral_store::{encode, read_as, read_children};
use crate::ports::{Clock, EphemeralStore, IdGenerator, Subscription};

pub struct RoomBroadcaster {
    store: Arc<dyn EphemeralStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    ttl: Duration,
}

impl RoomBroadcaster {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            ids,
            ttl,
        }
    }

    /// Returns whether an event was written.
    pub async fn announce_started(
        &self,
        room: &RoomId,
        user: &UserId,
        display_name: &str,
        task_name: &str,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let cooldown = paths::start_cooldown(user);
        let last: Option<EpochMillis> = read_as(self.store.as_ref(), &cooldown).await?;
        if last.is_some_and(|at| now.saturating_sub(at) < START_BROADCAST_COOLDOWN_MS) {
            tracing::debug!(room = %room, user_id = %user, "start broadcast suppressed by cooldown");
            return Ok(false);
        }
        self.publish(room, RoomEventKind::Started, user, display_name, task_name, 0, now)
            .await?;

        let window = Duration::from_millis(START_BROADCAST_COOLDOWN_MS.unsigned_abs());
        let stamp = encode(&cooldown, &now)?;
        if let Err(e) = self.store.write_with_ttl(&cooldown, stamp, window).await {
            tracing::warn!(user_id = %user, error = %e, "start cooldown not recorded");
        }
        Ok(true)
    }

    /// Announce a completed or quit task. Short sessions are not announced.
    pub async fn announce_finished(
        &self,
        room: &RoomId,
        kind: RoomEventKind,
        user: &UserId,
        display_name: &str,
        task_name: &str,
        duration_secs: u64,
    ) -> Result<bool, StoreError> {
        if duration_secs < MIN_BROADCAST_SECS {
            return Ok(false);
        }
        let now = self.clock.now_millis();
        self.publish(room, kind, user, display_name, task_name, duration_secs, now)
            .await?;
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn publish(
        &self,
        room: &RoomId,
        kind: RoomEventKind,
        user: &UserId,
        display_name: &str,
        task_name: &str,
        duration_secs: u64,
        at: EpochMillis,
    ) -> Result<(), StoreError> {
        let event = RoomEvent {
            event_id: self.ids.generate_event_id(),
            room_id: room.clone(),
            kind,
            user_id: user.clone(),
            display_name: display_name.to_string(),
            task_name: task_name.to_string(),
            duration_secs,
            at,
        };
        let path = paths::room_event(room, event.event_id);
        let value = encode(&path, &event)?;
        self.store.write_with_ttl(&path, value, self.ttl).await?;
        tracing::debug!(room = %room, kind = ?kind, event_id = %event.event_id, "room event published");
        Ok(())
    }

    /// Live (unexpired) events of a room, oldest first.
    pub async fn recent(&self, room: &RoomId) -> Result<Vec<RoomEvent>, StoreError> {
        let children: Vec<(String, RoomEvent)> =
            read_children(self.store.as_ref(), &paths::room_events(room)).await?;
        let mut events: Vec<RoomEvent> = children.into_iter().map(|(_, e)| e).collect();
        events.sort_by_key(|e| (e.at, e.event_id));
        Ok(events)
    }

    pub fn subscribe(&self, room: &RoomId) -> Subscription {
        self.store.subscribe(&paths::room_events(room))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryEphemeralStore;
    use crate::ports::{FixedClock, UlidGenerator};
    use rstest::rstest;

    fn broadcaster() -> (Arc<FixedClock>, RoomBroadcaster) {
        let clock = Arc::new(FixedClock::from_millis(1_700_000_000_000));
        let store = Arc::new(InMemoryEphemeralStore::new(clock.clone()));
        (clock.clone(), on_store(&clock, store))
    }

    fn on_store(clock: &Arc<FixedClock>, store: Arc<InMemoryEphemeralStore>) -> RoomBroadcaster {
        let ids = Arc::new(UlidGenerator::new(clock.clone()));
        RoomBroadcaster::new(store, clock.clone(), ids, Duration::from_secs(10))
    }

    #[tokio::test]
    async fn start_announcements_respect_the_cooldown() {
        let (clock, b) = broadcaster();
        let room = RoomId::new("r1");
        let user = UserId::new("u1");

        assert!(b.announce_started(&room, &user, "Ann", "Write").await.unwrap());
        clock.advance_secs(60);
        assert!(!b.announce_started(&room, &user, "Ann", "Write").await.unwrap());
        clock.advance_secs(240);
        assert!(b.announce_started(&room, &user, "Ann", "Write").await.unwrap());
    }

    #[tokio::test]
    async fn cooldown_is_shared_by_every_session_of_a_user() {
        let clock = Arc::new(FixedClock::from_millis(1_700_000_000_000));
        let store = Arc::new(InMemoryEphemeralStore::new(clock.clone()));
        let first = on_store(&clock, store.clone());
        let room = RoomId::new("r1");
        let user = UserId::new("u1");
        assert!(first.announce_started(&room, &user, "Ann", "Write").await.unwrap());
        drop(first);

        // a reloaded tab starts with a fresh broadcaster
        let reloaded = on_store(&clock, store.clone());
        clock.advance_secs(2);
        assert!(!reloaded.announce_started(&room, &user, "Ann", "Write").await.unwrap());
        assert!(reloaded
            .announce_started(&room, &UserId::new("u2"), "Bob", "Read")
            .await
            .unwrap());
        assert_eq!(reloaded.recent(&room).await.unwrap().len(), 2);

        clock.advance_secs(300);
        assert!(reloaded.announce_started(&room, &user, "Ann", "Write").await.unwrap());
    }

    #[rstest]
    #[case::short(299, false)]
    #[case::threshold(300, true)]
    #[case::long(3_600, true)]
    #[tokio::test]
    async fn finished_announcements_need_five_minutes(#[case] secs: u64, #[case] announced: bool) {
        let (_, b) = broadcaster();
        let room = RoomId::new("r1");
        let written = b
            .announce_finished(&room, RoomEventKind::Completed, &UserId::new("u1"), "Ann", "Write", secs)
            .await
            .unwrap();
        assert_eq!(written, announced);
        assert_eq!(b.recent(&room).await.unwrap().len(), usize::from(announced));
    }

    #[tokio::test]
    async fn events_expire() {
        let (clock, b) = broadcaster();
        let room = RoomId::new("r1");
        b.announce_finished(&room, RoomEventKind::Quit, &UserId::new("u1"), "Ann", "x", 400)
            .await
            .unwrap();
        assert_eq!(b.recent(&room).await.unwrap()[0].kind, RoomEventKind::Quit);
        clock.advance_secs(10);
        assert!(b.recent(&room).await.unwrap().is_empty());
    }
}
