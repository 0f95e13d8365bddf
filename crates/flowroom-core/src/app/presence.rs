//! PresenceTracker - 誰がどの部屋でオンライン／作業中か
//!
//! # 設計原則
//! - ステータスは観測のたびにセッションの timestamp から導出する（キャッシュしない）
//! - `active_users/{rid}` は非正規化インデックス。ずれたら `rebuild_room_index`
//!   でセッションから作り直す
//! - 部屋をまたいだ排他は「後から active になった側が勝つ」（`active_since`）

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use super::paths;
use crate::domain::{
    EpochMillis, LifecycleError, PresenceSession, RoomId, SessionId, StoreError, UserId,
    UserStatus, derive_status,
};
use crate::ports::ephemeral_store::{read_children, write_as};
use crate::ports::{Clock, EphemeralStore, Subscription};

/// Every presence session in the store, grouped by user.
pub async fn all_sessions(
    store: &dyn EphemeralStore,
) -> Result<BTreeMap<UserId, Vec<PresenceSession>>, StoreError> {
    let Some(Value::Object(users)) = store.read(&paths::presence_root()).await? else {
        return Ok(BTreeMap::new());
    };
    let mut grouped = BTreeMap::new();
    for (uid, sessions) in users {
        let Value::Object(sessions) = sessions else {
            continue;
        };
        let decoded: Vec<PresenceSession> = sessions
            .into_iter()
            .filter_map(|(sid, raw)| match serde_json::from_value(raw) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!(user_id = %uid, session = %sid, error = %e, "skipping undecodable presence");
                    None
                }
            })
            .collect();
        grouped.insert(UserId::new(uid), decoded);
    }
    Ok(grouped)
}

/// Recompute `active_users/{room}` from fresh sessions and fix any entry that
/// disagrees. Returns the number of corrections.
pub async fn rebuild_room_index(
    store: &dyn EphemeralStore,
    room: &RoomId,
    now: EpochMillis,
    freshness_ms: i64,
) -> Result<usize, StoreError> {
    let sessions = all_sessions(store).await?;
    let mut truth: BTreeMap<UserId, bool> = BTreeMap::new();
    for (uid, user_sessions) in &sessions {
        match derive_status(user_sessions, Some(room), now, freshness_ms) {
            UserStatus::ActivelyWorking => {
                truth.insert(uid.clone(), true);
            }
            UserStatus::Idle => {
                truth.insert(uid.clone(), false);
            }
            UserStatus::Offline => {}
        }
    }

    let index: Vec<(String, bool)> = read_children(store, &paths::room_index(room)).await?;
    let indexed: BTreeMap<UserId, bool> = index
        .into_iter()
        .map(|(uid, active)| (UserId::new(uid), active))
        .collect();

    let mut corrections = 0;
    for (uid, active) in &truth {
        if indexed.get(uid) != Some(active) {
            write_as(store, &paths::room_index_entry(room, uid), active).await?;
            corrections += 1;
        }
    }
    for uid in indexed.keys().filter(|uid| !truth.contains_key(*uid)) {
        store.delete(&paths::room_index_entry(room, uid)).await?;
        corrections += 1;
    }
    Ok(corrections)
}

/// A member as seen from a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMember {
    pub user_id: UserId,
    pub status: UserStatus,
}

/// Presence for one client session (one tab).
pub struct PresenceTracker {
    store: Arc<dyn EphemeralStore>,
    clock: Arc<dyn Clock>,
    user: UserId,
    session_id: SessionId,
    freshness_ms: i64,
    local: Mutex<Option<PresenceSession>>,
}

impl PresenceTracker {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        clock: Arc<dyn Clock>,
        user: UserId,
        session_id: SessionId,
        freshness_ms: i64,
    ) -> Self {
        Self {
            store,
            clock,
            user,
            session_id,
            freshness_ms,
            local: Mutex::new(None),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub async fn current_room(&self) -> Option<RoomId> {
        self.local.lock().await.as_ref().map(|s| s.room_id.clone())
    }

    pub async fn is_active(&self) -> bool {
        self.local.lock().await.as_ref().is_some_and(|s| s.is_active)
    }

    fn store(&self) -> &dyn EphemeralStore {
        self.store.as_ref()
    }

    /// Open (or move) this session into `room`, inactive.
    pub async fn join(&self, room: RoomId) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        let previous = {
            let mut local = self.local.lock().await;
            let previous = local.as_ref().map(|s| s.room_id.clone());
            *local = Some(PresenceSession {
                session_id: self.session_id,
                room_id: room.clone(),
                is_active: false,
                active_since: None,
                last_seen: now,
            });
            previous
        };
        self.publish().await?;
        if let Some(old) = previous.filter(|old| *old != room) {
            self.sync_index(&old).await?;
        }
        tracing::debug!(user_id = %self.user, room = %room, "joined room");
        Ok(())
    }

    /// Periodic liveness write. Rewrites the whole record so a swept session comes back.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        let touched = {
            let mut local = self.local.lock().await;
            match local.as_mut() {
                Some(session) => {
                    session.last_seen = now;
                    true
                }
                None => false,
            }
        };
        if touched {
            self.publish().await?;
        }
        Ok(())
    }

    /// Mark this session's timer as running or not.
    pub async fn set_active(&self, active: bool) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        let changed = {
            let mut local = self.local.lock().await;
            let Some(session) = local.as_mut() else {
                return Ok(());
            };
            let changed = session.is_active != active;
            if changed {
                session.active_since = active.then_some(now);
            }
            session.is_active = active;
            session.last_seen = now;
            changed
        };
        self.publish().await?;
        if changed {
            tracing::debug!(user_id = %self.user, active, "presence activity changed");
        }
        Ok(())
    }

    /// Explicit disconnect.
    pub async fn leave(&self) -> Result<(), StoreError> {
        let Some(session) = self.local.lock().await.take() else {
            return Ok(());
        };
        self.store()
            .delete(&paths::presence_session(&self.user, self.session_id))
            .await?;
        self.sync_index(&session.room_id).await
    }

    async fn publish(&self) -> Result<(), StoreError> {
        let Some(session) = self.local.lock().await.clone() else {
            return Ok(());
        };
        write_as(
            self.store(),
            &paths::presence_session(&self.user, self.session_id),
            &session,
        )
        .await?;
        self.sync_index(&session.room_id).await
    }

    /// Rewrite this user's entry in a room index from their live sessions.
    async fn sync_index(&self, room: &RoomId) -> Result<(), StoreError> {
        let sessions = self.sessions_of(&self.user).await?;
        let entry = paths::room_index_entry(room, &self.user);
        let now = self.clock.now_millis();
        match derive_status(&sessions, Some(room), now, self.freshness_ms) {
            UserStatus::ActivelyWorking => write_as(self.store(), &entry, &true).await,
            UserStatus::Idle => write_as(self.store(), &entry, &false).await,
            UserStatus::Offline => self.store().delete(&entry).await,
        }
    }

    pub async fn sessions_of(&self, user: &UserId) -> Result<Vec<PresenceSession>, StoreError> {
        let children: Vec<(String, PresenceSession)> =
            read_children(self.store(), &paths::user_presence(user)).await?;
        Ok(children.into_iter().map(|(_, s)| s).collect())
    }

    /// Derived status, everywhere or in one room.
    pub async fn status_of(
        &self,
        user: &UserId,
        room: Option<&RoomId>,
    ) -> Result<UserStatus, StoreError> {
        let sessions = self.sessions_of(user).await?;
        Ok(derive_status(
            &sessions,
            room,
            self.clock.now_millis(),
            self.freshness_ms,
        ))
    }

    /// Online members of a room. The index only nominates candidates; every status
    /// is re-derived from sessions.
    pub async fn room_members(&self, room: &RoomId) -> Result<Vec<RoomMember>, StoreError> {
        let index: Vec<(String, Value)> =
            read_children(self.store(), &paths::room_index(room)).await?;
        let mut candidates: BTreeSet<UserId> =
            index.into_iter().map(|(uid, _)| UserId::new(uid)).collect();
        if self.current_room().await.as_ref() == Some(room) {
            candidates.insert(self.user.clone());
        }

        let mut members = Vec::new();
        for user in candidates {
            let status = self.status_of(&user, Some(room)).await?;
            if status != UserStatus::Offline {
                members.push(RoomMember {
                    user_id: user,
                    status,
                });
            }
        }
        Ok(members)
    }

    pub async fn active_count(&self, room: &RoomId) -> Result<usize, StoreError> {
        Ok(self
            .room_members(room)
            .await?
            .iter()
            .filter(|m| m.status == UserStatus::ActivelyWorking)
            .count())
    }

    /// Self-heal the room index. Disagreements are logged, never surfaced.
    pub async fn heal_room_index(&self, room: &RoomId) -> Result<usize, StoreError> {
        let corrections = rebuild_room_index(
            self.store(),
            room,
            self.clock.now_millis(),
            self.freshness_ms,
        )
        .await?;
        if corrections > 0 {
            let desync = LifecycleError::PresenceDesync { room: room.clone() };
            tracing::warn!(error = %desync, corrections, "room index healed");
        }
        Ok(corrections)
    }

    /// Another room that has a stronger claim on this user's single active timer:
    /// a fresh active session elsewhere that became active after ours did.
    pub async fn active_elsewhere(&self) -> Result<Option<RoomId>, StoreError> {
        let Some(mine) = self.local.lock().await.clone() else {
            return Ok(None);
        };
        let Some(my_since) = mine.active_since.filter(|_| mine.is_active) else {
            return Ok(None);
        };
        let now = self.clock.now_millis();
        let sessions = self.sessions_of(&self.user).await?;
        let rival = sessions
            .into_iter()
            .filter(|s| s.session_id != self.session_id && s.room_id != mine.room_id)
            .filter(|s| s.is_active_at(now, self.freshness_ms))
            .filter(|s| {
                let since = s.active_since.unwrap_or(s.last_seen);
                (since, s.session_id) > (my_since, self.session_id)
            })
            .max_by_key(|s| s.active_since);
        Ok(rival.map(|s| s.room_id))
    }

    /// Changes to this user's sessions on any device.
    pub fn subscribe_own(&self) -> Subscription {
        self.store.subscribe(&paths::user_presence(&self.user))
    }

    pub fn subscribe_room(&self, room: &RoomId) -> Subscription {
        self.store.subscribe(&paths::room_index(room))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryEphemeralStore;
    use crate::ports::FixedClock;
    use ulid::Ulid;

    const FRESH: i64 = 65_000;

    struct Fixture {
        clock: Arc<FixedClock>,
        store: Arc<InMemoryEphemeralStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(FixedClock::from_millis(1_700_000_000_000));
            let store = Arc::new(InMemoryEphemeralStore::new(clock.clone()));
            Self { clock, store }
        }

        fn tracker(&self, user: &str) -> PresenceTracker {
            PresenceTracker::new(
                self.store.clone(),
                self.clock.clone(),
                UserId::new(user),
                SessionId::from_ulid(Ulid::new()),
                FRESH,
            )
        }
    }

    #[tokio::test]
    async fn join_activate_leave() {
        let f = Fixture::new();
        let alice = f.tracker("alice");
        let room = RoomId::new("r1");

        alice.join(room.clone()).await.unwrap();
        assert_eq!(
            alice.status_of(&UserId::new("alice"), Some(&room)).await.unwrap(),
            UserStatus::Idle
        );
        alice.set_active(true).await.unwrap();
        assert_eq!(alice.active_count(&room).await.unwrap(), 1);

        alice.leave().await.unwrap();
        assert_eq!(
            alice.status_of(&UserId::new("alice"), None).await.unwrap(),
            UserStatus::Offline
        );
        assert!(alice.room_members(&room).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn silent_sessions_go_offline_without_a_sweep() {
        let f = Fixture::new();
        let bob = f.tracker("bob");
        let observer = f.tracker("carol");
        let room = RoomId::new("r1");
        bob.join(room.clone()).await.unwrap();
        bob.set_active(true).await.unwrap();

        f.clock.advance_secs(66);
        assert_eq!(
            observer.status_of(&UserId::new("bob"), Some(&room)).await.unwrap(),
            UserStatus::Offline
        );
        assert_eq!(observer.active_count(&room).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn heal_fixes_a_lying_index() {
        let f = Fixture::new();
        let dave = f.tracker("dave");
        let room = RoomId::new("r1");
        dave.join(room.clone()).await.unwrap();

        // a ghost entry and a wrong flag
        write_as(f.store.as_ref(), &paths::room_index_entry(&room, &UserId::new("ghost")), &true)
            .await
            .unwrap();
        write_as(f.store.as_ref(), &paths::room_index_entry(&room, &UserId::new("dave")), &true)
            .await
            .unwrap();

        assert_eq!(dave.heal_room_index(&room).await.unwrap(), 2);
        assert_eq!(dave.heal_room_index(&room).await.unwrap(), 0);
        let index: Vec<(String, bool)> = read_children(f.store.as_ref(), &paths::room_index(&room))
            .await
            .unwrap();
        assert_eq!(index, vec![("dave".to_string(), false)]);
    }

    #[tokio::test]
    async fn later_activation_elsewhere_wins() {
        let f = Fixture::new();
        let room_a = f.tracker("erin");
        let room_b = f.tracker("erin");

        room_a.join(RoomId::new("a")).await.unwrap();
        room_a.set_active(true).await.unwrap();
        assert_eq!(room_a.active_elsewhere().await.unwrap(), None);

        f.clock.advance_secs(3);
        room_b.join(RoomId::new("b")).await.unwrap();
        room_b.set_active(true).await.unwrap();

        assert_eq!(
            room_a.active_elsewhere().await.unwrap(),
            Some(RoomId::new("b"))
        );
        // the newer room does not yield to the older one
        assert_eq!(room_b.active_elsewhere().await.unwrap(), None);
    }

    #[tokio::test]
    async fn moving_rooms_cleans_the_old_index() {
        let f = Fixture::new();
        let frank = f.tracker("frank");
        frank.join(RoomId::new("a")).await.unwrap();
        frank.join(RoomId::new("b")).await.unwrap();
        assert!(frank.room_members(&RoomId::new("a")).await.unwrap().is_empty());
        assert_eq!(frank.room_members(&RoomId::new("b")).await.unwrap().len(), 1);
        assert_eq!(
            f.store
                .read(&paths::room_index(&RoomId::new("a")))
                .await
                .unwrap(),
            None
        );
    }
}
