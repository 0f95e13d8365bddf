//! ReaperLoop - 放置されたプレゼンスの回収
//!
//! クライアントは黙って消える（クラッシュ、回線断）。`last_seen` が
//! staleness threshold を超えたセッションを削除し、そのセッションがいた部屋の
//! `active_users` インデックスを作り直す。
//!
//! # フロー
//! 1. `presence/` 以下の全セッションを読む
//! 2. 古いセッションを個別に削除（1 件の失敗で止めない）
//! 3. 影響を受けた部屋ごとに `rebuild_room_index`

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::paths;
use super::presence::{all_sessions, rebuild_room_index};
use crate::domain::{RoomId, StoreError};
use crate::ports::{Clock, EphemeralStore};

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed_sessions: usize,
    pub rooms_rebuilt: usize,
    pub index_corrections: usize,
    pub failures: usize,
}

pub struct PresenceSweeper {
    store: Arc<dyn EphemeralStore>,
    clock: Arc<dyn Clock>,
    staleness_ms: i64,
    freshness_ms: i64,
}

impl PresenceSweeper {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        clock: Arc<dyn Clock>,
        staleness_ms: i64,
        freshness_ms: i64,
    ) -> Self {
        Self {
            store,
            clock,
            staleness_ms,
            freshness_ms,
        }
    }

    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        let now = self.clock.now_millis();
        let sessions = all_sessions(self.store.as_ref()).await?;
        let mut report = SweepReport::default();
        let mut rooms: BTreeSet<RoomId> = BTreeSet::new();

        for (user, user_sessions) in &sessions {
            for session in user_sessions {
                if now.saturating_sub(session.last_seen) <= self.staleness_ms {
                    continue;
                }
                let path = paths::presence_session(user, session.session_id);
                match self.store.delete(&path).await {
                    Ok(()) => {
                        report.removed_sessions += 1;
                        rooms.insert(session.room_id.clone());
                        tracing::debug!(
                            user_id = %user,
                            session = %session.session_id,
                            last_seen = session.last_seen,
                            "stale presence removed"
                        );
                    }
                    Err(e) => {
                        report.failures += 1;
                        tracing::warn!(path = %path, error = %e, "stale presence not removed");
                    }
                }
            }
        }

        for room in &rooms {
            match rebuild_room_index(self.store.as_ref(), room, now, self.freshness_ms).await {
                Ok(corrections) => {
                    report.rooms_rebuilt += 1;
                    report.index_corrections += corrections;
                }
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!(room = %room, error = %e, "room index not rebuilt");
                }
            }
        }

        if report.removed_sessions > 0 {
            tracing::info!(
                removed = report.removed_sessions,
                rooms = report.rooms_rebuilt,
                corrections = report.index_corrections,
                "presence sweep finished"
            );
        }
        Ok(report)
    }

    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = interval.tick() => {}
            }

            if let Err(e) = self.sweep_once().await {
                tracing::warn!(error = %e, "presence sweep failed");
            }
        }
        tracing::debug!("sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::presence::PresenceTracker;
    use crate::domain::{SessionId, UserId};
    use crate::impls::InMemoryEphemeralStore;
    use crate::ports::FixedClock;
    use crate::ports::ephemeral_store::read_children;
    use ulid::Ulid;

    const FRESH: i64 = 65_000;
    const STALE: i64 = 70_000;

    #[tokio::test]
    async fn removes_only_stale_sessions_and_fixes_the_index() {
        let clock = Arc::new(FixedClock::from_millis(1_700_000_000_000));
        let store = Arc::new(InMemoryEphemeralStore::new(clock.clone()));
        let room = RoomId::new("r1");
        let tracker = |user: &str| {
            PresenceTracker::new(
                store.clone(),
                clock.clone(),
                UserId::new(user),
                SessionId::from_ulid(Ulid::new()),
                FRESH,
            )
        };

        let gone = tracker("gone");
        gone.join(room.clone()).await.unwrap();
        gone.set_active(true).await.unwrap();

        clock.advance_secs(60);
        let alive = tracker("alive");
        alive.join(room.clone()).await.unwrap();

        clock.advance_secs(15);
        let sweeper = PresenceSweeper::new(store.clone(), clock.clone(), STALE, FRESH);
        let report = sweeper.sweep_once().await.unwrap();

        assert_eq!(report.removed_sessions, 1);
        assert_eq!(report.rooms_rebuilt, 1);
        assert_eq!(report.failures, 0);
        assert_eq!(report.index_corrections, 1);

        let index: Vec<(String, bool)> = read_children(store.as_ref(), &paths::room_index(&room))
            .await
            .unwrap();
        assert_eq!(index, vec![("alive".to_string(), false)]);
        assert!(
            alive
                .sessions_of(&UserId::new("gone"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn fresh_store_sweeps_nothing() {
        let clock = Arc::new(FixedClock::from_millis(1_700_000_000_000));
        let store = Arc::new(InMemoryEphemeralStore::new(clock.clone()));
        let sweeper = PresenceSweeper::new(store, clock, STALE, FRESH);
        assert_eq!(sweeper.sweep_once().await.unwrap(), SweepReport::default());
    }
}
