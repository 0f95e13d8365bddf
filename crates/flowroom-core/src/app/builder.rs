//! ContextBuilder - クライアントセッション単位のワイヤリング
//!
//! # 設計原則
//! - ゲスト／ログイン済みの分岐はここで 1 回だけ解決する（`TaskLedger` を選ぶ）
//! - 起動時検証（Fail-fast）: ログイン済みなのに store が無い、設定が壊れている、
//!   などは build() の時点でエラーにする
//! - グローバルな singleton は持たない。セッションごとに作り、sign-out で畳む

use std::sync::Arc;

use super::broadcast::RoomBroadcaster;
use super::guard_loop::run_guard_loop;
use super::handle::LoopHandle;
use super::leaderboard::LeaderboardCache;
use super::ledger::{GuestLedger, RemoteLedger, TaskLedger};
use super::ledger::guest::MigrationReport;
use super::lifecycle::{CoordinatorParts, TaskCoordinator, TimerView};
use super::presence::PresenceTracker;
use super::presence_loop::run_presence_loop;
use super::tick_loop::run_tick_loop;
use crate::config::{ConfigError, FlowConfig};
use crate::domain::{
    AuthenticatedSession, LeaderboardPeriod, LifecycleError, RoomId, Session,
};
use crate::impls::{InMemoryTaskCache, JsonFileTaskCache};
use crate::ports::{
    Clock, CueSink, DurableStore, EphemeralStore, IdGenerator, LocalTaskCache, NoopCueSink,
    SystemClock, UlidGenerator,
};
use crate::timer::EngineSettings;

/// BuildError はセッション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no session given; call .session() before build()")]
    MissingSession,

    #[error("signed-in sessions need an {0} store")]
    MissingStore(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum SignInError {
    #[error("only a guest session can be signed in")]
    NotGuest,

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("guest tasks were not migrated: {0}")]
    Migration(#[from] LifecycleError),
}

/// ContextBuilder は 1 クライアントセッションを組み立てる
///
/// # 使用例
/// ```ignore
/// let ctx = ContextBuilder::new(config)
///     .session(session)
///     .room(RoomId::new("deep-work"))
///     .ephemeral(ephemeral)
///     .durable(durable)
///     .build()?;
/// ctx.start().await?;
/// let loops = ctx.spawn_loops();
/// ```
pub struct ContextBuilder {
    config: FlowConfig,
    session: Option<Session>,
    room: Option<RoomId>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    ephemeral: Option<Arc<dyn EphemeralStore>>,
    durable: Option<Arc<dyn DurableStore>>,
    cache: Option<Arc<dyn LocalTaskCache>>,
    cues: Option<Arc<dyn CueSink>>,
    leaderboard_period: LeaderboardPeriod,
}

impl ContextBuilder {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            session: None,
            room: None,
            clock: None,
            ids: None,
            ephemeral: None,
            durable: None,
            cache: None,
            cues: None,
            leaderboard_period: LeaderboardPeriod::Week,
        }
    }

    pub fn session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn room(mut self, room: RoomId) -> Self {
        self.room = Some(room);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn ephemeral(mut self, store: Arc<dyn EphemeralStore>) -> Self {
        self.ephemeral = Some(store);
        self
    }

    pub fn durable(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(store);
        self
    }

    /// Guest task cache. Defaults to the configured file, else memory.
    pub fn cache(mut self, cache: Arc<dyn LocalTaskCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cues(mut self, cues: Arc<dyn CueSink>) -> Self {
        self.cues = Some(cues);
        self
    }

    pub fn leaderboard_period(mut self, period: LeaderboardPeriod) -> Self {
        self.leaderboard_period = period;
        self
    }

    /// # 検証
    /// - session が設定されているか
    /// - 設定値が妥当か（`FlowConfig::validate`）
    /// - ログイン済みなら ephemeral / durable の両方があるか
    pub fn build(self) -> Result<SessionContext, BuildError> {
        let session = self.session.ok_or(BuildError::MissingSession)?;
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let cues = self.cues.unwrap_or_else(|| Arc::new(NoopCueSink));
        let config = self.config;

        let mut guest_ledger = None;
        let mut presence = None;
        let mut broadcaster = None;
        let mut leaderboard = None;

        let ledger: Arc<dyn TaskLedger> = match &session {
            Session::Guest(_) => {
                let cache: Arc<dyn LocalTaskCache> = match (self.cache, &config.cache_path) {
                    (Some(cache), _) => cache,
                    (None, Some(path)) => Arc::new(JsonFileTaskCache::new(path.clone())),
                    (None, None) => Arc::new(InMemoryTaskCache::new()),
                };
                let ledger = Arc::new(GuestLedger::new(cache));
                guest_ledger = Some(Arc::clone(&ledger));
                ledger
            }
            Session::Authenticated(auth) => {
                let ephemeral = self
                    .ephemeral
                    .clone()
                    .ok_or(BuildError::MissingStore("ephemeral"))?;
                let durable = self
                    .durable
                    .clone()
                    .ok_or(BuildError::MissingStore("durable"))?;

                if let Some(room) = &self.room {
                    presence = Some(Arc::new(PresenceTracker::new(
                        Arc::clone(&ephemeral),
                        Arc::clone(&clock),
                        auth.user_id.clone(),
                        auth.session_id,
                        config.freshness_ms(),
                    )));
                    broadcaster = Some(Arc::new(RoomBroadcaster::new(
                        Arc::clone(&ephemeral),
                        Arc::clone(&clock),
                        Arc::clone(&ids),
                        config.event_ttl(),
                    )));
                    tracing::debug!(user_id = %auth.user_id, room = %room, "room services wired");
                }
                leaderboard = Some(Arc::new(LeaderboardCache::new(
                    Arc::clone(&durable),
                    self.leaderboard_period,
                )));

                Arc::new(RemoteLedger::new(
                    auth.user_id.clone(),
                    ephemeral,
                    durable,
                    config.staleness_ms(),
                ))
            }
        };

        let coordinator = Arc::new(TaskCoordinator::new(CoordinatorParts {
            session: session.clone(),
            room: self.room.clone(),
            ledger,
            presence: presence.clone(),
            broadcaster: broadcaster.clone(),
            leaderboard: leaderboard.clone(),
            clock: Arc::clone(&clock),
            ids: Arc::clone(&ids),
            cues: Arc::clone(&cues),
            engine_settings: EngineSettings {
                snapshot_interval_secs: config.snapshot_interval_secs,
                drift_history: config.drift_history,
            },
            heartbeat_interval_ms: i64::try_from(config.heartbeat_interval_secs)
                .unwrap_or(i64::MAX / 1000)
                * 1000,
        }));

        tracing::info!(
            user_id = %session.user_id(),
            guest = session.is_guest(),
            room = ?self.room,
            "session context built"
        );

        Ok(SessionContext {
            config,
            session,
            room: self.room,
            clock,
            ids,
            cues,
            ephemeral: self.ephemeral,
            durable: self.durable,
            guest_ledger,
            coordinator,
            presence,
            broadcaster,
            leaderboard,
        })
    }
}

/// Everything one client session owns. Built once, torn down on sign-out.
pub struct SessionContext {
    config: FlowConfig,
    session: Session,
    room: Option<RoomId>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    cues: Arc<dyn CueSink>,
    ephemeral: Option<Arc<dyn EphemeralStore>>,
    durable: Option<Arc<dyn DurableStore>>,
    guest_ledger: Option<Arc<GuestLedger>>,
    coordinator: Arc<TaskCoordinator>,
    presence: Option<Arc<PresenceTracker>>,
    broadcaster: Option<Arc<RoomBroadcaster>>,
    leaderboard: Option<Arc<LeaderboardCache>>,
}

impl SessionContext {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    pub fn coordinator(&self) -> &Arc<TaskCoordinator> {
        &self.coordinator
    }

    pub fn presence(&self) -> Option<&Arc<PresenceTracker>> {
        self.presence.as_ref()
    }

    pub fn broadcaster(&self) -> Option<&Arc<RoomBroadcaster>> {
        self.broadcaster.as_ref()
    }

    pub fn leaderboard(&self) -> Option<&Arc<LeaderboardCache>> {
        self.leaderboard.as_ref()
    }

    /// Join the room, warm the leaderboard and restore the last task (paused).
    pub async fn start(&self) -> Result<TimerView, LifecycleError> {
        if let (Some(presence), Some(room)) = (&self.presence, &self.room) {
            presence.join(room.clone()).await?;
            if let Err(e) = presence.heal_room_index(room).await {
                tracing::debug!(room = %room, error = %e, "room index not checked");
            }
        }
        if let Some(board) = &self.leaderboard {
            if let Err(e) = board.refresh().await {
                tracing::warn!(error = %e, "leaderboard unavailable");
            }
        }
        self.coordinator.initialize().await
    }

    /// Spawn the per-session loops: tick, plus presence heartbeat and the
    /// exclusivity guard for room members.
    pub fn spawn_loops(&self) -> LoopHandle {
        let mut loops = LoopHandle::new();

        let coordinator = Arc::clone(&self.coordinator);
        let tick = self.config.tick_interval();
        loops.spawn("tick", move |rx| run_tick_loop(coordinator, tick, rx));

        if let Some(presence) = &self.presence {
            let tracker = Arc::clone(presence);
            let heartbeat = self.config.heartbeat_interval();
            loops.spawn("presence", move |rx| run_presence_loop(tracker, heartbeat, rx));

            let coordinator = Arc::clone(&self.coordinator);
            let changes = presence.subscribe_own();
            loops.spawn("exclusivity", move |rx| {
                run_guard_loop(coordinator, changes, rx)
            });
        }
        loops
    }

    /// Stop the loops, close the open segment and leave the room.
    pub async fn teardown(self, loops: LoopHandle) -> Result<(), LifecycleError> {
        loops.shutdown_and_join().await;
        self.coordinator.pause().await?;
        if let Some(presence) = &self.presence {
            presence.leave().await?;
        }
        tracing::info!(user_id = %self.session.user_id(), "session torn down");
        Ok(())
    }

    /// Turn a guest session into a signed-in one: the guest's cached tasks move
    /// into the durable store and the cache is cleared. The returned context has
    /// not been started.
    pub async fn sign_in(
        self,
        auth: AuthenticatedSession,
    ) -> Result<(SessionContext, MigrationReport), SignInError> {
        let Some(guest) = self.guest_ledger.clone() else {
            return Err(SignInError::NotGuest);
        };
        let (Some(ephemeral), Some(durable)) = (self.ephemeral.clone(), self.durable.clone())
        else {
            return Err(BuildError::MissingStore("durable").into());
        };

        let mut builder = ContextBuilder::new(self.config.clone())
            .session(Session::Authenticated(auth.clone()))
            .clock(Arc::clone(&self.clock))
            .ids(Arc::clone(&self.ids))
            .cues(Arc::clone(&self.cues))
            .ephemeral(Arc::clone(&ephemeral))
            .durable(Arc::clone(&durable));
        if let Some(room) = &self.room {
            builder = builder.room(room.clone());
        }
        let next = builder.build()?;

        // closes any open row so its time is counted
        self.coordinator.pause().await?;
        let report = guest
            .migrate(
                durable.as_ref(),
                ephemeral.as_ref(),
                &auth.user_id,
                &auth.display_name,
                self.clock.now_millis(),
            )
            .await?;
        Ok((next, report))
    }
}
