//! `flowroom` - drive the focus-timer core from the command line.
//!
//! Everything runs against in-memory stores on a simulated clock, so a
//! 25-minute session plays out instantly.
//!
//! # Usage
//!
//! ```bash
//! # One task through start, pause, resume and complete
//! cargo run --bin flowroom -- simulate --task "Write report" --focus-secs 900
//!
//! # A one-minute countdown that auto-pauses at zero
//! cargo run --bin flowroom -- simulate --countdown-minutes 1
//!
//! # Leave some sessions silent and sweep them
//! cargo run --bin flowroom -- sweep --sessions 4 --silent 2
//!
//! # Config file and log level (flags win over the file)
//! FLOWROOM_LOG=debug cargo run --bin flowroom -- --config flowroom.toml simulate
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use flowroom_core::app::{ContextBuilder, PresenceSweeper, PresenceTracker, SessionContext};
use flowroom_core::config::{FlowConfig, FlowOverrides};
use flowroom_core::domain::{
    AuthenticatedSession, GuestSession, RoomId, Session, TimerMode, UserId,
};
use flowroom_core::impls::{InMemoryDurableStore, InMemoryEphemeralStore, RecordingCueSink};
use flowroom_core::ports::{Clock, FixedClock, IdGenerator, UlidGenerator};

#[derive(Debug, Parser)]
#[command(name = "flowroom", version, about = "Collaborative focus timer core")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short, env = "FLOWROOM_CONFIG")]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error).
    #[arg(long, env = "FLOWROOM_LOG")]
    log_level: Option<String>,

    #[arg(long, env = "FLOWROOM_TICK_MS")]
    tick_interval_ms: Option<u64>,

    #[arg(long, env = "FLOWROOM_HEARTBEAT_SECS")]
    heartbeat_secs: Option<u64>,

    #[arg(long, env = "FLOWROOM_STALENESS_SECS")]
    staleness_secs: Option<u64>,

    #[arg(long, env = "FLOWROOM_SWEEP_SECS")]
    sweep_secs: Option<u64>,

    /// Where guest tasks are kept.
    #[arg(long, env = "FLOWROOM_CACHE")]
    cache_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one task through its lifecycle on a simulated clock.
    Simulate {
        #[arg(long, default_value = "Write report")]
        task: String,

        /// Seconds of focus before completing (split around one pause).
        #[arg(long, default_value_t = 1500)]
        focus_secs: u64,

        /// Use a countdown of this many minutes instead of the stopwatch.
        #[arg(long)]
        countdown_minutes: Option<u32>,

        #[arg(long, default_value = "library")]
        room: String,

        /// Simulate without an account (local cache only).
        #[arg(long)]
        guest: bool,
    },

    /// Populate a room, let some sessions go silent, then sweep.
    Sweep {
        #[arg(long, default_value_t = 3)]
        sessions: usize,

        #[arg(long, default_value_t = 1)]
        silent: usize,

        #[arg(long, default_value = "library")]
        room: String,
    },
}

impl Cli {
    fn overrides(&self) -> FlowOverrides {
        FlowOverrides {
            tick_interval_ms: self.tick_interval_ms,
            heartbeat_interval_secs: self.heartbeat_secs,
            staleness_threshold_secs: self.staleness_secs,
            sweep_interval_secs: self.sweep_secs,
            cache_path: self.cache_path.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match FlowConfig::load(cli.config.as_deref(), &cli.overrides()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let result = match cli.command {
        Command::Simulate {
            task,
            focus_secs,
            countdown_minutes,
            room,
            guest,
        } => simulate(config, &task, focus_secs, countdown_minutes, room, guest).await,
        Command::Sweep {
            sessions,
            silent,
            room,
        } => sweep(config, sessions, silent, room).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        std::process::exit(1);
    }
}

/// 2023-11-14T22:13:20Z, any fixed instant will do.
const SIMULATION_START_MS: i64 = 1_700_000_000_000;

fn simulated_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::from_millis(SIMULATION_START_MS))
}

async fn advance(ctx: &SessionContext, clock: &FixedClock, secs: u64) {
    for _ in 0..secs {
        clock.advance_secs(1);
        if let Some(outcome) = ctx.coordinator().tick().await {
            if outcome.times_up {
                tracing::info!(elapsed = outcome.elapsed, "time's up");
            }
        }
    }
}

async fn simulate(
    config: FlowConfig,
    task: &str,
    focus_secs: u64,
    countdown_minutes: Option<u32>,
    room: String,
    guest: bool,
) -> Result<(), Box<dyn Error>> {
    let clock = simulated_clock();
    let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
    let ephemeral = Arc::new(InMemoryEphemeralStore::new(clock.clone()));
    let durable = Arc::new(InMemoryDurableStore::new(clock.clone()));
    let cues = Arc::new(RecordingCueSink::new());

    let session = if guest {
        Session::Guest(GuestSession {
            local_id: UserId::new("guest"),
            session_id: ids.generate_session_id(),
        })
    } else {
        Session::Authenticated(AuthenticatedSession {
            user_id: UserId::new("demo"),
            display_name: "Demo".to_string(),
            session_id: ids.generate_session_id(),
        })
    };

    let ctx = ContextBuilder::new(config)
        .session(session)
        .room(RoomId::new(room))
        .clock(clock.clone())
        .ids(ids)
        .ephemeral(ephemeral.clone())
        .durable(durable.clone())
        .cues(cues.clone())
        .build()?;
    ctx.start().await?;
    let coordinator = ctx.coordinator();

    if let Some(minutes) = countdown_minutes {
        coordinator.set_mode(TimerMode::Countdown).await;
        let edit = coordinator.set_countdown_minutes(minutes).await;
        tracing::info!(remaining = edit.remaining, "countdown configured");
    }

    coordinator.start(task).await?;
    let first = focus_secs / 2;
    advance(&ctx, &clock, first).await;
    let paused = coordinator.pause().await?;
    tracing::info!(elapsed = paused.elapsed, "paused for a break");

    clock.advance_secs(300);
    if coordinator.view().await.remaining != Some(0) {
        coordinator.resume().await?;
        advance(&ctx, &clock, focus_secs - first).await;
    }

    let done = coordinator.complete(None).await?;
    let leaderboard = match ctx.leaderboard() {
        Some(board) => board.entries().await,
        None => Vec::new(),
    };
    let summary = serde_json::json!({
        "task_id": done.task_id.to_string(),
        "duration_secs": done.duration_secs,
        "guest": ctx.session().is_guest(),
        "cues": cues.cues().iter().map(|c| format!("{c:?}")).collect::<Vec<_>>(),
        "drift_corrections": coordinator.corrections().await.len(),
        "leaderboard": leaderboard,
        "ephemeral_after": ephemeral.snapshot().await,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn sweep(
    config: FlowConfig,
    sessions: usize,
    silent: usize,
    room: String,
) -> Result<(), Box<dyn Error>> {
    let clock = simulated_clock();
    let ids = UlidGenerator::new(Arc::clone(&clock));
    let store = Arc::new(InMemoryEphemeralStore::new(clock.clone()));
    let room = RoomId::new(room);

    let mut trackers = Vec::with_capacity(sessions);
    for n in 0..sessions {
        let tracker = PresenceTracker::new(
            store.clone(),
            clock.clone(),
            UserId::new(format!("user-{n}")),
            ids.generate_session_id(),
            config.freshness_ms(),
        );
        tracker.join(room.clone()).await?;
        tracker.set_active(n % 2 == 0).await?;
        trackers.push(tracker);
    }

    // only the talkative ones keep their heartbeat going
    let half = config.staleness_threshold_secs / 2 + 1;
    clock.advance_secs(half);
    for tracker in trackers.iter().skip(silent) {
        tracker.refresh().await?;
    }
    clock.advance_secs(half);

    let observer = trackers.last();
    let before = match observer {
        Some(t) => t.room_members(&room).await?.len(),
        None => 0,
    };

    let sweeper = PresenceSweeper::new(
        store.clone(),
        clock.clone(),
        config.staleness_ms(),
        config.freshness_ms(),
    );
    let report = sweeper.sweep_once().await?;

    let after = match observer {
        Some(t) => t.room_members(&room).await?.len(),
        None => 0,
    };
    let summary = serde_json::json!({
        "sessions": sessions,
        "silent": silent,
        "members_before": before,
        "members_after": after,
        "removed_sessions": report.removed_sessions,
        "rooms_rebuilt": report.rooms_rebuilt,
        "index_corrections": report.index_corrections,
        "failures": report.failures,
        "at": clock.now().to_rfc3339(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
