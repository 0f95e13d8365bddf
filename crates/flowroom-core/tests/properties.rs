//! Property tests: drift formula and the one-active-task invariant.

use std::sync::Arc;

use flowroom_core::app::{ContextBuilder, SessionContext};
use flowroom_core::config::FlowConfig;
use flowroom_core::domain::{
    AuthenticatedSession, RoomId, Session, SessionId, TaskStatus, UserId,
};
use flowroom_core::impls::{InMemoryDurableStore, InMemoryEphemeralStore};
use flowroom_core::ports::FixedClock;
use flowroom_core::timer::{EngineSettings, TimerEngine, expected_elapsed};
use proptest::prelude::*;
use ulid::Ulid;

const T0: i64 = 1_700_000_000_000;

#[derive(Debug, Clone, Copy)]
enum Wake {
    Tick,
    Refocus,
}

fn wake() -> impl Strategy<Value = Wake> {
    prop_oneof![Just(Wake::Tick), Just(Wake::Refocus)]
}

proptest! {
    /// However long the tab slept, the displayed value snaps to the formula exactly.
    #[test]
    fn reconciled_elapsed_matches_the_formula(
        base in 0u64..100_000,
        steps in prop::collection::vec((0i64..600_000, wake()), 1..40),
    ) {
        let mut engine = TimerEngine::stopwatch(base, EngineSettings::default());
        let segment = engine.start(T0).unwrap();
        prop_assert_eq!(segment.base_seconds, base);

        let mut now = T0;
        for (gap_ms, how) in steps {
            now += gap_ms;
            let outcome = match how {
                Wake::Tick => engine.tick(now),
                Wake::Refocus => engine.refocus(now),
            };
            prop_assert_eq!(outcome.elapsed, expected_elapsed(base, T0, now));
            prop_assert_eq!(engine.elapsed(), base + ((now - T0) / 1000) as u64);
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Start(usize),
    Pause,
    Wait(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..2).prop_map(Op::Start),
        Just(Op::Pause),
        (1u64..120).prop_map(Op::Wait),
    ]
}

const NAMES: [&str; 2] = ["Write report", "Review PR"];

fn context(clock: &Arc<FixedClock>) -> SessionContext {
    ContextBuilder::new(FlowConfig::default())
        .session(Session::Authenticated(AuthenticatedSession {
            user_id: UserId::new("alice"),
            display_name: "Alice".into(),
            session_id: SessionId::from_ulid(Ulid::new()),
        }))
        .room(RoomId::new("library"))
        .clock(clock.clone())
        .ephemeral(Arc::new(InMemoryEphemeralStore::new(clock.clone())))
        .durable(Arc::new(InMemoryDurableStore::new(clock.clone())))
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn at_most_one_task_in_progress(ops in prop::collection::vec(op(), 1..30)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let violation = rt.block_on(async {
            let clock = Arc::new(FixedClock::from_millis(T0));
            let ctx = context(&clock);
            ctx.start().await.unwrap();
            let coordinator = ctx.coordinator();

            for op in ops {
                match op {
                    Op::Start(i) => {
                        coordinator.start(NAMES[i]).await.unwrap();
                    }
                    Op::Pause => {
                        coordinator.pause().await.unwrap();
                    }
                    Op::Wait(secs) => clock.advance_secs(secs),
                }
                let running = coordinator
                    .tasks()
                    .await
                    .iter()
                    .filter(|t| t.status == TaskStatus::InProgress)
                    .count();
                if running > 1 {
                    return Some(running);
                }
            }
            None
        });
        prop_assert_eq!(violation, None);
    }
}
