//! TickLoop - 表示用の 1 秒 tick
//!
//! tick は表示値と drift 補正のためだけに回る。経過時間の真実は
//! `startTime` と `baseSeconds` 側にあるので、tick が遅れても失われる時間はない。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::lifecycle::TaskCoordinator;

pub async fn run_tick_loop(
    coordinator: Arc<TaskCoordinator>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    // a late tick is reconciled from the clock, catching up would only repeat it
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

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

        if let Some(outcome) = coordinator.tick().await {
            if outcome.times_up {
                tracing::info!(elapsed = outcome.elapsed, "countdown finished");
            }
        }
    }
    tracing::debug!("tick loop stopped");
}
