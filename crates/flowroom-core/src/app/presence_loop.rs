use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::presence::PresenceTracker;

/// Keep this session's `last_seen` fresh while it stays connected.
pub async fn run_presence_loop(
    presence: Arc<PresenceTracker>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately and join already wrote the record
    interval.tick().await;

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

        if let Err(e) = presence.refresh().await {
            tracing::warn!(
                user_id = %presence.user_id(),
                session = %presence.session_id(),
                error = %e,
                "presence heartbeat failed"
            );
        }
    }
    tracing::debug!("presence loop stopped");
}
