use std::sync::Arc;

use tokio::sync::watch;

use super::lifecycle::TaskCoordinator;
use crate::ports::Subscription;

/// Watch this user's presence on every device and yield the timer when another
/// room takes over. Enforced reactively; a second start is never blocked.
pub async fn run_guard_loop(
    coordinator: Arc<TaskCoordinator>,
    mut presence_changes: Subscription,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let change = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            change = presence_changes.changed() => change,
        };
        let Some(change) = change else {
            tracing::debug!("presence subscription closed");
            break;
        };

        if let Some(room) = coordinator.enforce_exclusivity().await {
            tracing::info!(path = %change.path, active_in = %room, "timer yielded to another room");
        }
    }
    tracing::debug!("exclusivity guard stopped");
}
