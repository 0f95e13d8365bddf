use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle over a set of background loops.
/// - `request_shutdown()` でループ全体に停止を伝える
/// - `shutdown_and_join()` で全ループの終了を待てる
pub struct LoopHandle {
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    joins: Vec<(&'static str, JoinHandle<()>)>,
}

impl LoopHandle {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            shutdown_rx,
            joins: Vec::new(),
        }
    }

    /// Spawn a loop. It receives its own shutdown receiver.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, f: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let rx = self.shutdown_rx.clone();
        let join = tokio::spawn(f(rx));
        tracing::debug!(loop_name = name, "loop spawned");
        self.joins.push((name, join));
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Loops finish their current iteration; nothing is cancelled mid-write.
    pub fn request_shutdown(&self) {
        // receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for (name, join) in self.joins {
            if let Err(e) = join.await {
                tracing::warn!(loop_name = name, error = %e, "loop ended abnormally");
            }
        }
    }
}

impl Default for LoopHandle {
    fn default() -> Self {
        Self::new()
    }
}
