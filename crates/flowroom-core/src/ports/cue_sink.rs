//! CueSink port - クライアント内の音・表示の合図
//!
//! Cues never leave the client. The coordinator emits them synchronously and
//! never waits on them.

use crate::domain::ClientCue;

pub trait CueSink: Send + Sync {
    fn emit(&self, cue: ClientCue);
}

/// Drops every cue (headless sessions).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCueSink;

impl CueSink for NoopCueSink {
    fn emit(&self, cue: ClientCue) {
        tracing::trace!(?cue, "cue dropped");
    }
}
