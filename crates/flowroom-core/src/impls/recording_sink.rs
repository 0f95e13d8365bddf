//! RecordingCueSink - 発行された合図を記録する（テスト・CLI 用）

use std::sync::Mutex;

use crate::domain::ClientCue;
use crate::ports::CueSink;

#[derive(Debug, Default)]
pub struct RecordingCueSink {
    cues: Mutex<Vec<ClientCue>>,
}

impl RecordingCueSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cues(&self) -> Vec<ClientCue> {
        self.cues
            .lock()
            .map(|c| c.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn count(&self, matches: impl Fn(&ClientCue) -> bool) -> usize {
        self.cues().iter().filter(|c| matches(c)).count()
    }
}

impl CueSink for RecordingCueSink {
    fn emit(&self, cue: ClientCue) {
        tracing::debug!(?cue, "client cue");
        match self.cues.lock() {
            Ok(mut cues) => cues.push(cue),
            Err(poisoned) => poisoned.into_inner().push(cue),
        }
    }
}
