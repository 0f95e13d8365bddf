//! Timer engine: stopwatch and countdown with drift correction.
//!
//! The engine is a plain state machine driven by the caller's clock readings. It
//! performs no I/O; persistence and cues are returned as values in `TickOutcome`
//! and carried out by the coordinator.

use thiserror::Error;

use super::drift::{CorrectionLog, CorrectionSource, DriftCorrection, expected_elapsed};
use crate::domain::{EpochMillis, RunSegment, TimerMode};

pub const MIN_COUNTDOWN_MINUTES: u32 = 1;
pub const MAX_COUNTDOWN_MINUTES: u32 = 180;

/// Clamp a minutes-only duration input to [1, 180].
pub fn clamp_minutes(minutes: u32) -> u32 {
    minutes.clamp(MIN_COUNTDOWN_MINUTES, MAX_COUNTDOWN_MINUTES)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("timer is already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Emit a persist snapshot every this many elapsed seconds.
    pub snapshot_interval_secs: u64,
    pub drift_history: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: 5,
            drift_history: 10,
        }
    }
}

/// What one tick (or refocus) produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    pub elapsed: u64,
    /// Countdown only.
    pub remaining: Option<u64>,
    pub correction: Option<DriftCorrection>,
    /// Elapsed value to persist to the ephemeral store.
    pub snapshot: Option<u64>,
    /// Countdown hit zero on this tick; the engine is now paused.
    pub times_up: bool,
}

/// Result of editing the countdown duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationEdit {
    /// Set when the edit had to pause a running timer first.
    pub forced_pause: Option<u64>,
    pub remaining: u64,
}

#[derive(Debug, Clone)]
pub struct TimerEngine {
    mode: TimerMode,
    settings: EngineSettings,

    running: bool,
    start_time: Option<EpochMillis>,
    base_seconds: u64,
    displayed: u64,
    last_snapshot: u64,

    /// Duration new countdown cycles start with.
    configured_secs: u64,
    /// Length of the current countdown cycle.
    cycle_secs: u64,
    /// Elapsed value at which the current countdown cycle began.
    cycle_start: u64,
    times_up_fired: bool,

    corrections: CorrectionLog,
}

impl TimerEngine {
    /// A paused engine holding `elapsed` seconds.
    pub fn new(mode: TimerMode, countdown_minutes: u32, elapsed: u64, settings: EngineSettings) -> Self {
        let configured_secs = u64::from(clamp_minutes(countdown_minutes)) * 60;
        Self {
            mode,
            settings,
            running: false,
            start_time: None,
            base_seconds: elapsed,
            displayed: elapsed,
            last_snapshot: elapsed,
            configured_secs,
            cycle_secs: configured_secs,
            cycle_start: elapsed,
            times_up_fired: false,
            corrections: CorrectionLog::new(settings.drift_history),
        }
    }

    pub fn stopwatch(elapsed: u64, settings: EngineSettings) -> Self {
        Self::new(TimerMode::Stopwatch, MIN_COUNTDOWN_MINUTES, elapsed, settings)
    }

    pub fn countdown(minutes: u32, elapsed: u64, settings: EngineSettings) -> Self {
        Self::new(TimerMode::Countdown, minutes, elapsed, settings)
    }

    pub fn mode(&self) -> TimerMode {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Displayed elapsed seconds (as of the last reconciliation).
    pub fn elapsed(&self) -> u64 {
        self.displayed
    }

    /// The open run segment, if running.
    pub fn segment(&self) -> Option<RunSegment> {
        self.start_time
            .filter(|_| self.running)
            .map(|start| RunSegment::new(start, self.base_seconds))
    }

    pub fn corrections(&self) -> &CorrectionLog {
        &self.corrections
    }

    fn cycle_end(&self) -> u64 {
        self.cycle_start.saturating_add(self.cycle_secs)
    }

    /// Countdown seconds left, `None` in stopwatch mode.
    pub fn remaining(&self) -> Option<u64> {
        match self.mode {
            TimerMode::Stopwatch => None,
            TimerMode::Countdown => Some(self.cycle_end().saturating_sub(self.displayed)),
        }
    }

    /// Elapsed at `now` per the drift formula, capped at the countdown cycle end.
    pub fn expected(&self, now: EpochMillis) -> u64 {
        let Some(start) = self.start_time.filter(|_| self.running) else {
            return self.displayed;
        };
        let expected = expected_elapsed(self.base_seconds, start, now);
        match self.mode {
            TimerMode::Stopwatch => expected,
            TimerMode::Countdown => expected.min(self.cycle_end()),
        }
    }

    pub fn start(&mut self, now: EpochMillis) -> Result<RunSegment, TimerError> {
        if self.running {
            return Err(TimerError::AlreadyRunning);
        }
        if self.mode == TimerMode::Countdown && self.remaining() == Some(0) {
            // finished cycle: the next start begins a fresh one
            self.cycle_start = self.displayed;
            self.cycle_secs = self.configured_secs;
            self.times_up_fired = false;
        }
        self.running = true;
        self.start_time = Some(now);
        self.base_seconds = self.displayed;
        self.last_snapshot = self.displayed;
        Ok(RunSegment::new(now, self.base_seconds))
    }

    /// Close the current segment and return the elapsed total.
    pub fn pause(&mut self, now: EpochMillis) -> u64 {
        if self.running {
            self.displayed = self.expected(now);
            self.stop();
        }
        self.displayed
    }

    fn stop(&mut self) {
        self.running = false;
        self.start_time = None;
        self.base_seconds = self.displayed;
    }

    /// Scheduled 1-second tick.
    pub fn tick(&mut self, now: EpochMillis) -> TickOutcome {
        let naive = self.displayed.saturating_add(1);
        self.reconcile(now, naive, CorrectionSource::Tick)
    }

    /// Visibility regained or window focused: snap right away.
    pub fn refocus(&mut self, now: EpochMillis) -> TickOutcome {
        let shown = self.displayed;
        self.reconcile(now, shown, CorrectionSource::Refocus)
    }

    fn reconcile(&mut self, now: EpochMillis, shown: u64, source: CorrectionSource) -> TickOutcome {
        if !self.running {
            return self.outcome(None, None, false);
        }

        let expected = self.expected(now);
        let correction = (expected != shown).then(|| DriftCorrection {
            at: now,
            from: shown,
            to: expected,
            source,
        });
        if let Some(c) = correction {
            self.corrections.record(c);
        }
        self.displayed = expected;

        let interval = self.settings.snapshot_interval_secs.max(1);
        let snapshot = (self.displayed / interval > self.last_snapshot / interval).then(|| {
            self.last_snapshot = self.displayed;
            self.displayed
        });

        let mut times_up = false;
        if self.mode == TimerMode::Countdown && self.displayed >= self.cycle_end() {
            self.stop();
            if !self.times_up_fired {
                self.times_up_fired = true;
                times_up = true;
            }
        }

        self.outcome(correction, snapshot, times_up)
    }

    fn outcome(
        &self,
        correction: Option<DriftCorrection>,
        snapshot: Option<u64>,
        times_up: bool,
    ) -> TickOutcome {
        TickOutcome {
            elapsed: self.displayed,
            remaining: self.remaining(),
            correction,
            snapshot,
            times_up,
        }
    }

    /// Edit the countdown length. A running timer is paused first; the sub-minute
    /// part of the remaining time is kept (12:34 edited to 20 minutes gives 20:34).
    pub fn set_countdown_minutes(&mut self, minutes: u32, now: EpochMillis) -> DurationEdit {
        let forced_pause = self.running.then(|| self.pause(now));
        let minutes_secs = u64::from(clamp_minutes(minutes)) * 60;
        let remaining_before = self.cycle_end().saturating_sub(self.displayed);
        let remaining = minutes_secs + remaining_before % 60;

        self.configured_secs = minutes_secs;
        self.cycle_secs = self.displayed.saturating_sub(self.cycle_start) + remaining;
        self.times_up_fired = false;

        DurationEdit {
            forced_pause,
            remaining,
        }
    }

    /// Switch between stopwatch and countdown. A running timer is paused first.
    pub fn set_mode(&mut self, mode: TimerMode, now: EpochMillis) -> Option<u64> {
        if mode == self.mode {
            return None;
        }
        let forced_pause = self.running.then(|| self.pause(now));
        self.mode = mode;
        self.cycle_start = self.displayed;
        self.cycle_secs = self.configured_secs;
        self.times_up_fired = false;
        forced_pause
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const T0: EpochMillis = 1_700_000_000_000;

    fn secs(s: i64) -> EpochMillis {
        T0 + s * 1000
    }

    #[test]
    fn stopwatch_counts_from_base() {
        let mut engine = TimerEngine::stopwatch(30, EngineSettings::default());
        engine.start(T0).unwrap();
        let out = engine.tick(secs(1));
        assert_eq!(out.elapsed, 31);
        assert!(out.correction.is_none());
        assert_eq!(engine.pause(secs(90)), 120);
        assert!(!engine.is_running());
    }

    #[test]
    fn start_twice_is_an_error() {
        let mut engine = TimerEngine::stopwatch(0, EngineSettings::default());
        engine.start(T0).unwrap();
        assert_eq!(engine.start(secs(1)), Err(TimerError::AlreadyRunning));
    }

    #[test]
    fn backgrounded_tick_snaps_instead_of_incrementing() {
        let mut engine = TimerEngine::stopwatch(0, EngineSettings::default());
        engine.start(T0).unwrap();
        engine.tick(secs(1));
        // tab suspended for a minute; the next tick lands late
        let out = engine.tick(secs(61));
        assert_eq!(out.elapsed, 61);
        let c = out.correction.unwrap();
        assert_eq!((c.from, c.to, c.source), (2, 61, CorrectionSource::Tick));
        assert_eq!(engine.corrections().len(), 1);
    }

    #[test]
    fn refocus_snaps_without_waiting_for_tick() {
        let mut engine = TimerEngine::stopwatch(10, EngineSettings::default());
        engine.start(T0).unwrap();
        let out = engine.refocus(secs(300));
        assert_eq!(out.elapsed, 310);
        assert_eq!(out.correction.map(|c| c.source), Some(CorrectionSource::Refocus));
        // nothing moved since: no correction
        assert!(engine.refocus(secs(300)).correction.is_none());
    }

    #[test]
    fn snapshot_every_five_elapsed_seconds() {
        let mut engine = TimerEngine::stopwatch(0, EngineSettings::default());
        engine.start(T0).unwrap();
        let snapshots: Vec<u64> = (1..=12)
            .filter_map(|s| engine.tick(secs(s)).snapshot)
            .collect();
        assert_eq!(snapshots, vec![5, 10]);
    }

    #[test]
    fn snapshot_after_long_gap_is_single() {
        let mut engine = TimerEngine::stopwatch(0, EngineSettings::default());
        engine.start(T0).unwrap();
        assert_eq!(engine.tick(secs(23)).snapshot, Some(23));
        assert_eq!(engine.tick(secs(24)).snapshot, None);
        assert_eq!(engine.tick(secs(25)).snapshot, Some(25));
    }

    #[test]
    fn countdown_auto_pauses_and_signals_once() {
        let mut engine = TimerEngine::countdown(1, 0, EngineSettings::default());
        engine.start(T0).unwrap();
        let mut fired = 0;
        for s in 1..=60 {
            if engine.tick(secs(s)).times_up {
                fired += 1;
            }
        }
        assert_eq!(engine.remaining(), Some(0));
        assert!(!engine.is_running());
        // re-renders at zero must not signal again
        for s in 61..=65 {
            assert!(!engine.tick(secs(s)).times_up);
            assert!(!engine.refocus(secs(s)).times_up);
        }
        assert_eq!(fired, 1);
        assert_eq!(engine.elapsed(), 60);
    }

    #[test]
    fn countdown_caps_elapsed_after_long_background() {
        let mut engine = TimerEngine::countdown(1, 0, EngineSettings::default());
        engine.start(T0).unwrap();
        let out = engine.refocus(secs(600));
        assert!(out.times_up);
        assert_eq!(out.elapsed, 60);
        assert_eq!(out.remaining, Some(0));
    }

    #[test]
    fn restarting_finished_countdown_begins_new_cycle() {
        let mut engine = TimerEngine::countdown(1, 0, EngineSettings::default());
        engine.start(T0).unwrap();
        engine.tick(secs(60));
        engine.start(secs(70)).unwrap();
        let out = engine.tick(secs(100));
        assert_eq!(out.elapsed, 90);
        assert_eq!(out.remaining, Some(30));
        assert!(engine.tick(secs(130)).times_up);
    }

    #[test]
    fn editing_duration_while_paused_keeps_sub_minute_remainder() {
        let mut engine = TimerEngine::countdown(25, 0, EngineSettings::default());
        engine.start(T0).unwrap();
        // 25:00 - 12:26 elapsed = 12:34 remaining
        engine.pause(secs(746));
        assert_eq!(engine.remaining(), Some(754));
        let edit = engine.set_countdown_minutes(20, secs(800));
        assert_eq!(edit.forced_pause, None);
        assert_eq!(edit.remaining, 20 * 60 + 34);
        assert_eq!(engine.remaining(), Some(20 * 60 + 34));
    }

    #[test]
    fn editing_duration_while_running_forces_pause() {
        let mut engine = TimerEngine::countdown(25, 0, EngineSettings::default());
        engine.start(T0).unwrap();
        let edit = engine.set_countdown_minutes(10, secs(30));
        assert_eq!(edit.forced_pause, Some(30));
        assert!(!engine.is_running());
        assert_eq!(edit.remaining, 10 * 60 + 30);
    }

    #[rstest]
    #[case::zero(0, 1)]
    #[case::normal(25, 25)]
    #[case::max(180, 180)]
    #[case::over(500, 180)]
    fn minutes_are_clamped(#[case] input: u32, #[case] expected: u32) {
        assert_eq!(clamp_minutes(input), expected);
    }

    #[test]
    fn switching_mode_pauses_running_timer() {
        let mut engine = TimerEngine::stopwatch(0, EngineSettings::default());
        engine.start(T0).unwrap();
        assert_eq!(engine.set_mode(TimerMode::Countdown, secs(40)), Some(40));
        assert_eq!(engine.mode(), TimerMode::Countdown);
        assert_eq!(engine.remaining(), Some(60));
        assert_eq!(engine.set_mode(TimerMode::Countdown, secs(41)), None);
    }
}
