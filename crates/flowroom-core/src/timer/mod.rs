//! Timer engine: elapsed/remaining computation, drift correction, inactivity.

pub mod drift;
pub mod engine;
pub mod inactivity;

pub use self::drift::{CorrectionLog, CorrectionSource, DriftCorrection, expected_elapsed};
pub use self::engine::{
    DurationEdit, EngineSettings, TickOutcome, TimerEngine, TimerError, clamp_minutes,
};
pub use self::inactivity::{InactivityMonitor, InactivityState};
