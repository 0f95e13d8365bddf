//! Drift correction.
//!
//! `expected(now) = base_seconds + floor((now - start_time) / 1000)` is the only
//! source of truth for elapsed time. Interval timers get throttled or suspended in
//! background tabs, so the displayed value is snapped to this formula instead of
//! being incremented.

use std::collections::VecDeque;

use crate::domain::EpochMillis;

/// Elapsed seconds of a run segment at `now`. A clock that moved backwards yields
/// `base_seconds`, never less.
pub fn expected_elapsed(base_seconds: u64, start_time: EpochMillis, now: EpochMillis) -> u64 {
    let delta_ms = now.saturating_sub(start_time).max(0);
    base_seconds.saturating_add((delta_ms / 1000) as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionSource {
    Tick,
    Refocus,
}

/// One snap of the displayed value. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftCorrection {
    pub at: EpochMillis,
    pub from: u64,
    pub to: u64,
    pub source: CorrectionSource,
}

impl DriftCorrection {
    pub fn delta(&self) -> i64 {
        self.to as i64 - self.from as i64
    }
}

/// Bounded history of the most recent corrections.
#[derive(Debug, Clone)]
pub struct CorrectionLog {
    entries: VecDeque<DriftCorrection>,
    capacity: usize,
}

impl CorrectionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, correction: DriftCorrection) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(correction);
    }

    pub fn iter(&self) -> impl Iterator<Item = &DriftCorrection> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&DriftCorrection> {
        self.entries.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::same_instant(30, 1_000, 1_000, 30)]
    #[case::sub_second_floors(0, 0, 999, 0)]
    #[case::ninety_seconds(30, 10_000, 100_000, 120)]
    #[case::partial_second(5, 0, 2_500, 7)]
    #[case::clock_went_backwards(12, 50_000, 40_000, 12)]
    fn formula(
        #[case] base: u64,
        #[case] start: EpochMillis,
        #[case] now: EpochMillis,
        #[case] expected: u64,
    ) {
        assert_eq!(expected_elapsed(base, start, now), expected);
    }

    #[test]
    fn log_keeps_most_recent_ten() {
        let mut log = CorrectionLog::new(10);
        for i in 0..15u64 {
            log.record(DriftCorrection {
                at: i as i64,
                from: i,
                to: i + 3,
                source: CorrectionSource::Tick,
            });
        }
        assert_eq!(log.len(), 10);
        assert_eq!(log.iter().next().map(|c| c.from), Some(5));
        assert_eq!(log.latest().map(|c| c.delta()), Some(3));
    }
}
