//! ScoringEngine - grading responses against the beat grid
//!
//! Each response (manual tap or acoustic hit) is located on the beat grid by
//! its elapsed time since the session started running:
//!
//! - `phase = elapsed mod interval`
//! - `distance = min(phase, interval - phase)`
//! - `distance < perfect window` → Perfect, `< good window` → Good, else Missed
//!
//! Every beat can be answered once. A second response for the same beat is
//! Extra. An acoustic hit at least the extra window away from every beat
//! belongs to no beat and is Extra rather than Missed; closer than that it
//! is Missed and claims the beat. Counters only grow until `reset()`.

use serde::{Deserialize, Serialize};

use crate::audio::metronome::BeatGrid;
use crate::config::ScoringConfig;

/// Grade assigned to a single response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Perfect,
    Good,
    Missed,
    Extra,
}

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Manual,
    Acoustic,
}

/// Timing windows in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingWindows {
    pub perfect_secs: f64,
    pub good_secs: f64,
    /// Acoustic hits at or beyond this distance are not attempts at a beat
    pub extra_secs: f64,
}

impl Default for TimingWindows {
    fn default() -> Self {
        Self::from(&ScoringConfig::default())
    }
}

impl From<&ScoringConfig> for TimingWindows {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            perfect_secs: config.perfect_window_secs,
            good_secs: config.good_window_secs,
            extra_secs: config.extra_window_secs,
        }
    }
}

/// Outcome of grading one response, published to the display layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Judgement {
    pub grade: Grade,
    pub source: ResponseSource,
    /// Beat the response was matched to, `None` for an empty grid
    pub beat_index: Option<u32>,
    pub elapsed_secs: f64,
    pub distance_secs: f64,
}

/// Session statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreCounters {
    pub perfect: u32,
    pub good: u32,
    pub missed: u32,
    pub skipped: u32,
    pub extra: u32,
}

impl ScoreCounters {
    /// Responses that were matched to a beat
    pub fn answered(&self) -> u32 {
        self.perfect + self.good + self.missed
    }
}

/// Final statistics computed when a session finishes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub counters: ScoreCounters,
    pub total_beats: u32,
    /// (perfect + good) / total beats, 0.0 for an empty grid
    pub accuracy: f64,
}

impl SessionSummary {
    pub fn accuracy_percent(&self) -> f64 {
        self.accuracy * 100.0
    }
}

/// Distance in seconds from `elapsed_secs` to the nearest beat.
///
/// Pure function of its inputs; returns infinity for a non-positive interval
/// or a non-finite elapsed time.
#[inline]
pub fn beat_distance(elapsed_secs: f64, interval_secs: f64) -> f64 {
    if interval_secs <= 0.0 || !elapsed_secs.is_finite() {
        return f64::INFINITY;
    }
    let phase = elapsed_secs.rem_euclid(interval_secs);
    phase.min(interval_secs - phase)
}

/// Grade a distance against the windows (never returns Extra)
#[inline]
pub fn grade_for_distance(distance_secs: f64, windows: &TimingWindows) -> Grade {
    if distance_secs < windows.perfect_secs {
        Grade::Perfect
    } else if distance_secs < windows.good_secs {
        Grade::Good
    } else {
        Grade::Missed
    }
}

/// Grades responses and accumulates counters for one session
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    grid: BeatGrid,
    windows: TimingWindows,
    counters: ScoreCounters,
    claimed: Vec<bool>,
}

impl ScoringEngine {
    pub fn new(grid: BeatGrid, windows: TimingWindows) -> Self {
        Self {
            claimed: vec![false; grid.total_beats() as usize],
            grid,
            windows,
            counters: ScoreCounters::default(),
        }
    }

    /// Grade an elapsed time without touching any state.
    pub fn classify(&self, elapsed_secs: f64) -> Grade {
        grade_for_distance(
            beat_distance(elapsed_secs, self.grid.beat_interval_secs()),
            &self.windows,
        )
    }

    /// Grade a response and record it in the counters.
    pub fn judge(&mut self, elapsed_secs: f64, source: ResponseSource) -> Judgement {
        let interval = self.grid.beat_interval_secs();
        let distance_secs = beat_distance(elapsed_secs, interval);
        let beat_index = self.nearest_beat(elapsed_secs);

        let grade = match beat_index {
            None => Grade::Extra,
            Some(index) if self.claimed[index as usize] => Grade::Extra,
            Some(index) => match (grade_for_distance(distance_secs, &self.windows), source) {
                (Grade::Missed, ResponseSource::Acoustic)
                    if distance_secs >= self.windows.extra_secs =>
                {
                    Grade::Extra
                }
                (grade, _) => {
                    self.claimed[index as usize] = true;
                    grade
                }
            },
        };

        self.record(grade);

        Judgement {
            grade,
            source,
            beat_index,
            elapsed_secs,
            distance_secs,
        }
    }

    fn nearest_beat(&self, elapsed_secs: f64) -> Option<u32> {
        let total = self.grid.total_beats();
        if total == 0 || !elapsed_secs.is_finite() {
            return None;
        }
        let nearest = (elapsed_secs / self.grid.beat_interval_secs()).round();
        Some(nearest.clamp(0.0, (total - 1) as f64) as u32)
    }

    fn record(&mut self, grade: Grade) {
        let counter = match grade {
            Grade::Perfect => &mut self.counters.perfect,
            Grade::Good => &mut self.counters.good,
            Grade::Missed => &mut self.counters.missed,
            Grade::Extra => &mut self.counters.extra,
        };
        *counter = counter.saturating_add(1);
    }

    /// Compute skipped beats and accuracy. Counters keep their values.
    pub fn finalize(&mut self) -> SessionSummary {
        let total_beats = self.grid.total_beats();
        self.counters.skipped = total_beats.saturating_sub(self.counters.answered());

        let accuracy = if total_beats > 0 {
            (self.counters.perfect + self.counters.good) as f64 / total_beats as f64
        } else {
            0.0
        };

        SessionSummary {
            counters: self.counters,
            total_beats,
            accuracy,
        }
    }

    /// Zero every counter and forget which beats were answered.
    pub fn reset(&mut self) {
        self.counters = ScoreCounters::default();
        self.claimed.iter_mut().for_each(|claimed| *claimed = false);
    }

    pub fn counters(&self) -> ScoreCounters {
        self.counters
    }

    pub fn grid(&self) -> &BeatGrid {
        &self.grid
    }

    pub fn windows(&self) -> &TimingWindows {
        &self.windows
    }
}
