//! Metronome - beat grid, clock state machine and click sample
//!
//! This module holds the timing side of a session:
//! - `BeatGrid`: tempo/duration pair with the derived interval and beat count
//! - `BeatClock`: Idle → Countdown → Running → Finished state machine driven
//!   by externally scheduled ticks (see `audio::scheduler`)
//! - `generate_click_sample`: deterministic 20ms noise burst for playback
//!
//! The clock never reads a system clock itself. Every transition takes the
//! instant it happened at, which keeps it deterministic under test.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::{DURATION_RANGE_SECS, TEMPO_RANGE_BPM};
use crate::error::SessionError;

/// Duration of metronome click in milliseconds
const CLICK_DURATION_MS: f32 = 20.0;

/// Tempo and duration of a session with the values derived from them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatGrid {
    tempo_bpm: u32,
    duration_secs: u32,
}

impl BeatGrid {
    /// Build a grid, rejecting values outside the supported ranges.
    pub fn new(tempo_bpm: u32, duration_secs: u32) -> Result<Self, SessionError> {
        if !TEMPO_RANGE_BPM.contains(&tempo_bpm) {
            return Err(SessionError::TempoOutOfRange { bpm: tempo_bpm });
        }
        if !DURATION_RANGE_SECS.contains(&duration_secs) {
            return Err(SessionError::DurationOutOfRange {
                seconds: duration_secs,
            });
        }
        Ok(Self {
            tempo_bpm,
            duration_secs,
        })
    }

    pub fn tempo_bpm(&self) -> u32 {
        self.tempo_bpm
    }

    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    /// Seconds between consecutive beats: 60 / tempo
    #[inline]
    pub fn beat_interval_secs(&self) -> f64 {
        60.0 / self.tempo_bpm as f64
    }

    #[inline]
    pub fn beat_interval(&self) -> Duration {
        Duration::from_secs_f64(self.beat_interval_secs())
    }

    /// floor(duration · tempo / 60), exact in integer arithmetic
    #[inline]
    pub fn total_beats(&self) -> u32 {
        self.duration_secs * self.tempo_bpm / 60
    }
}

/// Lifecycle phase of a session clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Countdown,
    Running,
    Finished,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Idle => "Idle",
            SessionPhase::Countdown => "Countdown",
            SessionPhase::Running => "Running",
            SessionPhase::Finished => "Finished",
        };
        f.write_str(name)
    }
}

/// Clock state exposed to the display layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub countdown_remaining: u32,
    pub current_beat_index: u32,
    pub elapsed_secs: f64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            countdown_remaining: 0,
            current_beat_index: 0,
            elapsed_secs: 0.0,
        }
    }
}

/// What a clock transition did. Every variant except `Ignored` plays a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    /// Countdown click; `remaining` clicks left before running
    CountdownClick { remaining: u32 },
    /// Countdown reached zero; beat 0 starts now
    RunningStarted,
    /// Beat `index` while running
    Beat { index: u32 },
    /// Final click; the clock is finished
    Finished { index: u32 },
    /// Tick arrived outside Countdown/Running
    Ignored,
}

impl ClockEvent {
    pub fn emits_click(&self) -> bool {
        !matches!(self, ClockEvent::Ignored)
    }
}

/// Periodic state machine producing countdown and beat events
#[derive(Debug, Clone)]
pub struct BeatClock {
    grid: BeatGrid,
    countdown_beats: u32,
    state: SessionState,
    started_at: Option<Instant>,
}

impl BeatClock {
    pub fn new(grid: BeatGrid, countdown_beats: u32) -> Self {
        Self {
            grid,
            countdown_beats,
            state: SessionState::default(),
            started_at: None,
        }
    }

    /// Idle → Countdown. The returned event always carries a click.
    pub fn start(&mut self, now: Instant) -> Result<ClockEvent, SessionError> {
        if self.state.phase != SessionPhase::Idle {
            return Err(SessionError::InvalidState {
                expected: SessionPhase::Idle.to_string(),
                actual: self.state.phase.to_string(),
            });
        }

        if self.countdown_beats == 0 {
            self.enter_running(now);
            return Ok(ClockEvent::RunningStarted);
        }

        self.state.phase = SessionPhase::Countdown;
        self.state.countdown_remaining = self.countdown_beats;
        Ok(ClockEvent::CountdownClick {
            remaining: self.countdown_beats,
        })
    }

    /// Advance the clock by one scheduled tick.
    pub fn tick(&mut self, now: Instant) -> ClockEvent {
        match self.state.phase {
            SessionPhase::Countdown => {
                self.state.countdown_remaining = self.state.countdown_remaining.saturating_sub(1);
                if self.state.countdown_remaining == 0 {
                    self.enter_running(now);
                    ClockEvent::RunningStarted
                } else {
                    ClockEvent::CountdownClick {
                        remaining: self.state.countdown_remaining,
                    }
                }
            }
            SessionPhase::Running => {
                if let Some(elapsed) = self.elapsed_at(now) {
                    self.state.elapsed_secs = self.state.elapsed_secs.max(elapsed);
                }
                self.state.current_beat_index += 1;
                let index = self.state.current_beat_index;
                if index >= self.grid.total_beats() {
                    self.state.phase = SessionPhase::Finished;
                    ClockEvent::Finished { index }
                } else {
                    ClockEvent::Beat { index }
                }
            }
            SessionPhase::Idle | SessionPhase::Finished => ClockEvent::Ignored,
        }
    }

    fn enter_running(&mut self, now: Instant) {
        self.state.phase = SessionPhase::Running;
        self.state.countdown_remaining = 0;
        self.state.current_beat_index = 0;
        self.state.elapsed_secs = 0.0;
        self.started_at = Some(now);
    }

    /// Force the clock to Finished. Returns false if it already was.
    pub fn abort(&mut self) -> bool {
        if self.state.phase == SessionPhase::Finished {
            return false;
        }
        self.state.phase = SessionPhase::Finished;
        true
    }

    /// Back to Idle with every field zeroed.
    pub fn reset(&mut self) {
        self.state = SessionState::default();
        self.started_at = None;
    }

    /// Seconds since running started, measured at `at`; `None` unless running.
    pub fn elapsed_at(&self, at: Instant) -> Option<f64> {
        if self.state.phase != SessionPhase::Running {
            return None;
        }
        self.started_at
            .map(|start| at.saturating_duration_since(start).as_secs_f64())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    pub fn grid(&self) -> &BeatGrid {
        &self.grid
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }
}

/// Generates a metronome click sample (20ms white noise burst).
///
/// The noise is generated using a fixed seed to ensure identical output
/// across calls.
///
/// # Arguments
/// * `sample_rate` - Sample rate in Hz (typically 44100)
///
/// # Returns
/// A `Vec<f32>` containing exactly 20ms worth of white noise samples in range [-1.0, 1.0]
pub fn generate_click_sample(sample_rate: u32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * CLICK_DURATION_MS / 1000.0) as usize;

    let mut rng = StdRng::seed_from_u64(42);

    let mut samples = Vec::with_capacity(num_samples);
    for _ in 0..num_samples {
        samples.push(rng.gen_range(-1.0..1.0));
    }

    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_clock(tempo: u32, duration: u32) -> (BeatClock, Instant) {
        let grid = BeatGrid::new(tempo, duration).unwrap();
        let mut clock = BeatClock::new(grid, 4);
        let t0 = Instant::now();
        clock.start(t0).unwrap();
        let step = grid.beat_interval();
        for k in 1..=4 {
            clock.tick(t0 + step * k);
        }
        (clock, t0 + step * 4)
    }

    #[test]
    fn test_grid_formulas_for_all_supported_values() {
        for tempo in 60..=120 {
            for duration in 10..=30 {
                let grid = BeatGrid::new(tempo, duration).unwrap();
                assert_eq!(
                    grid.total_beats(),
                    (duration as f64 * tempo as f64 / 60.0).floor() as u32
                );
                assert_eq!(grid.beat_interval_secs(), 60.0 / tempo as f64);
            }
        }
    }

    #[test]
    fn test_grid_rejects_out_of_range() {
        assert_eq!(
            BeatGrid::new(59, 10),
            Err(SessionError::TempoOutOfRange { bpm: 59 })
        );
        assert_eq!(
            BeatGrid::new(121, 10),
            Err(SessionError::TempoOutOfRange { bpm: 121 })
        );
        assert_eq!(
            BeatGrid::new(90, 9),
            Err(SessionError::DurationOutOfRange { seconds: 9 })
        );
        assert_eq!(
            BeatGrid::new(90, 31),
            Err(SessionError::DurationOutOfRange { seconds: 31 })
        );
    }

    #[test]
    fn test_countdown_decrements_to_running() {
        let grid = BeatGrid::new(90, 10).unwrap();
        let mut clock = BeatClock::new(grid, 4);
        let t0 = Instant::now();

        assert_eq!(
            clock.start(t0).unwrap(),
            ClockEvent::CountdownClick { remaining: 4 }
        );
        assert_eq!(clock.state().countdown_remaining, 4);

        let step = grid.beat_interval();
        assert_eq!(
            clock.tick(t0 + step),
            ClockEvent::CountdownClick { remaining: 3 }
        );
        assert_eq!(
            clock.tick(t0 + step * 2),
            ClockEvent::CountdownClick { remaining: 2 }
        );
        assert_eq!(
            clock.tick(t0 + step * 3),
            ClockEvent::CountdownClick { remaining: 1 }
        );
        assert_eq!(clock.tick(t0 + step * 4), ClockEvent::RunningStarted);

        let state = clock.state();
        assert_eq!(state.phase, SessionPhase::Running);
        assert_eq!(state.countdown_remaining, 0);
        assert_eq!(state.current_beat_index, 0);
        assert_eq!(clock.started_at(), Some(t0 + step * 4));
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let grid = BeatGrid::new(90, 10).unwrap();
        let mut clock = BeatClock::new(grid, 4);
        clock.start(Instant::now()).unwrap();
        assert!(matches!(
            clock.start(Instant::now()),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_running_finishes_after_total_beats() {
        let (mut clock, start) = running_clock(90, 10);
        let step = clock.grid().beat_interval();
        let total = clock.grid().total_beats();
        assert_eq!(total, 15);

        for k in 1..total {
            assert_eq!(clock.tick(start + step * k), ClockEvent::Beat { index: k });
            assert!(clock.state().current_beat_index <= total);
        }
        assert_eq!(
            clock.tick(start + step * total),
            ClockEvent::Finished { index: total }
        );
        assert_eq!(clock.phase(), SessionPhase::Finished);
        assert_eq!(clock.tick(start + step * (total + 1)), ClockEvent::Ignored);
        assert_eq!(clock.state().current_beat_index, total);
    }

    #[test]
    fn test_elapsed_is_non_decreasing() {
        let (mut clock, start) = running_clock(120, 10);
        clock.tick(start + Duration::from_millis(500));
        let first = clock.state().elapsed_secs;
        // A late-delivered tick stamped earlier must not move time backwards
        clock.tick(start + Duration::from_millis(400));
        assert!(clock.state().elapsed_secs >= first);
        assert!((first - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_elapsed_only_while_running() {
        let grid = BeatGrid::new(90, 10).unwrap();
        let mut clock = BeatClock::new(grid, 4);
        let now = Instant::now();
        assert_eq!(clock.elapsed_at(now), None);
        clock.start(now).unwrap();
        assert_eq!(clock.elapsed_at(now), None);
    }

    #[test]
    fn test_abort_and_reset() {
        let (mut clock, _) = running_clock(90, 10);
        assert!(clock.abort());
        assert!(!clock.abort());
        assert_eq!(clock.phase(), SessionPhase::Finished);

        clock.reset();
        assert_eq!(clock.state(), SessionState::default());
        assert!(clock.start(Instant::now()).is_ok());
    }

    #[test]
    fn test_zero_countdown_starts_running_immediately() {
        let grid = BeatGrid::new(90, 10).unwrap();
        let mut clock = BeatClock::new(grid, 0);
        assert_eq!(clock.start(Instant::now()).unwrap(), ClockEvent::RunningStarted);
        assert_eq!(clock.phase(), SessionPhase::Running);
    }

    #[test]
    fn test_generate_click_sample_duration() {
        for &sr in &[44100, 48000, 96000] {
            let click = generate_click_sample(sr);
            let expected = (sr as f32 * CLICK_DURATION_MS / 1000.0) as usize;
            assert_eq!(click.len(), expected, "Click should be 20ms at {} Hz", sr);
        }
    }

    #[test]
    fn test_generate_click_sample_deterministic_and_bounded() {
        let a = generate_click_sample(44100);
        let b = generate_click_sample(44100);
        assert_eq!(a, b);
        assert!(a.iter().all(|s| (-1.0..=1.0).contains(s)));
    }
}
