// OnsetDetector - loudness-spike gate confirmed by percussive spectral peaks
//
// Per frame:
// 1. loudness = max |sample|
// 2. push into a short loudness history (oldest dropped on overflow)
// 3. volume spike = newest > mean(history without newest) + threshold,
//    only once the history holds `min_history` entries
// 4. dominant frequencies = strongest local maxima of the spectrum above a floor
// 5. drum-like = any dominant frequency falls in a percussive band
// 6. hit = volume spike AND drum-like

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::AudioHit;
use crate::config::{OnsetDetectionConfig, MIN_ONSET_HISTORY};

/// Bounded FIFO of recent per-frame loudness values
#[derive(Debug, Clone)]
pub struct LoudnessHistory {
    values: VecDeque<f32>,
    capacity: usize,
}

impl LoudnessHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a value, dropping the oldest when full
    pub fn push(&mut self, loudness: f32) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(loudness);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn newest(&self) -> Option<f32> {
        self.values.back().copied()
    }

    /// Mean of every entry except the newest, `None` if there is nothing to average
    pub fn baseline(&self) -> Option<f32> {
        let count = self.values.len().checked_sub(1)?;
        if count == 0 {
            return None;
        }
        let sum: f32 = self.values.iter().take(count).sum();
        Some(sum / count as f32)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Per-frame detector state exposed for display
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OnsetObservation {
    pub loudness: f32,
    pub volume_spike: bool,
    pub drum_like: bool,
    pub dominant_frequencies: Vec<f32>,
}

/// Detects percussive onsets from loudness history plus spectral peaks
pub struct OnsetDetector {
    history: LoudnessHistory,
    spike_threshold: f32,
    min_history: usize,
    magnitude_floor: f32,
    max_dominant: usize,
    percussive_bands: Vec<[f32; 2]>,
    indicator_hold: Duration,

    // Working state, reused across frames
    peaks: Vec<(f32, usize)>,
    dominant_frequencies: Vec<f32>,
    last_loudness: f32,
    last_hit_at: Option<Instant>,
}

impl OnsetDetector {
    pub fn new() -> Self {
        Self::with_config(OnsetDetectionConfig::default())
    }

    pub fn with_config(config: OnsetDetectionConfig) -> Self {
        let max_dominant = config.max_dominant.max(1);
        let min_history = config.min_history.max(MIN_ONSET_HISTORY);
        Self {
            history: LoudnessHistory::new(config.history_capacity.max(min_history)),
            spike_threshold: config.spike_threshold,
            min_history,
            magnitude_floor: config.magnitude_floor,
            max_dominant,
            percussive_bands: config.percussive_bands,
            indicator_hold: Duration::from_millis(config.indicator_hold_ms),
            peaks: Vec::with_capacity(256),
            dominant_frequencies: Vec::with_capacity(max_dominant),
            last_loudness: 0.0,
            last_hit_at: None,
        }
    }

    /// Feed one frame and its magnitude spectrum.
    ///
    /// # Arguments
    /// * `samples` - Time-domain frame the spectrum was computed from
    /// * `spectrum` - Magnitude bins, bin `i` at `i * bin_width` Hz
    /// * `bin_width` - Frequency resolution of `spectrum` in Hz
    /// * `captured_at` - Capture time of the frame, used as the hit timestamp
    ///
    /// # Returns
    /// `Some(AudioHit)` when a loudness spike coincides with a percussive peak
    pub fn process(
        &mut self,
        samples: &[f32],
        spectrum: &[f32],
        bin_width: f32,
        captured_at: Instant,
    ) -> Option<AudioHit> {
        let loudness = frame_loudness(samples);
        self.last_loudness = loudness;
        self.history.push(loudness);

        let volume_spike = self.volume_spike();

        find_dominant_peaks(
            spectrum,
            self.magnitude_floor,
            self.max_dominant,
            &mut self.peaks,
        );
        self.dominant_frequencies.clear();
        self.dominant_frequencies
            .extend(self.peaks.iter().map(|&(_, bin)| bin as f32 * bin_width));

        let drum_like = self
            .dominant_frequencies
            .iter()
            .any(|&freq| is_percussive(freq, &self.percussive_bands));

        if volume_spike && drum_like {
            self.last_hit_at = Some(captured_at);
            Some(AudioHit {
                timestamp: captured_at,
                intensity: loudness,
            })
        } else {
            None
        }
    }

    fn volume_spike(&self) -> bool {
        if self.history.len() < self.min_history {
            return false;
        }
        match (self.history.newest(), self.history.baseline()) {
            (Some(newest), Some(average)) => newest > average + self.spike_threshold,
            _ => false,
        }
    }

    pub fn loudness(&self) -> f32 {
        self.last_loudness
    }

    /// Dominant frequencies of the last frame, strongest first
    pub fn dominant_frequencies(&self) -> &[f32] {
        &self.dominant_frequencies
    }

    pub fn history(&self) -> &LoudnessHistory {
        &self.history
    }

    /// Whether the display indicator should still be lit at `now`
    pub fn indicator_active(&self, now: Instant) -> bool {
        self.last_hit_at
            .map(|at| now.saturating_duration_since(at) < self.indicator_hold)
            .unwrap_or(false)
    }

    pub fn observation(&self) -> OnsetObservation {
        let volume_spike = self.volume_spike();
        OnsetObservation {
            loudness: self.last_loudness,
            volume_spike,
            drum_like: self
                .dominant_frequencies
                .iter()
                .any(|&freq| is_percussive(freq, &self.percussive_bands)),
            dominant_frequencies: self.dominant_frequencies.clone(),
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.dominant_frequencies.clear();
        self.last_loudness = 0.0;
        self.last_hit_at = None;
    }
}

impl Default for OnsetDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Peak absolute sample value of a frame (0.0 for an empty frame)
#[inline]
pub fn frame_loudness(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
}

/// Collect the strongest local maxima of `spectrum` into `out`.
///
/// A bin qualifies when it is strictly greater than both neighbours and
/// above `floor`; the first and last bins never qualify. `out` ends up
/// holding at most `max` `(magnitude, bin)` pairs sorted strongest first.
pub fn find_dominant_peaks(
    spectrum: &[f32],
    floor: f32,
    max: usize,
    out: &mut Vec<(f32, usize)>,
) {
    out.clear();
    if spectrum.len() < 3 {
        return;
    }

    for i in 1..spectrum.len() - 1 {
        let curr = spectrum[i];
        if curr > floor && curr > spectrum[i - 1] && curr > spectrum[i + 1] {
            out.push((curr, i));
        }
    }

    out.sort_unstable_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    out.truncate(max);
}

/// True if `freq` lies inside any of the inclusive `bands`
#[inline]
pub fn is_percussive(freq: f32, bands: &[[f32; 2]]) -> bool {
    bands.iter().any(|&[low, high]| freq >= low && freq <= high)
}
