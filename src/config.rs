//! Configuration management for session and detector tuning
//!
//! This module provides runtime configuration loading from JSON files,
//! enabling fast iteration without recompilation. The onset gate, the
//! timing windows and the session shape (tempo, duration, input mode)
//! can all be adjusted via the config file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

use crate::error::SessionError;

/// Supported tempo range in BPM
pub const TEMPO_RANGE_BPM: RangeInclusive<u32> = 60..=120;

/// Supported session duration range in seconds
pub const DURATION_RANGE_SECS: RangeInclusive<u32> = 10..=30;

/// Fewest loudness entries the onset gate will compare against
pub const MIN_ONSET_HISTORY: usize = 3;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub spectral: SpectralConfig,
    #[serde(default)]
    pub onset_detection: OnsetDetectionConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

/// FFT front-end parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectralConfig {
    /// FFT size in samples (must be a power of two)
    pub fft_size: usize,
    /// Maximum number of samples analysed per frame
    pub buffer_size: usize,
    /// Expected capture sample rate in Hz
    pub sample_rate: u32,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            fft_size: 4096,
            buffer_size: 2048,
            sample_rate: 44100,
        }
    }
}

/// Onset gate parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnsetDetectionConfig {
    /// Amount the newest loudness must exceed the recent average by
    pub spike_threshold: f32,
    /// Number of per-frame loudness values retained
    pub history_capacity: usize,
    /// Entries required before spikes are considered at all
    pub min_history: usize,
    /// Spectral peaks at or below this magnitude are ignored
    pub magnitude_floor: f32,
    /// Number of dominant frequencies kept per frame
    pub max_dominant: usize,
    /// Frequency bands (Hz, inclusive) that count as percussive
    pub percussive_bands: Vec<[f32; 2]>,
    /// How long the display indicator stays lit after a hit
    pub indicator_hold_ms: u64,
}

impl Default for OnsetDetectionConfig {
    fn default() -> Self {
        Self {
            spike_threshold: 0.15,
            history_capacity: 5,
            min_history: 3,
            magnitude_floor: 0.01,
            max_dominant: 5,
            percussive_bands: vec![
                [50.0, 200.0],
                [200.0, 400.0],
                [900.0, 5000.0],
                [5000.0, 12000.0],
            ],
            indicator_hold_ms: 100,
        }
    }
}

/// Timing windows used to grade responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Distances below this are Perfect
    pub perfect_window_secs: f64,
    /// Distances below this (and not Perfect) are Good
    pub good_window_secs: f64,
    /// Acoustic hits at least this far from every beat belong to no beat
    pub extra_window_secs: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            perfect_window_secs: 0.05,
            good_window_secs: 0.10,
            extra_window_secs: 0.20,
        }
    }
}

/// How responses reach the scoring engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Taps delivered by the input layer
    Manual,
    /// Percussive hits detected from the microphone
    Acoustic,
}

/// Session shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub tempo_bpm: u32,
    pub duration_secs: u32,
    pub input_mode: InputMode,
    /// Clicks counted in before the session starts running
    pub countdown_beats: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tempo_bpm: 90,
            duration_secs: 10,
            input_mode: InputMode::Manual,
            countdown_beats: 4,
        }
    }
}

/// Audio transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Size of buffer pool for real-time audio transfer
    pub buffer_pool_size: usize,
    /// Capacity of each pooled buffer in samples
    pub buffer_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            buffer_pool_size: 32,
            buffer_size: 2048,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The loaded configuration, or the defaults if the file is missing or
    /// its JSON is invalid.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Reject values that would make a session meaningless.
    ///
    /// Runs before any session starts; nothing here is checked again later.
    pub fn validate(&self) -> Result<(), SessionError> {
        let session = &self.session;
        if !TEMPO_RANGE_BPM.contains(&session.tempo_bpm) {
            return Err(SessionError::TempoOutOfRange {
                bpm: session.tempo_bpm,
            });
        }
        if !DURATION_RANGE_SECS.contains(&session.duration_secs) {
            return Err(SessionError::DurationOutOfRange {
                seconds: session.duration_secs,
            });
        }

        let spectral = &self.spectral;
        if spectral.fft_size < 4 || !spectral.fft_size.is_power_of_two() {
            return Err(SessionError::InvalidConfig {
                reason: format!("fft_size {} is not a power of two", spectral.fft_size),
            });
        }
        if spectral.buffer_size == 0 || spectral.buffer_size > spectral.fft_size {
            return Err(SessionError::InvalidConfig {
                reason: format!(
                    "buffer_size {} must be in 1..={}",
                    spectral.buffer_size, spectral.fft_size
                ),
            });
        }
        if spectral.sample_rate == 0 {
            return Err(SessionError::InvalidConfig {
                reason: "sample_rate must be positive".to_string(),
            });
        }

        let scoring = &self.scoring;
        if !(scoring.perfect_window_secs > 0.0
            && scoring.perfect_window_secs <= scoring.good_window_secs)
        {
            return Err(SessionError::InvalidConfig {
                reason: format!(
                    "timing windows must satisfy 0 < perfect ({}) <= good ({})",
                    scoring.perfect_window_secs, scoring.good_window_secs
                ),
            });
        }
        if !(scoring.extra_window_secs > scoring.good_window_secs) {
            return Err(SessionError::InvalidConfig {
                reason: format!(
                    "extra window ({}) must exceed the good window ({})",
                    scoring.extra_window_secs, scoring.good_window_secs
                ),
            });
        }

        let onset = &self.onset_detection;
        if onset.min_history < MIN_ONSET_HISTORY || onset.min_history > onset.history_capacity {
            return Err(SessionError::InvalidConfig {
                reason: format!(
                    "onset min_history {} must be in {}..={}",
                    onset.min_history, MIN_ONSET_HISTORY, onset.history_capacity
                ),
            });
        }
        if self.audio.buffer_pool_size == 0 || self.audio.buffer_size == 0 {
            return Err(SessionError::InvalidConfig {
                reason: "buffer pool must hold at least one non-empty buffer".to_string(),
            });
        }

        Ok(())
    }
}
