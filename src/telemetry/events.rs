//! Core telemetry event types describing session diagnostics exposed to the
//! CLI and any display layer subscribed to the hub.

use serde::{Deserialize, Serialize};

use crate::analysis::scoring::{Grade, ResponseSource};
use crate::audio::metronome::SessionPhase;

/// Diagnostic error codes surfaced via telemetry metrics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticError {
    InvalidFrame,
    CaptureFailure,
    PermissionDenied,
    SchedulerFailure,
    Unknown,
}

/// Rich metric events covering scoring, onsets, and lifecycle details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    Judgement {
        grade: Grade,
        source: ResponseSource,
        beat_index: Option<u32>,
        distance_ms: f32,
    },
    TimingOffset {
        avg_ms: f32,
        max_ms: f32,
        sample_count: usize,
    },
    Onset {
        intensity: f32,
    },
    Lifecycle {
        phase: SessionPhase,
        timestamp_ms: u64,
    },
    DroppedFrames {
        count: u64,
    },
    Error {
        code: DiagnosticError,
        context: String,
    },
}
