// Audio error types and constants

use crate::error::ErrorCode;
use std::fmt;
use tracing::error;

/// Audio error code constants
///
/// Single source of truth for the numeric codes reported by [`AudioError`].
///
/// Error code range: 1001-1008
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// Microphone permission denied
    pub const PERMISSION_DENIED: i32 = 1001;

    /// Capture device failed to start or stop
    pub const CAPTURE_FAILURE: i32 = 1002;

    /// Failed to open audio stream
    pub const STREAM_OPEN_FAILED: i32 = 1003;

    /// FFT working context could not be allocated
    pub const ALLOCATION_FAILURE: i32 = 1004;

    /// Capture is already running
    pub const ALREADY_RUNNING: i32 = 1005;

    /// Capture is not running
    pub const NOT_RUNNING: i32 = 1006;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1007;

    /// A delivered frame could not be analysed
    pub const INVALID_FRAME: i32 = 1008;
}

/// Log an audio error with structured context
///
/// This function logs audio errors with structured fields including:
/// - error_code: Numeric error code for programmatic handling
/// - component: The component where the error occurred
/// - message: Human-readable error message
/// - context: Additional contextual information
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=AudioPipeline, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio-related errors
///
/// These errors cover the capture device, the FFT context and per-frame
/// analysis anomalies.
///
/// Error code ranges: 1001-1008
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Microphone permission denied
    PermissionDenied,

    /// Capture device failed to start or stop
    CaptureFailure { reason: String },

    /// Failed to open audio stream
    StreamOpenFailed { reason: String },

    /// FFT working context could not be allocated
    AllocationFailure { reason: String },

    /// Capture is already running
    AlreadyRunning,

    /// Capture is not running
    NotRunning,

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Frame skipped by the analysis thread (never leaves it)
    InvalidFrame { reason: String },
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::PermissionDenied => AudioErrorCodes::PERMISSION_DENIED,
            AudioError::CaptureFailure { .. } => AudioErrorCodes::CAPTURE_FAILURE,
            AudioError::StreamOpenFailed { .. } => AudioErrorCodes::STREAM_OPEN_FAILED,
            AudioError::AllocationFailure { .. } => AudioErrorCodes::ALLOCATION_FAILURE,
            AudioError::AlreadyRunning => AudioErrorCodes::ALREADY_RUNNING,
            AudioError::NotRunning => AudioErrorCodes::NOT_RUNNING,
            AudioError::LockPoisoned { .. } => AudioErrorCodes::LOCK_POISONED,
            AudioError::InvalidFrame { .. } => AudioErrorCodes::INVALID_FRAME,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::PermissionDenied => {
                "Microphone permission denied. Please grant microphone access.".to_string()
            }
            AudioError::CaptureFailure { reason } => {
                format!("Audio capture failed: {}", reason)
            }
            AudioError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            AudioError::AllocationFailure { reason } => {
                format!("Failed to allocate FFT context: {}", reason)
            }
            AudioError::AlreadyRunning => {
                "Audio capture already running. Call stop() first.".to_string()
            }
            AudioError::NotRunning => "Audio capture not running. Call start() first.".to_string(),
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            AudioError::InvalidFrame { reason } => {
                format!("Invalid audio frame: {}", reason)
            }
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::CaptureFailure {
            reason: err.to_string(),
        }
    }
}
