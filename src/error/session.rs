// Session error types and constants

use crate::error::{AudioError, ErrorCode};
use std::fmt;
use tracing::error;

/// Session error code constants
///
/// Error code range: 2001-2007
pub struct SessionErrorCodes {}

impl SessionErrorCodes {
    /// Tempo outside the supported BPM range
    pub const TEMPO_OUT_OF_RANGE: i32 = 2001;

    /// Duration outside the supported range
    pub const DURATION_OUT_OF_RANGE: i32 = 2002;

    /// Any other rejected configuration value
    pub const INVALID_CONFIG: i32 = 2003;

    /// Acoustic mode requested without microphone permission
    pub const PERMISSION_DENIED: i32 = 2004;

    /// Capture device failed while the session was running
    pub const CAPTURE_FAILURE: i32 = 2005;

    /// FFT context allocation failed; acoustic mode unavailable
    pub const ALLOCATION_FAILURE: i32 = 2006;

    /// Operation not valid in the current session phase
    pub const INVALID_STATE: i32 = 2007;
}

/// Log a session error with structured context
pub fn log_session_error(err: &SessionError, context: &str) {
    error!(
        "Session error in {}: code={}, component=TrainingSession, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Session-related errors
///
/// Configuration errors are raised before a session starts. Runtime
/// failures (capture) force the session to `Finished` and are reported
/// once through the terminal notice of the session snapshot.
///
/// Error code ranges: 2001-2007
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Tempo outside [60, 120] BPM
    TempoOutOfRange { bpm: u32 },

    /// Duration outside [10, 30] seconds
    DurationOutOfRange { seconds: u32 },

    /// Other rejected configuration value
    InvalidConfig { reason: String },

    /// Microphone permission denied
    PermissionDenied,

    /// Capture device failed to start or stop
    CaptureFailure { reason: String },

    /// FFT context could not be allocated
    AllocationFailure { reason: String },

    /// Operation requested in the wrong phase
    InvalidState { expected: String, actual: String },
}

impl SessionError {
    /// True for the kinds rejected before a session is allowed to start.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SessionError::TempoOutOfRange { .. }
                | SessionError::DurationOutOfRange { .. }
                | SessionError::InvalidConfig { .. }
        )
    }
}

impl ErrorCode for SessionError {
    fn code(&self) -> i32 {
        match self {
            SessionError::TempoOutOfRange { .. } => SessionErrorCodes::TEMPO_OUT_OF_RANGE,
            SessionError::DurationOutOfRange { .. } => SessionErrorCodes::DURATION_OUT_OF_RANGE,
            SessionError::InvalidConfig { .. } => SessionErrorCodes::INVALID_CONFIG,
            SessionError::PermissionDenied => SessionErrorCodes::PERMISSION_DENIED,
            SessionError::CaptureFailure { .. } => SessionErrorCodes::CAPTURE_FAILURE,
            SessionError::AllocationFailure { .. } => SessionErrorCodes::ALLOCATION_FAILURE,
            SessionError::InvalidState { .. } => SessionErrorCodes::INVALID_STATE,
        }
    }

    fn message(&self) -> String {
        match self {
            SessionError::TempoOutOfRange { bpm } => {
                format!("Tempo must be between 60 and 120 BPM (got {})", bpm)
            }
            SessionError::DurationOutOfRange { seconds } => {
                format!("Duration must be between 10 and 30 seconds (got {})", seconds)
            }
            SessionError::InvalidConfig { reason } => {
                format!("Invalid configuration: {}", reason)
            }
            SessionError::PermissionDenied => {
                "Microphone permission denied; acoustic mode is unavailable".to_string()
            }
            SessionError::CaptureFailure { reason } => {
                format!("Audio capture failed: {}", reason)
            }
            SessionError::AllocationFailure { reason } => {
                format!("Acoustic mode disabled, FFT allocation failed: {}", reason)
            }
            SessionError::InvalidState { expected, actual } => {
                format!("Session must be {} (currently {})", expected, actual)
            }
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for SessionError {}

impl From<AudioError> for SessionError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::PermissionDenied => SessionError::PermissionDenied,
            AudioError::AllocationFailure { reason } => SessionError::AllocationFailure { reason },
            other => SessionError::CaptureFailure {
                reason: other.message(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_codes() {
        assert_eq!(SessionError::TempoOutOfRange { bpm: 200 }.code(), 2001);
        assert_eq!(SessionError::DurationOutOfRange { seconds: 5 }.code(), 2002);
        assert_eq!(SessionError::PermissionDenied.code(), 2004);
        assert_eq!(
            SessionError::InvalidState {
                expected: "Idle".to_string(),
                actual: "Running".to_string()
            }
            .code(),
            SessionErrorCodes::INVALID_STATE
        );
    }

    #[test]
    fn test_config_error_grouping() {
        assert!(SessionError::TempoOutOfRange { bpm: 59 }.is_config_error());
        assert!(SessionError::DurationOutOfRange { seconds: 31 }.is_config_error());
        assert!(!SessionError::PermissionDenied.is_config_error());
        assert!(!SessionError::CaptureFailure {
            reason: "x".to_string()
        }
        .is_config_error());
    }

    #[test]
    fn test_session_error_messages() {
        let err = SessionError::TempoOutOfRange { bpm: 130 };
        assert!(err.message().contains("got 130"));

        let err = SessionError::DurationOutOfRange { seconds: 45 };
        assert!(err.message().contains("got 45"));
    }

    #[test]
    fn test_from_audio_error() {
        let err: SessionError = AudioError::PermissionDenied.into();
        assert_eq!(err, SessionError::PermissionDenied);

        let err: SessionError = AudioError::AllocationFailure {
            reason: "oom".to_string(),
        }
        .into();
        assert_eq!(
            err,
            SessionError::AllocationFailure {
                reason: "oom".to_string()
            }
        );

        let err: SessionError = AudioError::StreamOpenFailed {
            reason: "no device".to_string(),
        }
        .into();
        match err {
            SessionError::CaptureFailure { reason } => assert!(reason.contains("no device")),
            other => panic!("Expected CaptureFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_error_propagation() {
        fn may_fail() -> Result<(), AudioError> {
            Err(AudioError::NotRunning)
        }

        fn caller() -> Result<(), SessionError> {
            may_fail()?;
            Ok(())
        }

        assert!(matches!(
            caller(),
            Err(SessionError::CaptureFailure { .. })
        ));
    }
}
