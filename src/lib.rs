// Rhythm Trainer Core
// Metronome-driven timing practice with lock-free acoustic hit detection

// Module declarations
pub mod analysis;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod managers;
pub mod telemetry;

// Re-exports for convenience
pub use analysis::scoring::{Grade, Judgement, ResponseSource, ScoreCounters, SessionSummary};
pub use analysis::{AudioHit, HitObserver, MonitorSnapshot};
pub use audio::metronome::{BeatGrid, SessionPhase, SessionState};
pub use config::{AppConfig, InputMode};
pub use engine::{
    ClickPulse, SessionCollaborators, SessionEvent, SessionHandle, SessionSnapshot,
    TerminalNotice, TrainingSession,
};
pub use error::{AudioError, ErrorCode, SessionError};

/// Install the global `tracing` subscriber.
///
/// `log` records from dependencies are forwarded through the same
/// subscriber. Calling this more than once is harmless.
pub fn init_logging() {
    if tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .try_init()
        .is_ok()
    {
        log::info!("Logging initialized");
    }
}
