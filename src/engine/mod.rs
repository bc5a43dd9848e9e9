//! Engine module housing the training session.
//!
//! This module exposes trait-based collaborators (`backend`) and the
//! `TrainingSession` orchestration layer (`core`).

pub mod backend;
pub mod core;

#[cfg(feature = "desktop_audio")]
pub use self::backend::{CpalCapture, CpalClickPlayer};
pub use self::backend::{
    CaptureSource, ClickPlayer, FailingCapture, FrameObserver, PermissionProvider,
    ScriptedCapture, SilentClickPlayer, StaticPermission, StubTimeSource, SystemTimeSource,
    TimeSource,
};
pub use self::core::{
    ClickPulse, SessionCollaborators, SessionEvent, SessionHandle, SessionSnapshot,
    TerminalNotice, TrainingSession,
};
