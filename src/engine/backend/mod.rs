//! Backend abstractions for the training session.
//!
//! A session talks to the outside world only through these traits: audio
//! capture, click playback, microphone permission and a monotonic clock.

use std::time::Instant;

use futures::future::BoxFuture;

use crate::error::AudioError;

/// Consumer of captured audio frames.
///
/// Called on the capture thread; implementations must not block or allocate.
pub trait FrameObserver: Send {
    /// One mono frame of `f32` samples in [-1, 1].
    fn on_frame(&mut self, samples: &[f32], sample_rate: u32);

    /// The capture stream failed and no more frames will arrive.
    fn on_capture_failed(&mut self, reason: &str) {
        let _ = reason;
    }
}

/// Source of microphone frames.
pub trait CaptureSource: Send {
    /// Begin delivering frames to `observer`.
    fn start(&mut self, observer: Box<dyn FrameObserver>) -> Result<(), AudioError>;
    /// Stop delivering frames. No frame reaches the observer after this returns.
    fn stop(&mut self) -> Result<(), AudioError>;
}

/// Plays the metronome click.
pub trait ClickPlayer: Send + Sync {
    fn play_click(&self);
}

/// Asynchronous microphone permission request.
pub trait PermissionProvider: Send + Sync {
    /// Resolves to whether capture may proceed.
    fn request_microphone_permission(&self) -> BoxFuture<'static, bool>;
}

/// Trait representing a monotonic time source used for event timestamps.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// Default time source backed by `Instant::now`.
#[derive(Default)]
pub struct SystemTimeSource {
    _unit: (),
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(feature = "desktop_audio")]
mod cpal;
#[cfg(feature = "desktop_audio")]
pub use self::cpal::{CpalCapture, CpalClickPlayer};

mod desktop_stub;
pub use desktop_stub::{
    FailingCapture, ScriptedCapture, SilentClickPlayer, StaticPermission, StubTimeSource,
};
