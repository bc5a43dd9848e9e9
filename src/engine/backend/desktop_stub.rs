use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use futures::future::{self, BoxFuture, FutureExt};

use crate::error::AudioError;

use super::{CaptureSource, ClickPlayer, FrameObserver, PermissionProvider, TimeSource};

/// Click player that only counts clicks.
///
/// Used by tests and by the CLI when no output device is wanted.
#[derive(Default)]
pub struct SilentClickPlayer {
    clicks: AtomicU64,
}

impl SilentClickPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clicks(&self) -> u64 {
        self.clicks.load(Ordering::SeqCst)
    }
}

impl ClickPlayer for SilentClickPlayer {
    fn play_click(&self) {
        self.clicks.fetch_add(1, Ordering::SeqCst);
    }
}

/// Permission provider with a fixed answer.
pub struct StaticPermission {
    granted: bool,
    requests: AtomicU32,
}

impl StaticPermission {
    pub fn granted() -> Self {
        Self {
            granted: true,
            requests: AtomicU32::new(0),
        }
    }

    pub fn denied() -> Self {
        Self {
            granted: false,
            requests: AtomicU32::new(0),
        }
    }

    pub fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

impl PermissionProvider for StaticPermission {
    fn request_microphone_permission(&self) -> BoxFuture<'static, bool> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        future::ready(self.granted).boxed()
    }
}

/// Capture source replaying prepared frames from a background thread.
///
/// Frames are delivered `frame_interval` apart once `start` is called.
/// With `fail_after(n)` the stream reports a failure after `n` frames.
pub struct ScriptedCapture {
    frames: Arc<Vec<Vec<f32>>>,
    sample_rate: u32,
    frame_interval: Duration,
    fail_after: Option<usize>,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ScriptedCapture {
    pub fn new(frames: Vec<Vec<f32>>, sample_rate: u32, frame_interval: Duration) -> Self {
        Self {
            frames: Arc::new(frames),
            sample_rate,
            frame_interval,
            fail_after: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Report a stream failure once `frames` frames have been delivered.
    pub fn fail_after(mut self, frames: usize) -> Self {
        self.fail_after = Some(frames);
        self
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl CaptureSource for ScriptedCapture {
    fn start(&mut self, mut observer: Box<dyn FrameObserver>) -> Result<(), AudioError> {
        if self.worker.is_some() {
            return Err(AudioError::AlreadyRunning);
        }

        self.stop_flag.store(false, Ordering::SeqCst);
        let stop_flag = Arc::clone(&self.stop_flag);
        let frames = Arc::clone(&self.frames);
        let sample_rate = self.sample_rate;
        let interval = self.frame_interval;
        let fail_after = self.fail_after;

        let worker = thread::Builder::new()
            .name("scripted-capture".to_string())
            .spawn(move || {
                for (delivered, frame) in frames.iter().enumerate() {
                    if stop_flag.load(Ordering::SeqCst) {
                        return;
                    }
                    if fail_after == Some(delivered) {
                        observer.on_capture_failed("scripted capture failure");
                        return;
                    }
                    observer.on_frame(frame, sample_rate);
                    thread::sleep(interval);
                }
                if fail_after.is_some_and(|n| n >= frames.len()) && !stop_flag.load(Ordering::SeqCst)
                {
                    observer.on_capture_failed("scripted capture failure");
                }
            })?;

        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        let worker = self.worker.take().ok_or(AudioError::NotRunning)?;
        self.stop_flag.store(true, Ordering::SeqCst);
        if worker.join().is_err() {
            tracing::warn!("[ScriptedCapture] Replay thread panicked");
        }
        Ok(())
    }
}

impl Drop for ScriptedCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Capture source whose stream never opens.
pub struct FailingCapture {
    reason: String,
}

impl FailingCapture {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl CaptureSource for FailingCapture {
    fn start(&mut self, _observer: Box<dyn FrameObserver>) -> Result<(), AudioError> {
        Err(AudioError::StreamOpenFailed {
            reason: self.reason.clone(),
        })
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        Err(AudioError::NotRunning)
    }
}

/// Deterministic time source for desktop runs.
///
/// Each call to `now()` advances by a fixed step (10ms by default) to
/// guarantee monotonic timestamps without a real clock.
pub struct StubTimeSource {
    start: Instant,
    step_ms: u64,
    offset_ms: AtomicU64,
}

impl StubTimeSource {
    pub fn new() -> Self {
        Self::with_step(Duration::from_millis(10))
    }

    pub fn with_step(step: Duration) -> Self {
        Self {
            start: Instant::now(),
            step_ms: step.as_millis() as u64,
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn origin(&self) -> Instant {
        self.start
    }
}

impl Default for StubTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for StubTimeSource {
    fn now(&self) -> Instant {
        let ms = self.offset_ms.fetch_add(self.step_ms, Ordering::SeqCst);
        self.start + Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct Recorder {
        frames: mpsc::Sender<usize>,
        failures: mpsc::Sender<String>,
    }

    impl FrameObserver for Recorder {
        fn on_frame(&mut self, samples: &[f32], _sample_rate: u32) {
            let _ = self.frames.send(samples.len());
        }

        fn on_capture_failed(&mut self, reason: &str) {
            let _ = self.failures.send(reason.to_string());
        }
    }

    fn recorder() -> (Box<Recorder>, mpsc::Receiver<usize>, mpsc::Receiver<String>) {
        let (frames, frame_rx) = mpsc::channel();
        let (failures, failure_rx) = mpsc::channel();
        (Box::new(Recorder { frames, failures }), frame_rx, failure_rx)
    }

    #[test]
    fn scripted_capture_replays_frames() {
        let mut capture =
            ScriptedCapture::new(vec![vec![0.0; 4], vec![0.0; 8]], 44100, Duration::ZERO);
        let (observer, frames, failures) = recorder();

        capture.start(observer).unwrap();
        assert_eq!(frames.recv_timeout(Duration::from_secs(1)).unwrap(), 4);
        assert_eq!(frames.recv_timeout(Duration::from_secs(1)).unwrap(), 8);
        capture.stop().unwrap();
        assert!(failures.try_recv().is_err());
        assert!(matches!(capture.stop(), Err(AudioError::NotRunning)));
    }

    #[test]
    fn scripted_capture_reports_failure() {
        let mut capture =
            ScriptedCapture::new(vec![vec![0.0; 4]; 3], 44100, Duration::ZERO).fail_after(1);
        let (observer, frames, failures) = recorder();

        capture.start(observer).unwrap();
        assert!(failures.recv_timeout(Duration::from_secs(1)).is_ok());
        capture.stop().unwrap();
        assert_eq!(frames.try_iter().count(), 1);
    }

    #[test]
    fn scripted_capture_rejects_double_start() {
        let mut capture =
            ScriptedCapture::new(Vec::new(), 44100, Duration::from_millis(1));
        let (first, _, _) = recorder();
        let (second, _, _) = recorder();

        capture.start(first).unwrap();
        assert!(matches!(
            capture.start(second),
            Err(AudioError::AlreadyRunning)
        ));
        capture.stop().unwrap();
    }

    #[test]
    fn failing_capture_never_starts() {
        let mut capture = FailingCapture::new("no device");
        let (observer, _, _) = recorder();
        assert!(matches!(
            capture.start(observer),
            Err(AudioError::StreamOpenFailed { .. })
        ));
    }

    #[test]
    fn static_permission_answers_and_counts() {
        let granted = StaticPermission::granted();
        let denied = StaticPermission::denied();
        assert!(futures::executor::block_on(
            granted.request_microphone_permission()
        ));
        assert!(!futures::executor::block_on(
            denied.request_microphone_permission()
        ));
        assert_eq!(granted.requests(), 1);
    }

    #[test]
    fn silent_click_player_counts() {
        let player = SilentClickPlayer::new();
        player.play_click();
        player.play_click();
        assert_eq!(player.clicks(), 2);
    }

    #[test]
    fn stub_time_source_is_monotonic() {
        let time = StubTimeSource::new();
        let a = time.now();
        let b = time.now();
        assert_eq!(b.duration_since(a), Duration::from_millis(10));
        assert_eq!(a, time.origin());
    }
}
