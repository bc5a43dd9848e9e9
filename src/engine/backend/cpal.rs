//! CPAL-based capture and click playback for desktop platforms
//! (Linux, macOS, Windows).
//!
//! `cpal::Stream` is not `Send`, so each stream lives on its own thread for
//! its whole life. The owning handle talks to that thread over channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::metronome::generate_click_sample;
use crate::error::AudioError;

use super::{CaptureSource, ClickPlayer, FrameObserver};

/// Largest mono frame handed to the observer in one call
const MAX_CALLBACK_FRAMES: usize = 8192;

type SharedObserver = Arc<Mutex<Box<dyn FrameObserver>>>;

struct StreamThread {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamThread {
    /// Build a stream on a dedicated thread and keep it alive until `stop`.
    fn spawn<F>(name: &str, build: F) -> Result<Self, AudioError>
    where
        F: FnOnce() -> Result<cpal::Stream, AudioError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), AudioError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Either a stop message or the handle being dropped ends the stream
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { stop_tx, handle }),
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::StreamOpenFailed {
                    reason: format!("{} thread exited before the stream opened", name),
                })
            }
        }
    }

    fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            tracing::warn!("[Cpal] Stream thread panicked");
        }
    }
}

/// Microphone capture through the default input device.
#[derive(Default)]
pub struct CpalCapture {
    stream: Option<StreamThread>,
}

impl CpalCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sample rate frames will arrive at, so the analyzer can be built to match.
    pub fn default_sample_rate() -> Result<u32, AudioError> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| AudioError::StreamOpenFailed {
                reason: "No default input device found".to_string(),
            })?;
        let config = device
            .default_input_config()
            .map_err(|e| AudioError::StreamOpenFailed {
                reason: format!("Failed to get default input config: {:?}", e),
            })?;
        Ok(config.sample_rate().0)
    }
}

fn build_input_stream(observer: SharedObserver) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AudioError::StreamOpenFailed {
            reason: "No default input device found".to_string(),
        })?;

    let config = device
        .default_input_config()
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("Failed to get default input config: {:?}", e),
        })?;

    if config.sample_format() != cpal::SampleFormat::F32 {
        return Err(AudioError::StreamOpenFailed {
            reason: "Only F32 sample format is currently supported for input".to_string(),
        });
    }

    let stream_config: cpal::StreamConfig = config.into();
    let channels_count = (stream_config.channels as usize).max(1);
    let sample_rate = stream_config.sample_rate.0;

    let data_observer = Arc::clone(&observer);
    let mut mono = Vec::with_capacity(MAX_CALLBACK_FRAMES);

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Never wait on the audio thread; a contended frame is dropped
                let Ok(mut observer) = data_observer.try_lock() else {
                    return;
                };
                for chunk in data.chunks(MAX_CALLBACK_FRAMES * channels_count) {
                    mono.clear();
                    // De-interleave: take first channel
                    mono.extend(chunk.chunks(channels_count).map(|frame| frame[0]));
                    observer.on_frame(&mono, sample_rate);
                }
            },
            move |err| {
                tracing::error!("[CpalCapture] Input stream error: {}", err);
                if let Ok(mut observer) = observer.lock() {
                    observer.on_capture_failed(&err.to_string());
                }
            },
            None,
        )
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("{:?}", e),
        })?;

    stream.play().map_err(|e| AudioError::CaptureFailure {
        reason: format!("Input start failed: {}", e),
    })?;

    Ok(stream)
}

impl CaptureSource for CpalCapture {
    fn start(&mut self, observer: Box<dyn FrameObserver>) -> Result<(), AudioError> {
        if self.stream.is_some() {
            return Err(AudioError::AlreadyRunning);
        }
        let observer: SharedObserver = Arc::new(Mutex::new(observer));
        let stream = StreamThread::spawn("cpal-capture", move || build_input_stream(observer))?;
        tracing::info!("[CpalCapture] Input stream started");
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        let stream = self.stream.take().ok_or(AudioError::NotRunning)?;
        stream.stop();
        tracing::info!("[CpalCapture] Input stream stopped");
        Ok(())
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
    }
}

/// Click playback through the default output device.
///
/// The output stream runs for the player's lifetime and renders silence
/// until `play_click` restarts the pre-generated click sample.
pub struct CpalClickPlayer {
    trigger: Arc<AtomicBool>,
    stream: Mutex<Option<StreamThread>>,
}

fn build_output_stream(trigger: Arc<AtomicBool>) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::StreamOpenFailed {
            reason: "No default output device found".to_string(),
        })?;

    let config = device
        .default_output_config()
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("Failed to get default output config: {:?}", e),
        })?;

    if config.sample_format() != cpal::SampleFormat::F32 {
        return Err(AudioError::StreamOpenFailed {
            reason: "Only F32 sample format is currently supported for output".to_string(),
        });
    }

    let stream_config: cpal::StreamConfig = config.into();
    let channels_count = (stream_config.channels as usize).max(1);
    let click_samples = generate_click_sample(stream_config.sample_rate.0);
    let mut click_pos = click_samples.len();

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if trigger.swap(false, Ordering::AcqRel) {
                    click_pos = 0;
                }
                for frame in data.chunks_mut(channels_count) {
                    let sample_val = click_samples.get(click_pos).copied().unwrap_or(0.0);
                    if click_pos < click_samples.len() {
                        click_pos += 1;
                    }
                    // Write to all channels
                    frame.iter_mut().for_each(|slot| *slot = sample_val);
                }
            },
            |err| tracing::error!("[CpalClickPlayer] Output stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamOpenFailed {
            reason: format!("{:?}", e),
        })?;

    stream.play().map_err(|e| AudioError::StreamOpenFailed {
        reason: format!("Output start failed: {}", e),
    })?;

    Ok(stream)
}

impl CpalClickPlayer {
    pub fn new() -> Result<Self, AudioError> {
        let trigger = Arc::new(AtomicBool::new(false));
        let stream_trigger = Arc::clone(&trigger);
        let stream =
            StreamThread::spawn("cpal-click", move || build_output_stream(stream_trigger))?;
        Ok(Self {
            trigger,
            stream: Mutex::new(Some(stream)),
        })
    }
}

impl ClickPlayer for CpalClickPlayer {
    fn play_click(&self) {
        self.trigger.store(true, Ordering::Release);
    }
}

impl Drop for CpalClickPlayer {
    fn drop(&mut self) {
        let stream = match self.stream.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(stream) = stream {
            stream.stop();
        }
    }
}
