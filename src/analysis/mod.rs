// Analysis module - acoustic hit detection pipeline
//
// Frames captured by the audio backend arrive through the buffer pool's
// DATA_QUEUE. The analysis thread runs each one through
// SpectralAnalyzer → OnsetDetector and notifies hit observers.
//
// Architecture:
// - AnalysisPipeline: per-frame DSP (also used offline by the CLI)
// - AnalysisWorker: thread loop draining DATA_QUEUE and recycling buffers
// - HitSubscribers: registry of observers notified per AudioHit
// - MonitorSnapshot: display-layer view of loudness and dominant peaks

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rtrb::PopError;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::audio::buffer_pool::{AnalysisChannels, AudioBuffer};
use crate::config::OnsetDetectionConfig;
use crate::error::AudioError;
use crate::telemetry::{self, DiagnosticError};

pub mod onset;
pub mod scoring;
pub mod spectral;

#[cfg(test)]
mod tests;

use onset::OnsetDetector;
use spectral::SpectralAnalyzer;

/// A detected percussive onset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioHit {
    /// Capture time of the frame that contained the onset
    pub timestamp: Instant,
    /// Peak absolute amplitude of that frame
    pub intensity: f32,
}

/// Display-layer view of the latest analyzed frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub loudness: f32,
    pub dominant_frequencies: Vec<f32>,
    /// Lit for a short hold time after each hit
    pub hit_indicator: bool,
    pub hits_detected: u64,
}

/// Receives every AudioHit produced by the analysis thread
pub trait HitObserver: Send {
    fn on_hit(&mut self, hit: AudioHit);
}

/// Handle returned by [`HitSubscribers::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
struct ObserverTable {
    next_id: u64,
    observers: Vec<(ObserverId, Box<dyn HitObserver>)>,
}

/// Shared registry of hit observers
///
/// Cloning yields another handle to the same registry, so the session can
/// subscribe and unsubscribe while the analysis thread notifies.
#[derive(Clone, Default)]
pub struct HitSubscribers {
    table: Arc<Mutex<ObserverTable>>,
}

impl HitSubscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Box<dyn HitObserver>) -> Result<ObserverId, AudioError> {
        let mut table = self.lock()?;
        let id = ObserverId(table.next_id);
        table.next_id += 1;
        table.observers.push((id, observer));
        Ok(id)
    }

    /// Remove an observer. Returns false if `id` was not registered.
    pub fn unsubscribe(&self, id: ObserverId) -> Result<bool, AudioError> {
        let mut table = self.lock()?;
        let before = table.observers.len();
        table.observers.retain(|(existing, _)| *existing != id);
        Ok(table.observers.len() != before)
    }

    pub fn notify(&self, hit: AudioHit) {
        // A poisoned table means an observer panicked; stop delivering
        if let Ok(mut table) = self.table.lock() {
            for (_, observer) in table.observers.iter_mut() {
                observer.on_hit(hit);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.table
            .lock()
            .map(|table| table.observers.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ObserverTable>, AudioError> {
        self.table.lock().map_err(|_| AudioError::LockPoisoned {
            component: "hit_subscribers".to_string(),
        })
    }
}

/// Per-frame DSP: spectrum, then onset decision
pub struct AnalysisPipeline {
    analyzer: SpectralAnalyzer,
    detector: OnsetDetector,
}

impl AnalysisPipeline {
    pub fn new(analyzer: SpectralAnalyzer, onset_config: OnsetDetectionConfig) -> Self {
        Self {
            analyzer,
            detector: OnsetDetector::with_config(onset_config),
        }
    }

    /// Analyze one frame captured at `captured_at`.
    ///
    /// # Errors
    /// `AudioError::InvalidFrame` for empty frames, non-finite samples or a
    /// sample rate other than the analyzer's. Detector state is untouched.
    pub fn process_frame(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        captured_at: Instant,
    ) -> Result<Option<AudioHit>, AudioError> {
        if sample_rate != self.analyzer.sample_rate() {
            return Err(AudioError::InvalidFrame {
                reason: format!(
                    "sample rate {} Hz, expected {} Hz",
                    sample_rate,
                    self.analyzer.sample_rate()
                ),
            });
        }

        let bin_width = self.analyzer.bin_width();
        let frame_len = samples.len().min(self.analyzer.buffer_size());
        let spectrum = self.analyzer.analyze(samples)?;

        Ok(self
            .detector
            .process(&samples[..frame_len], spectrum, bin_width, captured_at))
    }

    pub fn detector(&self) -> &OnsetDetector {
        &self.detector
    }

    pub fn analyzer(&self) -> &SpectralAnalyzer {
        &self.analyzer
    }

    pub fn reset(&mut self) {
        self.detector.reset();
    }
}

/// Counters shared between the analysis thread and its owner
#[derive(Debug, Default)]
pub struct AnalysisStats {
    pub frames_processed: AtomicU64,
    pub frames_skipped: AtomicU64,
    pub hits_detected: AtomicU64,
}

struct AnalysisWorker {
    channels: AnalysisChannels,
    pipeline: AnalysisPipeline,
    subscribers: HitSubscribers,
    monitor_tx: Option<broadcast::Sender<MonitorSnapshot>>,
    running: Arc<AtomicBool>,
    stats: Arc<AnalysisStats>,
}

impl AnalysisWorker {
    fn process_buffer(&mut self, buffer: &AudioBuffer) {
        match self
            .pipeline
            .process_frame(&buffer.samples, buffer.sample_rate, buffer.captured_at)
        {
            Ok(hit) => {
                self.stats.frames_processed.fetch_add(1, Ordering::Relaxed);
                if let Some(hit) = hit {
                    let total = self.stats.hits_detected.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::debug!(
                        "[AnalysisThread] Hit #{} (intensity {:.3})",
                        total,
                        hit.intensity
                    );
                    telemetry::hub().record_onset(&hit);
                    self.subscribers.notify(hit);
                }
                self.publish_monitor(buffer.captured_at);
            }
            Err(err) => {
                self.stats.frames_skipped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("[AnalysisThread] Skipping frame: {}", err);
                telemetry::hub().record_error(DiagnosticError::InvalidFrame, err.to_string());
            }
        }
    }

    fn publish_monitor(&self, now: Instant) {
        if let Some(ref tx) = self.monitor_tx {
            let detector = self.pipeline.detector();
            let snapshot = MonitorSnapshot {
                loudness: detector.loudness(),
                dominant_frequencies: detector.dominant_frequencies().to_vec(),
                hit_indicator: detector.indicator_active(now),
                hits_detected: self.stats.hits_detected.load(Ordering::Relaxed),
            };
            // No receivers is fine
            let _ = tx.send(snapshot);
        }
    }

    fn run(mut self) -> AnalysisPipeline {
        tracing::info!("[AnalysisThread] Starting analysis loop");

        loop {
            let buffer = match self.channels.data_consumer.pop() {
                Ok(buf) => buf,
                Err(PopError::Empty) => {
                    // Check the running flag only when the queue is drained
                    if !self.running.load(Ordering::Acquire) {
                        tracing::info!(
                            "[AnalysisThread] Shutdown requested and queue empty, exiting"
                        );
                        break;
                    }
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
            };

            // Frames still queued after shutdown are recycled unanalyzed
            if self.running.load(Ordering::Acquire) {
                self.process_buffer(&buffer);
            }

            if self.channels.pool_producer.push(buffer).is_err() {
                tracing::warn!("[AnalysisThread] Pool queue full, dropping buffer");
            }
        }

        self.pipeline
    }
}

/// Spawn the analysis thread.
///
/// The thread exits once `running` is cleared and the data queue is empty,
/// handing the pipeline back so its FFT context outlives the thread.
///
/// # Errors
/// Returns the OS error if the thread cannot be spawned.
pub fn spawn_analysis_thread(
    channels: AnalysisChannels,
    pipeline: AnalysisPipeline,
    subscribers: HitSubscribers,
    monitor_tx: Option<broadcast::Sender<MonitorSnapshot>>,
    running: Arc<AtomicBool>,
    stats: Arc<AnalysisStats>,
) -> io::Result<JoinHandle<AnalysisPipeline>> {
    let worker = AnalysisWorker {
        channels,
        pipeline,
        subscribers,
        monitor_tx,
        running,
        stats,
    };

    thread::Builder::new()
        .name("analysis".to_string())
        .spawn(move || worker.run())
}
