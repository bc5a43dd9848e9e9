//! TrainingSession: orchestration layer for one rhythm-training session.
//!
//! Every state change goes through a single event queue. The tick
//! scheduler, the analysis thread (via a hit observer), the capture
//! stream (failures only) and any [`SessionHandle`] push
//! [`SessionEvent`]s; `handle_event` consumes them one at a time, so the
//! beat clock, scoring counters and snapshot are only ever touched from
//! the thread that owns the session.
//!
//! Resources are scoped to the Running phase: capture and the analysis
//! thread start when the countdown ends and are released by `teardown`,
//! which runs on completion, stop, capture failure, reset and drop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::analysis::scoring::{
    ResponseSource, ScoreCounters, ScoringEngine, SessionSummary, TimingWindows,
};
use crate::analysis::spectral::SpectralAnalyzer;
use crate::analysis::{
    spawn_analysis_thread, AnalysisPipeline, AnalysisStats, AudioHit, HitObserver,
    HitSubscribers, ObserverId,
};
use crate::audio::buffer_pool::{BufferPool, FrameWriter};
use crate::audio::metronome::{BeatClock, BeatGrid, ClockEvent, SessionPhase, SessionState};
use crate::audio::scheduler::{TickScheduler, TickSink};
use crate::config::{AppConfig, InputMode};
use crate::engine::backend::{
    CaptureSource, ClickPlayer, FrameObserver, PermissionProvider, SystemTimeSource, TimeSource,
};
use crate::error::{log_audio_error, log_session_error, AudioError, ErrorCode, SessionError};
use crate::managers::BroadcastChannelManager;
use crate::telemetry::{self, DiagnosticError};

#[path = "core_subscriptions.rs"]
mod core_subscriptions;

#[cfg(test)]
mod tests;

/// Everything that can change a session, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Scheduled beat-clock tick
    Tick { at: Instant },
    /// Manual tap
    Tap { at: Instant },
    /// Acoustic hit from the analysis thread
    Hit(AudioHit),
    /// The capture stream died
    CaptureFailed { reason: String },
    /// User abort
    Stop,
}

/// One metronome click, for the display layer's indicator pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickPulse {
    pub phase: SessionPhase,
    pub countdown_remaining: u32,
    /// Beat the click marks; `None` during the countdown
    pub beat_index: Option<u32>,
}

/// Why a session reached Finished. Published exactly once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminalNotice {
    Completed,
    Stopped,
    CaptureFailed { reason: String },
    Aborted { reason: String },
}

/// Immutable view of a session for the display layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub input_mode: InputMode,
    pub total_beats: u32,
    pub counters: ScoreCounters,
    pub summary: Option<SessionSummary>,
    pub notice: Option<TerminalNotice>,
}

/// External collaborators a session is built from.
pub struct SessionCollaborators {
    /// Required in acoustic mode, never started in manual mode
    pub capture: Option<Box<dyn CaptureSource>>,
    pub click_player: Arc<dyn ClickPlayer>,
    /// Required in acoustic mode
    pub permission: Option<Arc<dyn PermissionProvider>>,
    pub time_source: Arc<dyn TimeSource>,
}

impl SessionCollaborators {
    pub fn manual(click_player: Arc<dyn ClickPlayer>) -> Self {
        Self {
            capture: None,
            click_player,
            permission: None,
            time_source: Arc::new(SystemTimeSource::default()),
        }
    }

    pub fn acoustic(
        capture: Box<dyn CaptureSource>,
        click_player: Arc<dyn ClickPlayer>,
        permission: Arc<dyn PermissionProvider>,
    ) -> Self {
        Self {
            capture: Some(capture),
            click_player,
            permission: Some(permission),
            time_source: Arc::new(SystemTimeSource::default()),
        }
    }

    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }
}

/// Cloneable handle for input and display layers on other threads.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<SessionEvent>,
    time_source: Arc<dyn TimeSource>,
}

impl SessionHandle {
    /// Queue a manual tap stamped now. Returns false once the session is gone.
    pub fn tap(&self) -> bool {
        self.tap_at(self.time_source.now())
    }

    pub fn tap_at(&self, at: Instant) -> bool {
        self.events.send(SessionEvent::Tap { at }).is_ok()
    }

    pub fn stop(&self) -> bool {
        self.events.send(SessionEvent::Stop).is_ok()
    }
}

struct QueueTickSink(mpsc::UnboundedSender<SessionEvent>);

impl TickSink for QueueTickSink {
    fn on_tick(&mut self, at: Instant) -> bool {
        self.0.send(SessionEvent::Tick { at }).is_ok()
    }
}

struct HitForwarder(mpsc::UnboundedSender<SessionEvent>);

impl HitObserver for HitForwarder {
    fn on_hit(&mut self, hit: AudioHit) {
        let _ = self.0.send(SessionEvent::Hit(hit));
    }
}

/// Frame observer handed to the capture source: frames go to the buffer
/// pool, stream failures go to the event queue.
struct CaptureObserver {
    writer: FrameWriter,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl FrameObserver for CaptureObserver {
    fn on_frame(&mut self, samples: &[f32], sample_rate: u32) {
        self.writer.on_frame(samples, sample_rate);
    }

    fn on_capture_failed(&mut self, reason: &str) {
        let _ = self.events.send(SessionEvent::CaptureFailed {
            reason: reason.to_string(),
        });
    }
}

/// Resources held only while an acoustic session is Running
struct AcousticRun {
    accepting: Arc<AtomicBool>,
    analysis_running: Arc<AtomicBool>,
    worker: JoinHandle<AnalysisPipeline>,
    observer_id: Option<ObserverId>,
    dropped: Arc<AtomicU64>,
    stats: Arc<AnalysisStats>,
}

/// One training session: beat clock, scoring and (in acoustic mode) the
/// capture → analysis pipeline.
pub struct TrainingSession {
    config: AppConfig,
    mode: InputMode,
    clock: BeatClock,
    scoring: ScoringEngine,

    capture: Option<Box<dyn CaptureSource>>,
    click_player: Arc<dyn ClickPlayer>,
    time_source: Arc<dyn TimeSource>,
    pipeline: Option<AnalysisPipeline>,
    acoustic: Option<AcousticRun>,
    scheduler: Option<TickScheduler>,

    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    hit_subscribers: HitSubscribers,
    broadcasts: BroadcastChannelManager,
    snapshot_tx: watch::Sender<SessionSnapshot>,

    summary: Option<SessionSummary>,
    notice: Option<TerminalNotice>,
}

impl TrainingSession {
    /// Validate `config`, acquire permission and the FFT context.
    ///
    /// # Errors
    /// - Config errors (`TempoOutOfRange`, `DurationOutOfRange`, `InvalidConfig`)
    /// - `PermissionDenied` when acoustic capture is refused
    /// - `AllocationFailure` when the FFT context cannot be built
    pub async fn prepare(
        config: AppConfig,
        collaborators: SessionCollaborators,
    ) -> Result<Self, SessionError> {
        if let Err(err) = config.validate() {
            log_session_error(&err, "prepare");
            return Err(err);
        }
        let grid = BeatGrid::new(config.session.tempo_bpm, config.session.duration_secs)?;
        let mode = config.session.input_mode;

        let SessionCollaborators {
            capture,
            click_player,
            permission,
            time_source,
        } = collaborators;

        let (capture, pipeline) = match mode {
            InputMode::Manual => (None, None),
            InputMode::Acoustic => {
                let capture = capture.ok_or_else(|| SessionError::InvalidConfig {
                    reason: "acoustic mode requires a capture source".to_string(),
                })?;
                let permission = permission.ok_or_else(|| SessionError::InvalidConfig {
                    reason: "acoustic mode requires a permission provider".to_string(),
                })?;

                if !permission.request_microphone_permission().await {
                    let err = SessionError::PermissionDenied;
                    log_session_error(&err, "prepare");
                    telemetry::hub()
                        .record_error(DiagnosticError::PermissionDenied, "microphone refused");
                    return Err(err);
                }

                let analyzer = SpectralAnalyzer::new(&config.spectral).map_err(|err| {
                    log_audio_error(&err, "prepare");
                    SessionError::from(err)
                })?;
                let pipeline = AnalysisPipeline::new(analyzer, config.onset_detection.clone());
                (Some(capture), Some(pipeline))
            }
        };

        let clock = BeatClock::new(grid, config.session.countdown_beats);
        let scoring = ScoringEngine::new(grid, TimingWindows::from(&config.scoring));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(SessionSnapshot {
            state: clock.state(),
            input_mode: mode,
            total_beats: grid.total_beats(),
            counters: ScoreCounters::default(),
            summary: None,
            notice: None,
        });

        tracing::info!(
            "[TrainingSession] Prepared {:?} session: {} BPM, {} s, {} beats",
            mode,
            grid.tempo_bpm(),
            grid.duration_secs(),
            grid.total_beats()
        );

        Ok(Self {
            config,
            mode,
            clock,
            scoring,
            capture,
            click_player,
            time_source,
            pipeline,
            acoustic: None,
            scheduler: None,
            events_tx,
            events_rx,
            hit_subscribers: HitSubscribers::new(),
            broadcasts: BroadcastChannelManager::new(),
            snapshot_tx,
            summary: None,
            notice: None,
        })
    }

    /// Start the countdown now and spawn the tick scheduler.
    ///
    /// # Errors
    /// `InvalidState` unless Idle; `AllocationFailure` if the scheduler
    /// thread cannot be spawned (the session is then Finished).
    pub fn start(&mut self) -> Result<(), SessionError> {
        let now = self.time_source.now();
        self.start_at(now)?;
        if self.clock.phase() == SessionPhase::Finished {
            return Ok(());
        }

        let period = self.clock.grid().beat_interval();
        match TickScheduler::spawn(period, QueueTickSink(self.events_tx.clone())) {
            Ok(scheduler) => {
                self.scheduler = Some(scheduler);
                Ok(())
            }
            Err(err) => {
                let err = SessionError::AllocationFailure {
                    reason: format!("tick scheduler: {}", err),
                };
                log_session_error(&err, "start");
                telemetry::hub().record_error(DiagnosticError::SchedulerFailure, err.message());
                self.finish(TerminalNotice::Aborted {
                    reason: err.message(),
                });
                Err(err)
            }
        }
    }

    /// Start the countdown at `now` without a scheduler; ticks are then
    /// fed through [`handle_event`](Self::handle_event).
    pub fn start_at(&mut self, now: Instant) -> Result<(), SessionError> {
        let event = self.clock.start(now)?;
        tracing::info!("[TrainingSession] Session started");
        if self.clock.phase() == SessionPhase::Countdown {
            telemetry::hub().record_phase(SessionPhase::Countdown);
        }
        self.on_clock_event(event);
        Ok(())
    }

    /// Apply one event. Returns the phase afterwards.
    pub fn handle_event(&mut self, event: SessionEvent) -> SessionPhase {
        match event {
            SessionEvent::Tick { at } => {
                let clock_event = self.clock.tick(at);
                self.on_clock_event(clock_event);
            }
            SessionEvent::Tap { at } => {
                if self.mode == InputMode::Manual {
                    self.respond(at, ResponseSource::Manual);
                } else {
                    tracing::debug!("[TrainingSession] Ignoring tap in acoustic mode");
                }
            }
            SessionEvent::Hit(hit) => {
                if self.mode == InputMode::Acoustic {
                    self.respond(hit.timestamp, ResponseSource::Acoustic);
                }
            }
            SessionEvent::CaptureFailed { reason } => {
                if self.clock.phase() != SessionPhase::Finished {
                    tracing::error!("[TrainingSession] Capture failed: {}", reason);
                    telemetry::hub().record_error(DiagnosticError::CaptureFailure, reason.clone());
                    self.finish(TerminalNotice::CaptureFailed { reason });
                }
            }
            SessionEvent::Stop => {
                if self.clock.phase() != SessionPhase::Finished {
                    tracing::info!("[TrainingSession] Stopped by user");
                    self.finish(TerminalNotice::Stopped);
                }
            }
        }
        self.clock.phase()
    }

    /// Wait for the next queued event and apply it.
    pub async fn step(&mut self) -> Option<SessionPhase> {
        let event = self.events_rx.recv().await?;
        Some(self.handle_event(event))
    }

    /// Apply every event already queued. Returns how many were handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Consume events until the session finishes.
    ///
    /// # Errors
    /// `InvalidState` if the session was never started.
    pub async fn run(&mut self) -> Result<SessionSummary, SessionError> {
        if self.clock.phase() == SessionPhase::Idle {
            return Err(SessionError::InvalidState {
                expected: "Countdown or Running".to_string(),
                actual: SessionPhase::Idle.to_string(),
            });
        }

        while self.summary.is_none() {
            match self.events_rx.recv().await {
                Some(event) => {
                    self.handle_event(event);
                }
                None => break,
            }
        }

        self.summary.ok_or_else(|| SessionError::InvalidState {
            expected: SessionPhase::Finished.to_string(),
            actual: self.clock.phase().to_string(),
        })
    }

    /// Abort immediately: ticking halts and capture is released before
    /// this returns.
    pub fn stop(&mut self) {
        self.handle_event(SessionEvent::Stop);
    }

    /// Back to Idle with zeroed counters. Stale queued events are discarded.
    pub fn reset(&mut self) {
        self.teardown();
        self.clock.reset();
        self.scoring.reset();
        self.summary = None;
        self.notice = None;
        while self.events_rx.try_recv().is_ok() {}
        telemetry::hub().record_phase(SessionPhase::Idle);
        self.publish();
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            events: self.events_tx.clone(),
            time_source: Arc::clone(&self.time_source),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.clock.state(),
            input_mode: self.mode,
            total_beats: self.clock.grid().total_beats(),
            counters: self.scoring.counters(),
            summary: self.summary,
            notice: self.notice.clone(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.clock.phase()
    }

    pub fn input_mode(&self) -> InputMode {
        self.mode
    }

    pub fn grid(&self) -> &BeatGrid {
        self.clock.grid()
    }

    pub fn summary(&self) -> Option<SessionSummary> {
        self.summary
    }

    pub fn notice(&self) -> Option<&TerminalNotice> {
        self.notice.as_ref()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Whether capture and the analysis thread are currently held
    pub fn is_capturing(&self) -> bool {
        self.acoustic.is_some()
    }

    fn on_clock_event(&mut self, event: ClockEvent) {
        if event.emits_click() {
            // Fire and forget; playback never gates the clock
            self.click_player.play_click();
            let state = self.clock.state();
            let beat_index = match state.phase {
                SessionPhase::Running | SessionPhase::Finished => Some(state.current_beat_index),
                SessionPhase::Idle | SessionPhase::Countdown => None,
            };
            self.broadcasts.publish_click(ClickPulse {
                phase: state.phase,
                countdown_remaining: state.countdown_remaining,
                beat_index,
            });
        }

        match event {
            ClockEvent::RunningStarted => {
                tracing::info!("[TrainingSession] Countdown complete, running");
                telemetry::hub().record_phase(SessionPhase::Running);
                if self.mode == InputMode::Acoustic {
                    if let Err(err) = self.begin_capture() {
                        log_session_error(&err, "begin_capture");
                        telemetry::hub()
                            .record_error(DiagnosticError::CaptureFailure, err.message());
                        self.finish(TerminalNotice::CaptureFailed {
                            reason: err.message(),
                        });
                    }
                }
            }
            ClockEvent::Finished { index } => {
                tracing::info!("[TrainingSession] Final beat {} reached", index);
                self.finish(TerminalNotice::Completed);
            }
            ClockEvent::CountdownClick { .. } | ClockEvent::Beat { .. } | ClockEvent::Ignored => {}
        }

        self.publish();
    }

    fn respond(&mut self, at: Instant, source: ResponseSource) {
        let Some(elapsed) = self.clock.elapsed_at(at) else {
            tracing::debug!(
                "[TrainingSession] Ignoring {:?} response outside Running",
                source
            );
            return;
        };

        let judgement = self.scoring.judge(elapsed, source);
        tracing::debug!(
            "[TrainingSession] {:?} {:?} at {:.3}s (beat {:?}, off by {:.3}s)",
            source,
            judgement.grade,
            elapsed,
            judgement.beat_index,
            judgement.distance_secs
        );
        telemetry::hub().record_judgement(&judgement);
        self.broadcasts.publish_judgement(judgement);
        self.publish();
    }

    fn begin_capture(&mut self) -> Result<(), SessionError> {
        if self.capture.is_none() {
            return Err(SessionError::InvalidConfig {
                reason: "acoustic mode requires a capture source".to_string(),
            });
        }
        let pipeline = self
            .pipeline
            .take()
            .ok_or_else(|| SessionError::AllocationFailure {
                reason: "analysis pipeline unavailable".to_string(),
            })?;

        let buffer_size = self
            .config
            .audio
            .buffer_size
            .max(self.config.spectral.buffer_size)
            .max(1);
        let (capture_channels, analysis_channels) =
            BufferPool::new(self.config.audio.buffer_pool_size.max(1), buffer_size)
                .split_for_threads();

        let accepting = Arc::new(AtomicBool::new(true));
        let analysis_running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(AnalysisStats::default());

        let worker = spawn_analysis_thread(
            analysis_channels,
            pipeline,
            self.hit_subscribers.clone(),
            Some(self.broadcasts.monitor_sender()),
            Arc::clone(&analysis_running),
            Arc::clone(&stats),
        )
        .map_err(|err| SessionError::AllocationFailure {
            reason: format!("analysis thread: {}", err),
        })?;

        let observer_id = match self
            .hit_subscribers
            .subscribe(Box::new(HitForwarder(self.events_tx.clone())))
        {
            Ok(id) => Some(id),
            Err(err) => {
                log_audio_error(&err, "begin_capture");
                None
            }
        };

        let writer = FrameWriter::new(
            capture_channels,
            Arc::clone(&accepting),
            Arc::clone(&self.time_source),
        );
        let dropped = writer.dropped_counter();
        let observer = CaptureObserver {
            writer,
            events: self.events_tx.clone(),
        };

        // Registered before starting so teardown reclaims the worker on failure
        self.acoustic = Some(AcousticRun {
            accepting,
            analysis_running,
            worker,
            observer_id,
            dropped,
            stats,
        });

        if let Some(capture) = self.capture.as_mut() {
            capture.start(Box::new(observer))?;
        }
        tracing::info!("[TrainingSession] Capture started");
        Ok(())
    }

    fn end_capture(&mut self) {
        let Some(run) = self.acoustic.take() else {
            return;
        };

        // Close the gate first: nothing captured from here on is analyzed
        run.accepting.store(false, Ordering::Release);
        if let Some(capture) = self.capture.as_mut() {
            match capture.stop() {
                Ok(()) | Err(AudioError::NotRunning) => {}
                Err(err) => log_audio_error(&err, "end_capture"),
            }
        }

        if let Some(id) = run.observer_id {
            if let Err(err) = self.hit_subscribers.unsubscribe(id) {
                log_audio_error(&err, "end_capture");
            }
        }

        run.analysis_running.store(false, Ordering::Release);
        match run.worker.join() {
            Ok(mut pipeline) => {
                pipeline.reset();
                self.pipeline = Some(pipeline);
            }
            Err(_) => tracing::warn!("[TrainingSession] Analysis thread panicked"),
        }

        let dropped = run.dropped.load(Ordering::Relaxed);
        telemetry::hub().record_dropped_frames(dropped);
        tracing::info!(
            "[TrainingSession] Capture stopped: {} frames analyzed, {} skipped, {} dropped, {} hits",
            run.stats.frames_processed.load(Ordering::Relaxed),
            run.stats.frames_skipped.load(Ordering::Relaxed),
            dropped,
            run.stats.hits_detected.load(Ordering::Relaxed)
        );
    }

    /// Release the scheduler and capture. Safe to call any number of times.
    fn teardown(&mut self) {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.cancel();
        }
        self.end_capture();
    }

    fn finish(&mut self, notice: TerminalNotice) {
        if self.summary.is_some() {
            return;
        }

        self.clock.abort();
        self.teardown();

        let summary = self.scoring.finalize();
        tracing::info!(
            "[TrainingSession] Finished ({:?}): perfect {}, good {}, missed {}, skipped {}, extra {}, accuracy {:.1}%",
            notice,
            summary.counters.perfect,
            summary.counters.good,
            summary.counters.missed,
            summary.counters.skipped,
            summary.counters.extra,
            summary.accuracy_percent()
        );
        telemetry::hub().record_phase(SessionPhase::Finished);

        self.summary = Some(summary);
        self.notice = Some(notice);
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

impl Drop for TrainingSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
