use super::*;
use crate::audio::buffer_pool::{BufferPool, FrameWriter};
use crate::config::SpectralConfig;
use crate::engine::backend::{FrameObserver, SystemTimeSource};
use std::f32::consts::PI;
use std::sync::mpsc;

const SAMPLE_RATE: u32 = 44100;

fn sine(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| amplitude * (2.0 * PI * freq * i as f32 / SAMPLE_RATE as f32).sin())
        .collect()
}

fn pipeline() -> AnalysisPipeline {
    let analyzer = SpectralAnalyzer::new(&SpectralConfig::default()).unwrap();
    AnalysisPipeline::new(analyzer, OnsetDetectionConfig::default())
}

struct ChannelObserver(mpsc::Sender<AudioHit>);

impl HitObserver for ChannelObserver {
    fn on_hit(&mut self, hit: AudioHit) {
        let _ = self.0.send(hit);
    }
}

#[test]
fn test_kick_burst_after_quiet_frames_is_a_hit() {
    let mut pipeline = pipeline();
    let start = Instant::now();
    let quiet = sine(100.0, 0.02, 2048);
    let kick = sine(100.0, 0.8, 2048);

    for i in 0..4 {
        let at = start + Duration::from_millis(46 * i);
        assert!(pipeline.process_frame(&quiet, SAMPLE_RATE, at).unwrap().is_none());
    }

    let kick_at = start + Duration::from_millis(200);
    let hit = pipeline
        .process_frame(&kick, SAMPLE_RATE, kick_at)
        .unwrap()
        .expect("low-frequency burst should register");
    assert_eq!(hit.timestamp, kick_at);
    assert!((hit.intensity - 0.8).abs() < 0.01);
}

#[test]
fn test_tonal_burst_outside_percussive_bands_is_ignored() {
    let mut pipeline = pipeline();
    let start = Instant::now();
    let quiet = sine(650.0, 0.02, 2048);
    let tone = sine(650.0, 0.5, 2048);

    for _ in 0..4 {
        pipeline.process_frame(&quiet, SAMPLE_RATE, start).unwrap();
    }
    assert!(pipeline.process_frame(&tone, SAMPLE_RATE, start).unwrap().is_none());
    assert!(pipeline.detector().observation().volume_spike);
}

#[test]
fn test_invalid_frames_are_rejected_without_touching_history() {
    let mut pipeline = pipeline();
    let now = Instant::now();

    assert!(pipeline.process_frame(&[], SAMPLE_RATE, now).is_err());
    assert!(pipeline
        .process_frame(&[0.1, f32::NAN, 0.2], SAMPLE_RATE, now)
        .is_err());
    assert!(pipeline
        .process_frame(&sine(100.0, 0.5, 2048), 48000, now)
        .is_err());
    assert!(pipeline.detector().history().is_empty());
}

#[test]
fn test_subscribers_register_and_remove() {
    let subscribers = HitSubscribers::new();
    let (tx, rx) = mpsc::channel();

    let id = subscribers
        .subscribe(Box::new(ChannelObserver(tx)))
        .unwrap();
    assert_eq!(subscribers.len(), 1);

    let hit = AudioHit {
        timestamp: Instant::now(),
        intensity: 0.4,
    };
    subscribers.notify(hit);
    assert_eq!(rx.try_recv().unwrap(), hit);

    assert!(subscribers.unsubscribe(id).unwrap());
    assert!(!subscribers.unsubscribe(id).unwrap());
    subscribers.notify(hit);
    assert!(rx.try_recv().is_err());
    assert!(subscribers.is_empty());
}

#[test]
fn test_worker_delivers_hits_and_exits_on_shutdown() {
    let (capture, analysis) = BufferPool::new(16, 2048).split_for_threads();
    let running = Arc::new(AtomicBool::new(true));
    let mut writer = FrameWriter::new(
        capture,
        Arc::clone(&running),
        Arc::new(SystemTimeSource::default()),
    );

    let subscribers = HitSubscribers::new();
    let (tx, rx) = mpsc::channel();
    subscribers
        .subscribe(Box::new(ChannelObserver(tx)))
        .unwrap();

    let (monitor_tx, mut monitor_rx) = broadcast::channel(32);
    let stats = Arc::new(AnalysisStats::default());
    let handle = spawn_analysis_thread(
        analysis,
        pipeline(),
        subscribers,
        Some(monitor_tx),
        Arc::clone(&running),
        Arc::clone(&stats),
    )
    .unwrap();

    let quiet = sine(100.0, 0.02, 2048);
    for _ in 0..4 {
        writer.on_frame(&quiet, SAMPLE_RATE);
    }
    writer.on_frame(&[], SAMPLE_RATE);
    writer.on_frame(&sine(100.0, 0.8, 2048), SAMPLE_RATE);

    let hit = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("worker should report the burst");
    assert!(hit.intensity > 0.7);

    running.store(false, Ordering::Release);
    handle.join().unwrap();

    assert_eq!(stats.hits_detected.load(Ordering::Relaxed), 1);
    assert_eq!(stats.frames_skipped.load(Ordering::Relaxed), 1);
    assert_eq!(stats.frames_processed.load(Ordering::Relaxed), 5);

    let mut last = None;
    while let Ok(snapshot) = monitor_rx.try_recv() {
        last = Some(snapshot);
    }
    let last = last.expect("monitor snapshots should be published");
    assert!(last.hit_indicator);
    assert_eq!(last.hits_detected, 1);
}

#[test]
fn test_worker_exits_when_idle() {
    let (_capture, analysis) = BufferPool::new(4, 2048).split_for_threads();
    let running = Arc::new(AtomicBool::new(true));
    let handle = spawn_analysis_thread(
        analysis,
        pipeline(),
        HitSubscribers::new(),
        None,
        Arc::clone(&running),
        Arc::new(AnalysisStats::default()),
    )
    .unwrap();

    thread::sleep(Duration::from_millis(20));
    assert!(!handle.is_finished());

    running.store(false, Ordering::Release);
    handle.join().unwrap();
}
