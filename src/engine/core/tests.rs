use super::*;
use crate::analysis::scoring::Grade;
use crate::engine::backend::SilentClickPlayer;
use futures::executor::block_on;
use std::time::Duration;

fn manual_config(tempo_bpm: u32, duration_secs: u32) -> AppConfig {
    let mut config = AppConfig::default();
    config.session.tempo_bpm = tempo_bpm;
    config.session.duration_secs = duration_secs;
    config.session.input_mode = InputMode::Manual;
    config
}

fn manual_session(tempo_bpm: u32, duration_secs: u32) -> (TrainingSession, Arc<SilentClickPlayer>) {
    let clicks = Arc::new(SilentClickPlayer::new());
    let session = block_on(TrainingSession::prepare(
        manual_config(tempo_bpm, duration_secs),
        SessionCollaborators::manual(clicks.clone()),
    ))
    .unwrap();
    (session, clicks)
}

/// Start at `t0`, tick through the countdown, return the running start.
fn run_countdown(session: &mut TrainingSession, t0: Instant) -> Instant {
    session.start_at(t0).unwrap();
    let step = session.grid().beat_interval();
    for k in 1..=4 {
        session.handle_event(SessionEvent::Tick { at: t0 + step * k });
    }
    t0 + step * 4
}

#[test]
fn on_beat_taps_score_perfect() {
    let (mut session, clicks) = manual_session(90, 10);
    let running_at = run_countdown(&mut session, Instant::now());
    assert_eq!(session.phase(), SessionPhase::Running);

    let step = session.grid().beat_interval();
    for k in 0..15u32 {
        session.handle_event(SessionEvent::Tap {
            at: running_at + step * k,
        });
        session.handle_event(SessionEvent::Tick {
            at: running_at + step * (k + 1),
        });
    }

    assert_eq!(session.phase(), SessionPhase::Finished);
    let summary = session.summary().unwrap();
    assert_eq!(summary.total_beats, 15);
    assert_eq!(summary.counters.perfect, 15);
    assert_eq!(summary.counters.good, 0);
    assert_eq!(summary.counters.missed, 0);
    assert_eq!(summary.counters.skipped, 0);
    assert!((summary.accuracy_percent() - 100.0).abs() < 1e-9);
    assert_eq!(session.notice(), Some(&TerminalNotice::Completed));
    // Start click, 4 countdown ticks, 15 beat ticks
    assert_eq!(clicks.clicks(), 20);
}

#[test]
fn countdown_pulses_then_beats() {
    let (mut session, _) = manual_session(120, 10);
    let mut pulses = session.subscribe_clicks();
    run_countdown(&mut session, Instant::now());

    let received: Vec<ClickPulse> = std::iter::from_fn(|| pulses.try_recv().ok()).collect();
    let remaining: Vec<u32> = received.iter().map(|p| p.countdown_remaining).collect();
    assert_eq!(remaining, vec![4, 3, 2, 1, 0]);
    assert!(received[..4].iter().all(|p| p.beat_index.is_none()));
    assert_eq!(received[4].phase, SessionPhase::Running);
    assert_eq!(received[4].beat_index, Some(0));
}

#[test]
fn taps_outside_running_are_ignored() {
    let (mut session, _) = manual_session(90, 10);
    let t0 = Instant::now();
    session.handle_event(SessionEvent::Tap { at: t0 });

    session.start_at(t0).unwrap();
    session.handle_event(SessionEvent::Tap { at: t0 });
    assert_eq!(session.snapshot().counters, ScoreCounters::default());
}

#[test]
fn second_tap_on_same_beat_is_extra() {
    let (mut session, _) = manual_session(90, 10);
    let running_at = run_countdown(&mut session, Instant::now());

    session.handle_event(SessionEvent::Tap {
        at: running_at + Duration::from_millis(10),
    });
    session.handle_event(SessionEvent::Tap {
        at: running_at + Duration::from_millis(30),
    });

    let counters = session.snapshot().counters;
    assert_eq!(counters.perfect, 1);
    assert_eq!(counters.extra, 1);
}

#[test]
fn late_tap_is_good_and_off_grid_tap_is_missed() {
    let (mut session, _) = manual_session(60, 10);
    let running_at = run_countdown(&mut session, Instant::now());
    let mut judgements = session.subscribe_judgements();

    session.handle_event(SessionEvent::Tap {
        at: running_at + Duration::from_millis(1070),
    });
    session.handle_event(SessionEvent::Tap {
        at: running_at + Duration::from_millis(2500),
    });

    assert_eq!(judgements.try_recv().unwrap().grade, Grade::Good);
    let missed = judgements.try_recv().unwrap();
    assert_eq!(missed.grade, Grade::Missed);
    assert_eq!(missed.source, ResponseSource::Manual);
}

#[test]
fn stop_preserves_counters_and_ignores_later_events() {
    let (mut session, _) = manual_session(90, 10);
    let running_at = run_countdown(&mut session, Instant::now());
    let step = session.grid().beat_interval();

    session.handle_event(SessionEvent::Tap { at: running_at });
    session.stop();

    assert_eq!(session.phase(), SessionPhase::Finished);
    assert_eq!(session.notice(), Some(&TerminalNotice::Stopped));
    let summary = session.summary().unwrap();
    assert_eq!(summary.counters.perfect, 1);
    assert_eq!(summary.counters.skipped, 14);

    session.handle_event(SessionEvent::Tap {
        at: running_at + step,
    });
    session.handle_event(SessionEvent::Tick {
        at: running_at + step,
    });
    session.handle_event(SessionEvent::Stop);
    assert_eq!(session.snapshot().counters, summary.counters);
    assert_eq!(session.notice(), Some(&TerminalNotice::Stopped));
}

#[test]
fn reset_returns_to_idle_and_is_idempotent() {
    let (mut session, _) = manual_session(90, 10);
    let running_at = run_countdown(&mut session, Instant::now());
    session.handle_event(SessionEvent::Tap { at: running_at });

    session.reset();
    let first = session.snapshot();
    session.reset();
    let second = session.snapshot();

    assert_eq!(first, second);
    assert_eq!(first.state.phase, SessionPhase::Idle);
    assert_eq!(first.counters, ScoreCounters::default());
    assert!(first.summary.is_none());
    assert!(first.notice.is_none());

    // A reset session can run again
    run_countdown(&mut session, Instant::now());
    assert_eq!(session.phase(), SessionPhase::Running);
}

#[test]
fn start_twice_is_rejected() {
    let (mut session, _) = manual_session(90, 10);
    session.start_at(Instant::now()).unwrap();
    assert!(matches!(
        session.start_at(Instant::now()),
        Err(SessionError::InvalidState { .. })
    ));
}

#[test]
fn run_before_start_is_rejected() {
    let (mut session, _) = manual_session(90, 10);
    assert!(matches!(
        block_on(session.run()),
        Err(SessionError::InvalidState { .. })
    ));
}

#[test]
fn handle_events_are_queued_until_processed() {
    let (mut session, _) = manual_session(90, 10);
    let running_at = run_countdown(&mut session, Instant::now());
    let handle = session.handle();

    assert!(handle.tap_at(running_at));
    assert!(handle.stop());
    assert_eq!(session.snapshot().counters.perfect, 0);

    assert_eq!(session.process_pending(), 2);
    assert_eq!(session.snapshot().counters.perfect, 1);
    assert_eq!(session.phase(), SessionPhase::Finished);
}

#[test]
fn snapshot_watch_tracks_changes() {
    let (mut session, _) = manual_session(90, 10);
    let snapshots = session.subscribe_snapshots();
    assert_eq!(snapshots.borrow().state.phase, SessionPhase::Idle);

    let running_at = run_countdown(&mut session, Instant::now());
    assert_eq!(snapshots.borrow().state.phase, SessionPhase::Running);

    session.handle_event(SessionEvent::Tap { at: running_at });
    assert_eq!(snapshots.borrow().counters.perfect, 1);

    session.stop();
    let last = snapshots.borrow().clone();
    assert_eq!(last.state.phase, SessionPhase::Finished);
    assert_eq!(last.notice, Some(TerminalNotice::Stopped));
    assert_eq!(last.summary.map(|s| s.counters.skipped), Some(14));
}

#[test]
fn manual_mode_ignores_acoustic_hits() {
    let (mut session, _) = manual_session(90, 10);
    let running_at = run_countdown(&mut session, Instant::now());

    session.handle_event(SessionEvent::Hit(AudioHit {
        timestamp: running_at,
        intensity: 0.9,
    }));
    assert_eq!(session.snapshot().counters, ScoreCounters::default());
    assert!(!session.is_capturing());
}

#[test]
fn hits_after_stop_leave_acoustic_counters_alone() {
    use crate::engine::backend::{ScriptedCapture, StaticPermission};

    let mut config = manual_config(60, 10);
    config.session.input_mode = InputMode::Acoustic;
    config.session.countdown_beats = 0;
    let collaborators = SessionCollaborators::acoustic(
        Box::new(ScriptedCapture::new(Vec::new(), 44100, Duration::ZERO)),
        Arc::new(SilentClickPlayer::new()),
        Arc::new(StaticPermission::granted()),
    );
    let mut session = block_on(TrainingSession::prepare(config, collaborators)).unwrap();

    let running_at = Instant::now();
    session.start_at(running_at).unwrap();
    assert!(session.is_capturing());
    session.handle_event(SessionEvent::Hit(AudioHit {
        timestamp: running_at + Duration::from_millis(5),
        intensity: 0.8,
    }));
    assert_eq!(session.snapshot().counters.perfect, 1);

    session.stop();
    assert!(!session.is_capturing());
    let stopped = session.snapshot().counters;

    for beat in 1..4u64 {
        session.handle_event(SessionEvent::Hit(AudioHit {
            timestamp: running_at + Duration::from_secs(beat),
            intensity: 0.8,
        }));
    }
    assert_eq!(session.snapshot().counters, stopped);
    assert_eq!(session.summary().map(|s| s.counters), Some(stopped));
}
