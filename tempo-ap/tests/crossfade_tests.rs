//! Crossfade transitions between two output paths

mod helpers;

use helpers::{count, TestSession};
use std::sync::Arc;
use tempo_ap::catalog::Track;
use tempo_ap::config::RuntimeSettings;
use tempo_ap::playback::PlaybackSession;
use tempo_ap::source::LocalFileSystem;
use tempo_common::events::{PlaybackLifecycle, TempoEvent};

fn crossfade_settings(secs: f64) -> RuntimeSettings {
    RuntimeSettings {
        crossfade_seconds: secs,
        crossfade_step_ms: 50,
        ..RuntimeSettings::default()
    }
}

fn playing_first(s: &PlaybackSession) -> bool {
    s.state().queue_index == Some(0) && s.lifecycle() == PlaybackLifecycle::Playing
}

#[tokio::test]
async fn crossfade_hands_off_to_the_next_track() {
    let mut t = TestSession::new(&[4.0, 4.0], crossfade_settings(1.0));
    let (a, b) = (t.track(0), t.track(1));
    t.session.play_track(a, None).unwrap();
    assert!(t.run_until(playing_first).await);
    let outgoing = Arc::clone(t.session.current_deck());

    // last time update lands inside the one-second window
    t.play_for(3.2).await;
    assert!(t.session.is_crossfading());
    assert_eq!(t.mixer.deck_count(), 2);
    // still reported as the outgoing track until the handoff
    assert_eq!(t.session.state().current_track_id, Some(a));

    assert!(t.run_until(|s| !s.is_crossfading()).await);
    let state = t.session.state();
    assert_eq!(state.current_track_id, Some(b));
    assert_eq!(state.queue_index, Some(1));
    assert!(state.is_playing);
    assert_eq!(t.session.lifecycle(), PlaybackLifecycle::Playing);

    assert!(outgoing.is_disposed());
    assert!(!outgoing.has_listener());
    assert!(!t.mixer.contains(outgoing.id()));
    assert_eq!(t.mixer.deck_count(), 1);
    assert_ne!(t.session.current_deck().id(), outgoing.id());
    assert!(t.session.current_deck().is_playing());

    let events = t.take_events();
    assert_eq!(count(&events, |e| matches!(e, TempoEvent::CrossfadeStarted { .. })), 1);
    assert_eq!(count(&events, |e| matches!(e, TempoEvent::CrossfadeCompleted { .. })), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        TempoEvent::TrackStarted { track_id, via_crossfade: true, .. } if *track_id == b.as_uuid()
    )));
}

#[tokio::test]
async fn no_crossfade_for_tracks_shorter_than_two_fades() {
    let mut t = TestSession::new(&[1.5, 1.5], crossfade_settings(1.0));
    t.session.play_track(t.track(0), None).unwrap();
    assert!(t.run_until(playing_first).await);

    t.play_for(1.2).await;
    assert!(!t.session.is_crossfading());
    assert_eq!(t.mixer.deck_count(), 1);
}

#[tokio::test]
async fn no_crossfade_with_repeat_one_or_at_end_of_queue() {
    let mut t = TestSession::new(&[4.0], crossfade_settings(1.0));
    t.session.play_track(t.track(0), None).unwrap();
    assert!(t.run_until(playing_first).await);

    // single entry, repeat none: next index is end-of-queue
    t.play_for(3.2).await;
    assert!(!t.session.is_crossfading());

    t.session.cycle_repeat().unwrap();
    t.session.cycle_repeat().unwrap();
    t.session.seek(2.5).unwrap();
    t.play_for(0.7).await;
    assert!(!t.session.is_crossfading());
}

#[tokio::test]
async fn skipping_during_a_crossfade_cancels_it() {
    let mut t = TestSession::new(&[4.0, 4.0, 4.0], crossfade_settings(1.0));
    t.session.play_track(t.track(0), None).unwrap();
    assert!(t.run_until(playing_first).await);
    let outgoing = Arc::clone(t.session.current_deck());

    t.play_for(3.2).await;
    assert!(t.session.is_crossfading());
    let incoming = Arc::clone(t.session.incoming_deck().unwrap());

    t.session.next().unwrap();
    assert!(!t.session.is_crossfading());
    assert!(incoming.is_disposed());
    assert!(!t.mixer.contains(incoming.id()));
    assert_eq!(t.session.current_deck().id(), outgoing.id());
    assert_eq!(t.session.state().queue_index, Some(1));

    let events = t.take_events();
    assert_eq!(count(&events, |e| matches!(e, TempoEvent::CrossfadeAborted { .. })), 1);
    assert!(t
        .run_until(|s| s.state().queue_index == Some(1) && s.lifecycle() == PlaybackLifecycle::Playing)
        .await);
}

#[tokio::test]
async fn pausing_while_fading_completes_the_handoff_paused() {
    let settings = RuntimeSettings {
        // long fade so the pause lands mid-way
        crossfade_seconds: 2.0,
        crossfade_step_ms: 50,
        ..RuntimeSettings::default()
    };
    let mut t = TestSession::new(&[6.0, 6.0], settings);
    let b = t.track(1);
    t.session.play_track(t.track(0), None).unwrap();
    assert!(t.run_until(playing_first).await);

    t.play_for(4.2).await;
    assert!(t.session.is_crossfading());
    assert!(t
        .run_until(|s| s.crossfade_progress().is_some_and(|p| p > 0.0))
        .await);

    t.session.toggle_play_pause().unwrap();
    assert!(!t.session.is_crossfading());
    assert_eq!(t.session.state().current_track_id, Some(b));
    assert!(!t.session.state().is_playing);
    assert_eq!(t.session.lifecycle(), PlaybackLifecycle::Paused);
    assert!(!t.session.current_deck().is_playing());
    assert_eq!(t.mixer.deck_count(), 1);
}

#[tokio::test]
async fn failed_preload_aborts_and_is_not_retried() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("good.wav");
    helpers::write_tone(&path, 4.0, 330.0).unwrap();
    let good = Track::from_path(&path);
    let missing = Track::from_path(dir.path().join("missing.wav"));
    let (a, b) = (good.id, missing.id);

    let mut t = TestSession::from_tracks(
        dir,
        vec![good, missing],
        crossfade_settings(1.0),
        Arc::new(LocalFileSystem),
    );
    t.session.play_track(a, None).unwrap();
    assert!(t.run_until(playing_first).await);
    let outgoing = Arc::clone(t.session.current_deck());

    t.mixer.render_for(3.2);
    assert!(t.run_until(|s| s.is_crossfading()).await);
    assert!(t.run_until(|s| !s.is_crossfading()).await);
    assert_eq!(t.session.state().current_track_id, Some(a));
    assert_eq!(t.session.current_deck().id(), outgoing.id());
    assert_eq!(t.mixer.deck_count(), 1);
    assert!((outgoing.volume() - t.session.state().volume).abs() < 1e-6);

    let events = t.take_events();
    assert!(events.iter().any(|e| matches!(
        e,
        TempoEvent::TrackFailed { track_id, .. } if *track_id == b.as_uuid()
    )));
    assert_eq!(count(&events, |e| matches!(e, TempoEvent::CrossfadeAborted { .. })), 1);

    t.play_for(0.5).await;
    assert!(!t.session.is_crossfading());

    // the ordinary end-of-track switch still runs and fails on its own
    t.play_for(0.5).await;
    assert!(t
        .run_until(|s| s.lifecycle() == PlaybackLifecycle::Idle)
        .await);
    assert_eq!(t.session.state().current_track_id, Some(b));
    assert!(!t.session.state().is_playing);
}
