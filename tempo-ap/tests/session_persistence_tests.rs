//! Session restore and snapshot saving through the actor

mod helpers;

use helpers::TestSession;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tempo_ap::audio::HeadlessOutput;
use tempo_ap::config::RuntimeSettings;
use tempo_ap::db::init::init_database;
use tempo_ap::db::snapshot::{MemorySnapshotStore, SnapshotStore, SqliteSnapshotStore};
use tempo_ap::playback::{PlaybackSnapshot, PlaybackState, SessionHandle};
use tempo_common::events::{PlaybackLifecycle, RepeatMode, TempoEvent};

async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_database(&pool).await.unwrap();
    pool
}

fn snapshot_of(t: &TestSession, index: usize, position_secs: f64) -> PlaybackSnapshot {
    let state = PlaybackState {
        current_track_id: Some(t.track(index)),
        queue: t.tracks.clone(),
        queue_index: Some(index),
        shuffle: true,
        repeat: RepeatMode::All,
        volume: 0.4,
        speed: 1.0,
        is_playing: true,
        current_playlist_id: None,
    };
    PlaybackSnapshot::new(state, position_secs)
}

#[tokio::test]
async fn restore_preloads_paused_at_the_saved_position() {
    let mut t = TestSession::new(&[3.0, 3.0, 3.0], RuntimeSettings::default());
    let snapshot = snapshot_of(&t, 1, 1.5);

    assert!(t.session.restore(&snapshot));
    let state = t.session.state().clone();
    assert!(!state.is_playing);
    assert_eq!(state.queue_index, Some(1));
    assert_eq!(state.current_track_id, Some(t.track(1)));
    assert!(state.shuffle);
    assert_eq!(state.repeat, RepeatMode::All);
    assert_eq!(state.volume, 0.4);
    assert_eq!(t.session.lifecycle(), PlaybackLifecycle::Buffering);
    assert!((t.session.position_secs() - 1.5).abs() < 1e-9);

    assert!(t
        .run_until(|s| s.lifecycle() == PlaybackLifecycle::Paused)
        .await);
    let deck = t.session.current_deck();
    assert!(!deck.is_playing());
    assert!((deck.current_time() - 1.5).abs() < 0.01);
    assert!(!t.session.state().is_playing);

    let events = t.take_events();
    assert!(!events
        .iter()
        .any(|e| matches!(e, TempoEvent::TrackStarted { .. })));

    // resuming picks up where the snapshot left off
    t.session.toggle_play_pause().unwrap();
    assert_eq!(t.session.lifecycle(), PlaybackLifecycle::Playing);
    t.play_for(0.5).await;
    assert!((t.session.position_secs() - 2.0).abs() < 0.05);
}

#[tokio::test]
async fn restore_is_dropped_while_a_user_load_is_in_flight() {
    let mut t = TestSession::new(&[1.0, 1.0], RuntimeSettings::default());
    let snapshot = snapshot_of(&t, 1, 0.5);

    t.session.play_track(t.track(0), None).unwrap();
    assert!(!t.session.restore(&snapshot));
    assert_eq!(t.session.state().current_track_id, Some(t.track(0)));
    assert!(!t.session.state().shuffle);

    assert!(t
        .run_until(|s| s.lifecycle() == PlaybackLifecycle::Playing)
        .await);
    assert_eq!(t.session.state().queue_index, Some(0));
}

#[tokio::test]
async fn user_play_supersedes_a_restore_in_progress() {
    let mut t = TestSession::new(&[1.0, 1.0, 1.0], RuntimeSettings::default());
    let snapshot = snapshot_of(&t, 1, 0.5);

    assert!(t.session.restore(&snapshot));
    t.session.play_track(t.track(2), None).unwrap();
    assert!(t
        .run_until(|s| s.lifecycle() == PlaybackLifecycle::Playing)
        .await);
    helpers::settle(&mut t.session, Duration::from_millis(100)).await;

    assert_eq!(t.session.state().current_track_id, Some(t.track(2)));
    assert_eq!(t.session.lifecycle(), PlaybackLifecycle::Playing);
    assert!(t.session.current_deck().is_playing());
}

#[tokio::test]
async fn restore_with_empty_queue_stays_idle() {
    let mut t = TestSession::new(&[1.0], RuntimeSettings::default());
    let snapshot = PlaybackSnapshot::new(PlaybackState::default(), 0.0);

    assert!(t.session.restore(&snapshot));
    assert!(!t.session.is_loading());
    assert_eq!(t.session.lifecycle(), PlaybackLifecycle::Idle);
    assert_eq!(t.session.state().current_track_id, None);
}

#[tokio::test]
async fn shutdown_saves_the_session_to_the_database() {
    let pool = memory_pool().await;
    let settings = RuntimeSettings::load(&pool).await.unwrap();
    let store = Arc::new(SqliteSnapshotStore::new(pool.clone()));

    let TestSession {
        dir: _dir,
        session,
        tracks,
        ..
    } = TestSession::new(&[2.0, 2.0, 2.0], settings);
    let (handle, task) = SessionHandle::spawn(
        session,
        Some(Arc::clone(&store) as Arc<dyn SnapshotStore>),
        Duration::from_secs(60),
    );

    handle.play_track(tracks[1], None).await.unwrap();
    handle.set_volume(0.3).await.unwrap();
    handle.cycle_repeat().await.unwrap();

    let mut status = handle.subscribe_status();
    tokio::time::timeout(
        helpers::WAIT,
        status.wait_for(|s| s.lifecycle == PlaybackLifecycle::Playing),
    )
    .await
    .expect("reached playing")
    .expect("status channel open");

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert!(handle.next().await.is_err());

    let saved = store.load().await.unwrap().expect("snapshot saved");
    assert_eq!(saved.state.queue, tracks);
    assert_eq!(saved.state.queue_index, Some(1));
    assert_eq!(saved.state.current_track_id, Some(tracks[1]));
    assert_eq!(saved.state.volume, 0.3);
    assert_eq!(saved.state.repeat, RepeatMode::All);
    assert!(saved.state.is_playing);
    assert!(!saved.restored_state().is_playing);
}

#[tokio::test]
async fn interval_snapshot_only_after_changes() {
    let pool = memory_pool().await;
    let store = Arc::new(SqliteSnapshotStore::new(pool));

    let TestSession {
        dir: _dir,
        session,
        ..
    } = TestSession::new(&[1.0], RuntimeSettings::default());
    let (handle, task) = SessionHandle::spawn(
        session,
        Some(Arc::clone(&store) as Arc<dyn SnapshotStore>),
        Duration::from_millis(100),
    );

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(store.load().await.unwrap().is_none());

    handle.toggle_shuffle().await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    let saved = store.load().await.unwrap().expect("snapshot after change");
    assert!(saved.state.shuffle);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn interval_snapshot_follows_playback_position() {
    let store = Arc::new(MemorySnapshotStore::new());
    let TestSession {
        dir: _dir,
        session,
        tracks,
        mixer,
        ..
    } = TestSession::new(&[10.0], RuntimeSettings::default());
    let _output = HeadlessOutput::start(mixer);
    let (handle, task) = SessionHandle::spawn(
        session,
        Some(Arc::clone(&store) as Arc<dyn SnapshotStore>),
        Duration::from_millis(200),
    );

    handle.play_track(tracks[0], None).await.unwrap();
    let mut status = handle.subscribe_status();
    tokio::time::timeout(
        helpers::WAIT,
        status.wait_for(|s| s.lifecycle == PlaybackLifecycle::Playing),
    )
    .await
    .expect("reached playing")
    .expect("status channel open");

    // no commands from here on; only playback moves
    tokio::time::sleep(Duration::from_secs(3)).await;
    let live = handle.status().position_secs;
    let saved = store.load().await.unwrap().expect("snapshot while playing");
    assert!(saved.position_secs > 1.0, "saved {}", saved.position_secs);
    assert!(
        (live - saved.position_secs).abs() < 1.0,
        "live {} saved {}",
        live,
        saved.position_secs
    );

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}
