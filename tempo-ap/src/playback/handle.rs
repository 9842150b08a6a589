//! Session actor
//!
//! One task owns the [`PlaybackSession`]. Commands from any number of
//! [`SessionHandle`] clones are queued into it, so every state change happens
//! on that task. The loop prefers user commands over engine events, saves a
//! snapshot on a timer when something changed or playback moved on, and
//! publishes a [`SessionStatus`] after every step.

use super::session::{PlaybackSession, SessionStatus};
use super::state::PlaybackSnapshot;
use crate::catalog::TrackId;
use crate::db::snapshot::SnapshotStore;
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

const COMMAND_QUEUE: usize = 64;

/// A state-changing request
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOp {
    PlayTrack {
        track_id: TrackId,
        playlist_id: Option<Uuid>,
    },
    PlayFromQueue {
        track_id: TrackId,
    },
    TogglePlayPause,
    Next,
    Previous,
    Seek {
        position_secs: f64,
    },
    SetVolume {
        volume: f32,
    },
    SetSpeed {
        speed: f64,
    },
    ToggleShuffle,
    CycleRepeat,
    RemoveFromQueue {
        track_id: TrackId,
    },
    ReorderQueue {
        from: usize,
        to: usize,
    },
}

impl SessionOp {
    fn apply(self, session: &mut PlaybackSession) -> Result<()> {
        match self {
            SessionOp::PlayTrack {
                track_id,
                playlist_id,
            } => session.play_track(track_id, playlist_id),
            SessionOp::PlayFromQueue { track_id } => session.play_from_queue(track_id),
            SessionOp::TogglePlayPause => session.toggle_play_pause(),
            SessionOp::Next => session.next(),
            SessionOp::Previous => session.previous(),
            SessionOp::Seek { position_secs } => session.seek(position_secs),
            SessionOp::SetVolume { volume } => session.set_volume(volume),
            SessionOp::SetSpeed { speed } => session.set_speed(speed),
            SessionOp::ToggleShuffle => session.toggle_shuffle(),
            SessionOp::CycleRepeat => session.cycle_repeat(),
            SessionOp::RemoveFromQueue { track_id } => session.remove_from_queue(track_id),
            SessionOp::ReorderQueue { from, to } => session.reorder_queue(from, to),
        }
    }
}

enum Command {
    Op {
        op: SessionOp,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<PlaybackSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable front door to the session task
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Move `session` onto its own task
    ///
    /// With a store, snapshots are saved every `snapshot_interval` when the
    /// state changed, and once more on shutdown.
    pub fn spawn(
        session: PlaybackSession,
        store: Option<Arc<dyn SnapshotStore>>,
        snapshot_interval: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE);
        let (status_tx, status) = watch::channel(session.status());
        let task = tokio::spawn(run(session, rx, status_tx, store, snapshot_interval));
        (Self { commands, status }, task)
    }

    pub async fn play_track(&self, track_id: TrackId, playlist_id: Option<Uuid>) -> Result<()> {
        self.request(SessionOp::PlayTrack {
            track_id,
            playlist_id,
        })
        .await
    }

    pub async fn play_from_queue(&self, track_id: TrackId) -> Result<()> {
        self.request(SessionOp::PlayFromQueue { track_id }).await
    }

    pub async fn toggle_play_pause(&self) -> Result<()> {
        self.request(SessionOp::TogglePlayPause).await
    }

    pub async fn next(&self) -> Result<()> {
        self.request(SessionOp::Next).await
    }

    pub async fn previous(&self) -> Result<()> {
        self.request(SessionOp::Previous).await
    }

    pub async fn seek(&self, position_secs: f64) -> Result<()> {
        self.request(SessionOp::Seek { position_secs }).await
    }

    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        self.request(SessionOp::SetVolume { volume }).await
    }

    pub async fn set_speed(&self, speed: f64) -> Result<()> {
        self.request(SessionOp::SetSpeed { speed }).await
    }

    pub async fn toggle_shuffle(&self) -> Result<()> {
        self.request(SessionOp::ToggleShuffle).await
    }

    pub async fn cycle_repeat(&self) -> Result<()> {
        self.request(SessionOp::CycleRepeat).await
    }

    pub async fn remove_from_queue(&self, track_id: TrackId) -> Result<()> {
        self.request(SessionOp::RemoveFromQueue { track_id }).await
    }

    pub async fn reorder_queue(&self, from: usize, to: usize) -> Result<()> {
        self.request(SessionOp::ReorderQueue { from, to }).await
    }

    /// Send any operation and wait for its result
    pub async fn request(&self, op: SessionOp) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Op { op, reply })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn snapshot(&self) -> Result<PlaybackSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Latest published status
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Stop the session task after a final snapshot
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }
}

fn stopped() -> Error {
    Error::InvalidState("playback session has stopped".to_string())
}

async fn run(
    mut session: PlaybackSession,
    mut commands: mpsc::Receiver<Command>,
    status: watch::Sender<SessionStatus>,
    store: Option<Arc<dyn SnapshotStore>>,
    snapshot_interval: Duration,
) {
    info!("Playback session started");
    let mut ticker = tokio::time::interval(snapshot_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(Command::Op { op, reply }) => {
                    debug!(?op, "Session command");
                    let result = op.apply(&mut session);
                    // callers read the status right after the reply
                    status.send_replace(session.status());
                    let _ = reply.send(result);
                }
                Some(Command::Snapshot { reply }) => {
                    let _ = reply.send(session.snapshot());
                }
                Some(Command::Shutdown { reply }) => {
                    save_snapshot(&session, store.as_deref()).await;
                    session.shutdown();
                    status.send_replace(session.status());
                    let _ = reply.send(());
                    break;
                }
                None => {
                    save_snapshot(&session, store.as_deref()).await;
                    session.shutdown();
                    break;
                }
            },

            Some(event) = session.next_event() => {
                session.handle_event(event);
            }

            _ = ticker.tick() => {
                if session.take_snapshot_due() {
                    save_snapshot(&session, store.as_deref()).await;
                }
            }
        }
        status.send_replace(session.status());
    }
    info!("Playback session stopped");
}

async fn save_snapshot(session: &PlaybackSession, store: Option<&dyn SnapshotStore>) {
    let Some(store) = store else {
        return;
    };
    let snapshot = session.snapshot();
    match store.save(&snapshot).await {
        Ok(()) => debug!(
            queue_len = snapshot.state.queue.len(),
            position = snapshot.position_secs,
            "Session snapshot saved"
        ),
        Err(e) => error!("Failed to save session snapshot: {}", e),
    }
}
