//! Playback session engine
//!
//! - [`state`]: queue and mode state plus snapshots
//! - [`queue`]: the shared next/previous index rule
//! - [`crossfade`]: the two-deck transport used during transitions
//! - [`session`]: the state machine driving decks, loads and crossfades
//! - [`handle`]: the actor that owns a session and serializes access to it

pub mod crossfade;
pub mod handle;
pub mod queue;
pub mod session;
pub mod state;

pub use handle::{SessionHandle, SessionOp};
pub use session::{PlaybackSession, SessionDeps, SessionEvent, SessionStatus};
pub use state::{PlaybackSnapshot, PlaybackState, RemoveOutcome};
