//! HTTP control surface
//!
//! REST endpoints for playback, equalizer and visualizer control plus an SSE
//! stream of engine events.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{router, run, AppContext};
