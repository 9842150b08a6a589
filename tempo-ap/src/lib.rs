//! # Tempo Audio Player Library (tempo-ap)
//!
//! Playback session engine: queue navigation, track loading with stale
//! completion protection, crossfades between two output paths, a shared
//! per-output processing graph with equalizer and analysis tap, and session
//! persistence.
//!
//! **Architecture:** one task owns the [`playback::PlaybackSession`]; the
//! HTTP surface, equalizer and visualizer talk to it through handles and
//! watch channels. Audio is decoded with symphonia, resampled with rubato
//! and rendered by the [`audio::Mixer`].

pub mod api;
pub mod audio;
pub mod catalog;
pub mod config;
pub mod db;
pub mod equalizer;
pub mod error;
pub mod playback;
pub mod source;
pub mod visualizer;

pub use error::{Error, Result};
