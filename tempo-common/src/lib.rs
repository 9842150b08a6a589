//! # Tempo Common Library
//!
//! Shared code for the Tempo player crates:
//! - Error type
//! - Event vocabulary (TempoEvent) and the broadcast EventBus
//! - Bootstrap configuration loading
//! - Fade curve definitions and calculations

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;

pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
