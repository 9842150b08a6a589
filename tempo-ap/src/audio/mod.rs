//! Audio subsystem
//!
//! Decoding, the per-output processing graph and its DSP nodes, output
//! paths (decks), the mixer and output drivers.

pub mod analysis;
pub mod biquad;
pub mod deck;
pub mod decode;
pub mod gain;
pub mod graph;
pub mod mixer;
pub mod output;
pub mod resampler;

pub use deck::{Deck, DeckEvent, DeckEventKind};
pub use decode::DecodedAudio;
pub use graph::{AudioGraph, GraphRegistry, OutputId, ProcessingContext};
pub use mixer::Mixer;
pub use output::HeadlessOutput;
