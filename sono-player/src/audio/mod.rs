//! Audio decoding and output

pub mod context;
pub mod decoder;
pub mod output;

#[cfg(feature = "cpal-output")]
pub mod cpal_output;

pub use context::AudioContext;
pub use decoder::{decode_bytes, DecodedAudio};
pub use output::{AudioOutput, NullOutput, OutputFactory, OutputState, PlaybackNode};

#[cfg(feature = "cpal-output")]
pub use cpal_output::CpalOutput;
