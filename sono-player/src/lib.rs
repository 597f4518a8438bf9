//! # Sonoscope Player
//!
//! Decodes tracks with symphonia and plays them through one shared audio
//! context:
//! - Cancellable, last-writer-wins loading
//! - Transport state machine with throttled state publication
//! - Playlist advance on natural end of track

pub mod audio;
pub mod error;
pub mod playback;
pub mod session;

pub use audio::{AudioContext, AudioOutput, DecodedAudio, NullOutput, OutputFactory, OutputState, PlaybackNode};
pub use error::{PlaybackError, Result};
pub use playback::{EngineStatus, PlaybackEngine, PlaybackState, Subscription, Throttle};
pub use session::PlayerSession;
