//! # Sonoscope Common Library
//!
//! Shared code for the Sonoscope crates:
//! - Track, metadata and artwork models
//! - Content hashing and file-type validation
//! - Observable track store (playlist)
//! - Event types and EventBus
//! - Configuration loading

pub mod config;
pub mod encoding;
pub mod error;
pub mod events;
pub mod hashing;
pub mod model;
pub mod track_store;

pub use error::{Error, Result};
pub use model::{ArtworkKind, ArtworkSource, AudioTrack, EmbeddedArtwork, MediaSource, TrackId, TrackMetadata};
pub use track_store::{PlayRequest, PlaylistController, SharedTrackStore, TrackStore};
