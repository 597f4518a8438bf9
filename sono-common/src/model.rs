//! Track, metadata and artwork models
//!
//! An [`AudioTrack`] is created as a placeholder on ingestion (metadata
//! derived from the file name, `is_loading = true`) and patched exactly once
//! by the verification worker.

use crate::encoding::base64_bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque track identity
pub type TrackId = Uuid;

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Artwork bytes embedded in the audio file's tags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedArtwork {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// Track metadata as produced by the DSP module (or derived from the file name)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Duration in seconds
    pub duration: f64,
    /// Sample rate (Hz), 0 when unknown
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork: Option<EmbeddedArtwork>,
}

impl TrackMetadata {
    /// Best-effort metadata for a placeholder track: title from the file stem
    pub fn placeholder(file_name: &str) -> Self {
        let title = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(file_name)
            .to_string();

        Self {
            title,
            artist: UNKNOWN_ARTIST.to_string(),
            album: UNKNOWN_ALBUM.to_string(),
            duration: 0.0,
            sample_rate: 0,
            channels: 0,
            bit_depth: 0,
            artwork: None,
        }
    }

    /// Artist, if it is known (not empty and not the placeholder value)
    pub fn known_artist(&self) -> Option<&str> {
        let artist = self.artist.trim();
        (!artist.is_empty() && artist != UNKNOWN_ARTIST).then_some(artist)
    }

    /// Album, if it is known (not empty and not the placeholder value)
    pub fn known_album(&self) -> Option<&str> {
        let album = self.album.trim();
        (!album.is_empty() && album != UNKNOWN_ALBUM).then_some(album)
    }

    /// Embedded artwork with a non-empty payload
    pub fn embedded_artwork(&self) -> Option<&EmbeddedArtwork> {
        self.artwork.as_ref().filter(|a| !a.data.is_empty())
    }
}

/// Where a resolved artwork image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtworkKind {
    /// Picture embedded in the file's tags
    Embedded,
    /// MusicBrainz release search + Cover Art Archive
    MusicBrainz,
    /// AcoustID fingerprint match + Cover Art Archive
    AcoustId,
    /// MusicBrainz search with artist/album parsed from the file name
    FilenameHeuristic,
    /// Generated cover
    Placeholder,
}

impl std::fmt::Display for ArtworkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtworkKind::Embedded => write!(f, "embedded"),
            ArtworkKind::MusicBrainz => write!(f, "musicbrainz"),
            ArtworkKind::AcoustId => write!(f, "acoustid"),
            ArtworkKind::FilenameHeuristic => write!(f, "filename_heuristic"),
            ArtworkKind::Placeholder => write!(f, "placeholder"),
        }
    }
}

/// Provenance details for a resolved artwork image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtworkOrigin {
    /// MusicBrainz release MBID the image belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_id: Option<String>,
    /// Release title as reported by the lookup service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_title: Option<String>,
    /// Image URL the bytes were fetched from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Raw score reported by the lookup service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// A candidate artwork image with its confidence (0.0-1.0)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtworkSource {
    pub kind: ArtworkKind,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub mime_type: String,
    pub confidence: f32,
    #[serde(default)]
    pub origin: ArtworkOrigin,
}

impl ArtworkSource {
    /// Create a source with clamped confidence (0.0-1.0)
    pub fn new(kind: ArtworkKind, data: Vec<u8>, mime_type: impl Into<String>, confidence: f32) -> Self {
        Self {
            kind,
            data,
            mime_type: mime_type.into(),
            confidence: confidence.clamp(0.0, 1.0),
            origin: ArtworkOrigin::default(),
        }
    }

    pub fn with_origin(mut self, origin: ArtworkOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// Raw source of a track: the bytes the user selected
///
/// Cloning shares the buffer; the bytes are released when the last track
/// record (and any in-flight decode) drops its handle.
#[derive(Debug, Clone)]
pub struct MediaSource {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

impl MediaSource {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Lower-cased file extension, used as a decoder hint
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

/// A playlist entry
#[derive(Debug, Clone)]
pub struct AudioTrack {
    pub id: TrackId,
    /// Content digest of `source.bytes`
    pub key: String,
    pub source: MediaSource,
    pub metadata: TrackMetadata,
    pub artwork: Option<ArtworkSource>,
    /// True while the verification worker has not reconciled this track
    pub is_loading: bool,
    pub added_at: DateTime<Utc>,
}

impl AudioTrack {
    /// Optimistic placeholder published before verification
    pub fn placeholder(key: impl Into<String>, source: MediaSource) -> Self {
        let metadata = TrackMetadata::placeholder(&source.file_name);
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            source,
            metadata,
            artwork: None,
            is_loading: true,
            added_at: Utc::now(),
        }
    }

    /// Fully resolved track (cache hit at ingestion time)
    pub fn resolved(
        key: impl Into<String>,
        source: MediaSource,
        metadata: TrackMetadata,
        artwork: Option<ArtworkSource>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            source,
            metadata,
            artwork,
            is_loading: false,
            added_at: Utc::now(),
        }
    }
}
