//! Metadata extraction boundary
//!
//! The worker only sees [`MetadataExtractor`]; the default implementation
//! reads tags and stream properties with lofty on the blocking pool.

use crate::error::ExtractionError;
use async_trait::async_trait;
use lofty::picture::{Picture, PictureType};
use lofty::prelude::*;
use lofty::probe::Probe;
use sono_common::hashing::sniff_mime;
use sono_common::model::{EmbeddedArtwork, UNKNOWN_ALBUM, UNKNOWN_ARTIST};
use sono_common::TrackMetadata;
use std::io::Cursor;
use std::sync::Arc;

/// Authoritative metadata extraction from raw file bytes
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract_metadata(&self, bytes: Arc<[u8]>, file_name: &str) -> Result<TrackMetadata, ExtractionError>;
}

/// Tag and stream-property reader backed by lofty
#[derive(Debug, Default, Clone)]
pub struct TagExtractor;

impl TagExtractor {
    pub fn new() -> Self {
        Self
    }

    fn extract_blocking(bytes: &[u8], file_name: &str) -> Result<TrackMetadata, ExtractionError> {
        let tagged_file = Probe::new(Cursor::new(bytes))
            .guess_file_type()
            .map_err(|e| ExtractionError::ReadError(e.to_string()))?
            .read()
            .map_err(|e| ExtractionError::UnsupportedFormat(e.to_string()))?;

        let properties = tagged_file.properties();
        let fallback = TrackMetadata::placeholder(file_name);

        let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());
        let (title, artist, album, artwork) = match tag {
            Some(tag) => (
                non_empty(tag.title()).unwrap_or(fallback.title),
                non_empty(tag.artist()).unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
                non_empty(tag.album()).unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
                select_picture(tag.pictures()),
            ),
            None => (fallback.title, fallback.artist, fallback.album, None),
        };

        let metadata = TrackMetadata {
            title,
            artist,
            album,
            duration: properties.duration().as_secs_f64(),
            sample_rate: properties.sample_rate().unwrap_or(0),
            channels: properties.channels().map(u16::from).unwrap_or(0),
            bit_depth: properties.bit_depth().map(u16::from).unwrap_or(0),
            artwork,
        };

        tracing::debug!(
            file = %file_name,
            title = %metadata.title,
            artist = %metadata.artist,
            duration = metadata.duration,
            has_artwork = metadata.artwork.is_some(),
            "Extracted metadata"
        );

        Ok(metadata)
    }
}

fn non_empty(value: Option<std::borrow::Cow<'_, str>>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Front cover if present, otherwise the first picture
fn select_picture(pictures: &[Picture]) -> Option<EmbeddedArtwork> {
    let picture = pictures
        .iter()
        .find(|p| p.pic_type() == PictureType::CoverFront)
        .or_else(|| pictures.first())?;

    if picture.data().is_empty() {
        return None;
    }

    let mime_type = sniff_mime(picture.data()).unwrap_or("image/jpeg").to_string();

    Some(EmbeddedArtwork {
        data: picture.data().to_vec(),
        mime_type,
    })
}

#[async_trait]
impl MetadataExtractor for TagExtractor {
    async fn extract_metadata(&self, bytes: Arc<[u8]>, file_name: &str) -> Result<TrackMetadata, ExtractionError> {
        let file_name = file_name.to_string();
        tokio::task::spawn_blocking(move || Self::extract_blocking(&bytes, &file_name))
            .await
            .map_err(|e| ExtractionError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(seconds: u32, sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..(seconds * sample_rate) {
                writer.write_sample(0i16).unwrap();
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[tokio::test]
    async fn test_untagged_wav_uses_file_name_and_properties() {
        let bytes: Arc<[u8]> = wav_bytes(1, 8000).into();
        let metadata = TagExtractor::new()
            .extract_metadata(bytes, "Some Song.wav")
            .await
            .unwrap();

        assert_eq!(metadata.title, "Some Song");
        assert_eq!(metadata.artist, UNKNOWN_ARTIST);
        assert_eq!(metadata.sample_rate, 8000);
        assert_eq!(metadata.channels, 2);
        assert_eq!(metadata.bit_depth, 16);
        assert!((metadata.duration - 1.0).abs() < 0.01);
        assert!(metadata.artwork.is_none());
    }

    #[tokio::test]
    async fn test_garbage_bytes_fail() {
        let bytes: Arc<[u8]> = Arc::from(&[1u8, 2, 3][..]);
        let result = TagExtractor::new().extract_metadata(bytes, "x.mp3").await;
        assert!(result.is_err());
    }
}
