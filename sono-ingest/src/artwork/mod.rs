//! Artwork resolution
//!
//! Five-step fallback chain, each step gated by [`ArtworkSettings`]:
//!
//! 1. Embedded picture (confidence 1.0, terminal)
//! 2. MusicBrainz release search + Cover Art Archive (score/100, at most 0.9)
//! 3. Chromaprint fingerprint + AcoustID + Cover Art Archive (score, at most 0.8)
//! 4. MusicBrainz search with artist/album parsed from the file name
//! 5. Generated placeholder (0.1), only when nothing else was found
//!
//! The chain stops at the first step that produces a new best source. Lookup
//! failures are logged and treated as "no result".

mod acoustid;
mod coverart;
mod filename;
mod fingerprint;
mod musicbrainz;
mod placeholder;
mod rate_limit;

pub use acoustid::AcoustIdClient;
pub use coverart::CoverArtClient;
pub use filename::{parse_file_name, ParsedFileName};
pub use fingerprint::FpcalcFingerprinter;
pub use musicbrainz::MusicBrainzClient;
pub use placeholder::{placeholder_artwork, render_svg};

use crate::error::LookupError;
use async_trait::async_trait;
use sono_common::config::{ArtworkSettings, ServicesConfig};
use sono_common::model::ArtworkOrigin;
use sono_common::{ArtworkKind, ArtworkSource, TrackMetadata};
use std::sync::Arc;
use tracing::{debug, warn};

pub const MUSICBRAINZ_MAX_CONFIDENCE: f32 = 0.9;
pub const ACOUSTID_MAX_CONFIDENCE: f32 = 0.8;

/// Best release for an artist/album pair
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseMatch {
    pub release_id: String,
    pub title: String,
    /// Search score, 0-100
    pub score: f64,
}

/// Release found for an audio fingerprint
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintMatch {
    pub acoustid: String,
    /// Match score, 0.0-1.0
    pub score: f64,
    pub recording_id: String,
    pub release_id: String,
    pub release_title: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub url: String,
}

#[async_trait]
pub trait ReleaseLookup: Send + Sync {
    async fn search_release(&self, artist: &str, album: &str) -> Result<Option<ReleaseMatch>, LookupError>;
}

#[async_trait]
pub trait CoverArtFetcher: Send + Sync {
    /// Front cover for a release; `None` when the release has no art
    async fn fetch_front(&self, release_id: &str) -> Result<Option<FetchedImage>, LookupError>;
}

#[async_trait]
pub trait FingerprintLookup: Send + Sync {
    async fn lookup(&self, fingerprint: &str, duration_seconds: u64) -> Result<Option<FingerprintMatch>, LookupError>;
}

#[async_trait]
pub trait Fingerprinter: Send + Sync {
    async fn fingerprint(&self, bytes: Arc<[u8]>, file_name: &str) -> Result<String, LookupError>;
}

/// Outcome of [`ArtworkResolver::resolve`]
#[derive(Debug, Clone, Default)]
pub struct ArtworkResolution {
    pub success: bool,
    pub best_artwork: Option<ArtworkSource>,
    /// Every source produced along the chain, in step order
    pub sources: Vec<ArtworkSource>,
}

/// Highest-confidence source; ties keep the earliest
pub fn select_best(sources: &[ArtworkSource]) -> Option<&ArtworkSource> {
    sources.iter().fold(None, |best: Option<&ArtworkSource>, source| match best {
        Some(b) if source.confidence <= b.confidence => Some(b),
        _ => Some(source),
    })
}

#[derive(Default)]
struct Chain {
    best: Option<ArtworkSource>,
    sources: Vec<ArtworkSource>,
}

impl Chain {
    /// Record a source; true when it became the new best
    fn offer(&mut self, source: ArtworkSource) -> bool {
        self.sources.push(source.clone());
        let improves = self
            .best
            .as_ref()
            .map(|b| source.confidence > b.confidence)
            .unwrap_or(true);
        if improves {
            self.best = Some(source);
        }
        improves
    }

    fn finish(self) -> ArtworkResolution {
        ArtworkResolution {
            success: self.best.is_some(),
            best_artwork: self.best,
            sources: self.sources,
        }
    }
}

fn musicbrainz_confidence(score: f64) -> f32 {
    ((score / 100.0) as f32).min(MUSICBRAINZ_MAX_CONFIDENCE)
}

fn acoustid_confidence(score: f64) -> f32 {
    (score as f32).min(ACOUSTID_MAX_CONFIDENCE)
}

pub struct ArtworkResolver {
    settings: ArtworkSettings,
    releases: Option<Arc<dyn ReleaseLookup>>,
    cover_art: Option<Arc<dyn CoverArtFetcher>>,
    fingerprints: Option<Arc<dyn FingerprintLookup>>,
    fingerprinter: Option<Arc<dyn Fingerprinter>>,
}

impl ArtworkResolver {
    /// Resolver with only local steps wired; add lookups with the `with_*`
    /// builders
    pub fn new(settings: ArtworkSettings) -> Self {
        Self {
            settings,
            releases: None,
            cover_art: None,
            fingerprints: None,
            fingerprinter: None,
        }
    }

    /// Resolver backed by the public MusicBrainz, Cover Art Archive and
    /// AcoustID services
    pub fn from_config(settings: ArtworkSettings, services: &ServicesConfig) -> Result<Self, LookupError> {
        let mut resolver = Self::new(settings)
            .with_release_lookup(Arc::new(MusicBrainzClient::new(services)?))
            .with_cover_art(Arc::new(CoverArtClient::new(services)?));

        if let Some(api_key) = services.resolve_acoustid_api_key() {
            resolver = resolver.with_fingerprint_lookup(
                Arc::new(AcoustIdClient::new(api_key, services)?),
                Arc::new(FpcalcFingerprinter::new(services.fpcalc_path.clone())),
            );
        }

        Ok(resolver)
    }

    pub fn with_release_lookup(mut self, releases: Arc<dyn ReleaseLookup>) -> Self {
        self.releases = Some(releases);
        self
    }

    pub fn with_cover_art(mut self, cover_art: Arc<dyn CoverArtFetcher>) -> Self {
        self.cover_art = Some(cover_art);
        self
    }

    pub fn with_fingerprint_lookup(
        mut self,
        fingerprints: Arc<dyn FingerprintLookup>,
        fingerprinter: Arc<dyn Fingerprinter>,
    ) -> Self {
        self.fingerprints = Some(fingerprints);
        self.fingerprinter = Some(fingerprinter);
        self
    }

    pub fn settings(&self) -> &ArtworkSettings {
        &self.settings
    }

    pub async fn resolve(&self, metadata: &TrackMetadata, bytes: &Arc<[u8]>, file_name: &str) -> ArtworkResolution {
        let mut chain = Chain::default();

        // 1. Embedded
        if self.settings.embedded {
            if let Some(embedded) = metadata.embedded_artwork() {
                debug!(file = %file_name, "Using embedded artwork");
                chain.offer(ArtworkSource::new(
                    ArtworkKind::Embedded,
                    embedded.data.clone(),
                    embedded.mime_type.clone(),
                    1.0,
                ));
                return chain.finish();
            }
        }

        // 2. MusicBrainz with tagged artist/album
        let tagged = metadata.known_artist().zip(metadata.known_album());
        if self.settings.musicbrainz {
            if let Some((artist, album)) = tagged {
                let found = self.release_artwork(ArtworkKind::MusicBrainz, artist, album).await;
                if found.map(|s| chain.offer(s)).unwrap_or(false) {
                    return chain.finish();
                }
            }
        }

        // 3. Fingerprint
        if self.settings.acoustid {
            if let Some(source) = self.fingerprint_artwork(metadata, bytes, file_name).await {
                if chain.offer(source) {
                    return chain.finish();
                }
            }
        }

        // 4. File name heuristic
        if self.settings.filename_heuristic {
            if let Some(parsed) = parse_file_name(file_name) {
                let already_tried = self.settings.musicbrainz
                    && tagged
                        .map(|(artist, album)| {
                            artist.eq_ignore_ascii_case(&parsed.artist) && album.eq_ignore_ascii_case(parsed.release())
                        })
                        .unwrap_or(false);

                if !already_tried {
                    let found = self
                        .release_artwork(ArtworkKind::FilenameHeuristic, &parsed.artist, parsed.release())
                        .await;
                    if found.map(|s| chain.offer(s)).unwrap_or(false) {
                        return chain.finish();
                    }
                }
            }
        }

        // 5. Placeholder
        if self.settings.placeholder && chain.best.is_none() {
            chain.offer(placeholder_artwork(metadata, file_name));
        }

        chain.finish()
    }

    /// MusicBrainz release search followed by a cover fetch
    async fn release_artwork(&self, kind: ArtworkKind, artist: &str, album: &str) -> Option<ArtworkSource> {
        let (Some(releases), Some(cover_art)) = (&self.releases, &self.cover_art) else {
            return None;
        };

        let release = match releases.search_release(artist, album).await {
            Ok(Some(release)) => release,
            Ok(None) => {
                debug!(artist = %artist, album = %album, "No MusicBrainz release found");
                return None;
            }
            Err(e) => {
                warn!(artist = %artist, album = %album, error = %e, "MusicBrainz lookup failed");
                return None;
            }
        };

        let image = self.fetch_cover(cover_art.as_ref(), &release.release_id).await?;
        let origin = ArtworkOrigin {
            release_id: Some(release.release_id),
            release_title: Some(release.title),
            url: Some(image.url),
            score: Some(release.score),
        };

        Some(
            ArtworkSource::new(kind, image.data, image.mime_type, musicbrainz_confidence(release.score))
                .with_origin(origin),
        )
    }

    async fn fingerprint_artwork(
        &self,
        metadata: &TrackMetadata,
        bytes: &Arc<[u8]>,
        file_name: &str,
    ) -> Option<ArtworkSource> {
        let (Some(fingerprints), Some(fingerprinter), Some(cover_art)) =
            (&self.fingerprints, &self.fingerprinter, &self.cover_art)
        else {
            return None;
        };

        if bytes.is_empty() || metadata.duration <= 0.0 {
            return None;
        }

        let fingerprint = match fingerprinter.fingerprint(bytes.clone(), file_name).await {
            Ok(fp) => fp,
            Err(e) => {
                warn!(file = %file_name, error = %e, "Fingerprinting failed");
                return None;
            }
        };

        let found = match fingerprints.lookup(&fingerprint, metadata.duration.round() as u64).await {
            Ok(Some(found)) => found,
            Ok(None) => return None,
            Err(e) => {
                warn!(file = %file_name, error = %e, "AcoustID lookup failed");
                return None;
            }
        };

        let image = self.fetch_cover(cover_art.as_ref(), &found.release_id).await?;
        let origin = ArtworkOrigin {
            release_id: Some(found.release_id),
            release_title: found.release_title,
            url: Some(image.url),
            score: Some(found.score),
        };

        Some(
            ArtworkSource::new(ArtworkKind::AcoustId, image.data, image.mime_type, acoustid_confidence(found.score))
                .with_origin(origin),
        )
    }

    async fn fetch_cover(&self, cover_art: &dyn CoverArtFetcher, release_id: &str) -> Option<FetchedImage> {
        match cover_art.fetch_front(release_id).await {
            Ok(image) => image,
            Err(e) => {
                warn!(release_id = %release_id, error = %e, "Cover art fetch failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sono_common::EmbeddedArtwork;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted release search: keyed by "artist|album"
    struct ScriptedReleases {
        matches: HashMap<String, ReleaseMatch>,
        fail: bool,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedReleases {
        fn new(entries: &[(&str, &str, f64)]) -> Self {
            let matches = entries
                .iter()
                .map(|(query, id, score)| {
                    (
                        query.to_string(),
                        ReleaseMatch {
                            release_id: id.to_string(),
                            title: "Release".to_string(),
                            score: *score,
                        },
                    )
                })
                .collect();
            Self { matches, fail: false, calls: Mutex::new(Vec::new()) }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReleaseLookup for ScriptedReleases {
        async fn search_release(&self, artist: &str, album: &str) -> Result<Option<ReleaseMatch>, LookupError> {
            let query = format!("{}|{}", artist, album);
            self.calls.lock().unwrap().push(query.clone());
            if self.fail {
                return Err(LookupError::NetworkError("offline".into()));
            }
            Ok(self.matches.get(&query).cloned())
        }
    }

    struct StaticCovers;

    #[async_trait]
    impl CoverArtFetcher for StaticCovers {
        async fn fetch_front(&self, release_id: &str) -> Result<Option<FetchedImage>, LookupError> {
            Ok(Some(FetchedImage {
                data: release_id.as_bytes().to_vec(),
                mime_type: "image/jpeg".to_string(),
                url: format!("https://covers.test/{}", release_id),
            }))
        }
    }

    struct FixedFingerprint {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fingerprinter for FixedFingerprint {
        async fn fingerprint(&self, _bytes: Arc<[u8]>, _file_name: &str) -> Result<String, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("AQAD".to_string())
        }
    }

    struct FixedAcoustId(f64);

    #[async_trait]
    impl FingerprintLookup for FixedAcoustId {
        async fn lookup(&self, _fp: &str, _duration: u64) -> Result<Option<FingerprintMatch>, LookupError> {
            Ok(Some(FingerprintMatch {
                acoustid: "aid".to_string(),
                score: self.0,
                recording_id: "rec".to_string(),
                release_id: "fp-release".to_string(),
                release_title: None,
            }))
        }
    }

    fn tagged(artist: &str, album: &str) -> TrackMetadata {
        TrackMetadata {
            title: "Song".to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
            duration: 200.0,
            sample_rate: 44_100,
            channels: 2,
            bit_depth: 16,
            artwork: None,
        }
    }

    fn bytes() -> Arc<[u8]> {
        Arc::from(&[1u8, 2, 3][..])
    }

    fn source(confidence: f32) -> ArtworkSource {
        ArtworkSource::new(ArtworkKind::MusicBrainz, vec![], "image/jpeg", confidence)
    }

    #[test]
    fn test_select_best_is_order_independent() {
        let orders = [[1.0, 0.85, 0.3], [0.3, 0.85, 1.0], [0.85, 1.0, 0.3]];
        for order in orders {
            let sources: Vec<_> = order.iter().map(|c| source(*c)).collect();
            assert_eq!(select_best(&sources).unwrap().confidence, 1.0);
        }
        assert!(select_best(&[]).is_none());
    }

    #[test]
    fn test_select_best_ties_keep_earliest() {
        let mut first = source(0.5);
        first.mime_type = "first".into();
        let mut second = source(0.5);
        second.mime_type = "second".into();
        assert_eq!(select_best(&[first, second]).unwrap().mime_type, "first");
    }

    #[test]
    fn test_confidence_scaling() {
        assert!((musicbrainz_confidence(100.0) - 0.9).abs() < 1e-6);
        assert!((musicbrainz_confidence(60.0) - 0.6).abs() < 1e-6);
        assert!((acoustid_confidence(0.95) - 0.8).abs() < 1e-6);
        assert!((acoustid_confidence(0.5) - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_embedded_artwork_is_terminal() {
        let releases = Arc::new(ScriptedReleases::new(&[("A|B", "r1", 100.0)]));
        let resolver = ArtworkResolver::new(ArtworkSettings::default())
            .with_release_lookup(releases.clone())
            .with_cover_art(Arc::new(StaticCovers));

        let mut meta = tagged("A", "B");
        meta.artwork = Some(EmbeddedArtwork { data: vec![9, 9], mime_type: "image/png".into() });

        let result = resolver.resolve(&meta, &bytes(), "a.mp3").await;
        let best = result.best_artwork.unwrap();
        assert!(result.success);
        assert_eq!(best.kind, ArtworkKind::Embedded);
        assert_eq!(best.confidence, 1.0);
        assert_eq!(result.sources.len(), 1);
        assert!(releases.calls().is_empty());
    }

    #[tokio::test]
    async fn test_musicbrainz_hit_stops_chain() {
        let releases = Arc::new(ScriptedReleases::new(&[("A|B", "r1", 95.0)]));
        let fingerprinter = Arc::new(FixedFingerprint { calls: AtomicUsize::new(0) });
        let resolver = ArtworkResolver::new(ArtworkSettings::default())
            .with_release_lookup(releases)
            .with_cover_art(Arc::new(StaticCovers))
            .with_fingerprint_lookup(Arc::new(FixedAcoustId(0.99)), fingerprinter.clone());

        let result = resolver.resolve(&tagged("A", "B"), &bytes(), "a.mp3").await;
        let best = result.best_artwork.unwrap();
        assert_eq!(best.kind, ArtworkKind::MusicBrainz);
        assert!((best.confidence - 0.9).abs() < 1e-6);
        assert_eq!(best.origin.release_id.as_deref(), Some("r1"));
        assert_eq!(fingerprinter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fingerprint_used_when_tags_missing() {
        let resolver = ArtworkResolver::new(ArtworkSettings::default())
            .with_release_lookup(Arc::new(ScriptedReleases::new(&[])))
            .with_cover_art(Arc::new(StaticCovers))
            .with_fingerprint_lookup(
                Arc::new(FixedAcoustId(0.93)),
                Arc::new(FixedFingerprint { calls: AtomicUsize::new(0) }),
            );

        let meta = TrackMetadata { duration: 120.0, ..TrackMetadata::placeholder("noise.mp3") };
        let result = resolver.resolve(&meta, &bytes(), "noise.mp3").await;
        let best = result.best_artwork.unwrap();
        assert_eq!(best.kind, ArtworkKind::AcoustId);
        assert!((best.confidence - 0.8).abs() < 1e-6);
        assert_eq!(best.data, b"fp-release".to_vec());
    }

    #[tokio::test]
    async fn test_filename_heuristic_after_failures() {
        let releases = Arc::new(ScriptedReleases::new(&[("Daft Punk|Homework", "r-hw", 80.0)]));
        let resolver = ArtworkResolver::new(ArtworkSettings::default())
            .with_release_lookup(releases.clone())
            .with_cover_art(Arc::new(StaticCovers));

        let meta = TrackMetadata::placeholder("Daft Punk - Homework - Da Funk.mp3");
        let result = resolver.resolve(&meta, &bytes(), "Daft Punk - Homework - Da Funk.mp3").await;
        let best = result.best_artwork.unwrap();
        assert_eq!(best.kind, ArtworkKind::FilenameHeuristic);
        assert!((best.confidence - 0.8).abs() < 1e-6);
        assert_eq!(releases.calls(), vec!["Daft Punk|Homework".to_string()]);
    }

    #[tokio::test]
    async fn test_network_failure_falls_back_to_placeholder() {
        let mut releases = ScriptedReleases::new(&[("A|B", "r1", 100.0)]);
        releases.fail = true;
        let resolver = ArtworkResolver::new(ArtworkSettings::default())
            .with_release_lookup(Arc::new(releases))
            .with_cover_art(Arc::new(StaticCovers));

        let result = resolver.resolve(&tagged("A", "B"), &bytes(), "A - B - Song.mp3").await;
        assert!(result.success);
        let best = result.best_artwork.unwrap();
        assert_eq!(best.kind, ArtworkKind::Placeholder);
        assert_eq!(result.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_steps_are_skipped() {
        let releases = Arc::new(ScriptedReleases::new(&[("A|B", "r1", 100.0)]));
        let settings = ArtworkSettings {
            musicbrainz: false,
            filename_heuristic: false,
            placeholder: false,
            ..ArtworkSettings::default()
        };
        let resolver = ArtworkResolver::new(settings)
            .with_release_lookup(releases.clone())
            .with_cover_art(Arc::new(StaticCovers));

        let result = resolver.resolve(&tagged("A", "B"), &bytes(), "a.mp3").await;
        assert!(!result.success);
        assert!(result.best_artwork.is_none());
        assert!(result.sources.is_empty());
        assert!(releases.calls().is_empty());
    }
}
