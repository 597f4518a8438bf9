//! # Sonoscope Ingest
//!
//! Turns raw audio files into playlist tracks:
//! - Content-addressed metadata/artwork cache
//! - Metadata extraction (lofty)
//! - Artwork fallback chain (embedded, MusicBrainz, AcoustID, file name, placeholder)
//! - Background verification worker with priority queue and retry/backoff

pub mod artwork;
pub mod cache;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod worker;

pub use artwork::{ArtworkResolution, ArtworkResolver};
pub use cache::{CacheEntry, MetadataCache, StoreOutcome};
pub use error::{CacheError, ExtractionError, IngestError, LookupError};
pub use extract::{MetadataExtractor, TagExtractor};
pub use ingest::Ingestor;
pub use worker::{EnqueueOutcome, VerificationWorker, WorkerStats};
