//! Content hashing and file-type validation
//!
//! The SHA-256 digest of a file's bytes is the cache and dedup key for every
//! ingested track. Validation runs before any async work so unsupported files
//! never reach the worker.

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;

/// MIME types accepted for ingestion
pub const SUPPORTED_MIME_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/wav",
    "audio/x-wav",
    "audio/wave",
    "audio/flac",
    "audio/x-flac",
    "audio/ogg",
    "audio/opus",
    "audio/mp4",
    "audio/m4a",
    "audio/x-m4a",
    "audio/aac",
    "audio/webm",
    "audio/aiff",
    "audio/x-aiff",
];

/// File extensions accepted for ingestion (lower-case, no dot)
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "ogg", "oga", "opus", "m4a", "mp4", "aac", "webm", "aif", "aiff",
];

/// Hex-encoded SHA-256 of `bytes`
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hash on the blocking pool; large files must not stall the runtime
pub async fn compute_digest(bytes: Arc<[u8]>) -> Result<String> {
    let len = bytes.len();
    let digest = tokio::task::spawn_blocking(move || digest_bytes(&bytes))
        .await
        .map_err(|e| Error::Internal(format!("Hash calculation task failed: {}", e)))?;

    tracing::debug!(bytes = len, digest = %digest, "Calculated content digest");
    Ok(digest)
}

/// Guess a MIME type from magic bytes
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes).map(|kind| kind.mime_type())
}

/// Resolve the MIME type to record for a file: caller-supplied, then sniffed,
/// then derived from the extension
pub fn resolve_mime(file_name: &str, declared: Option<&str>, bytes: &[u8]) -> String {
    if let Some(mime) = declared.map(str::trim).filter(|m| !m.is_empty()) {
        return mime.to_ascii_lowercase();
    }
    if let Some(mime) = sniff_mime(bytes) {
        return mime.to_string();
    }
    match extension_of(file_name).as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("opus") => "audio/opus",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("webm") => "audio/webm",
        Some("aif") | Some("aiff") => "audio/aiff",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Reject files that are empty or match neither the MIME nor the extension
/// allow-list
pub fn validate_file_type(file_name: &str, mime_type: &str, size: usize) -> Result<()> {
    if size == 0 {
        return Err(Error::Validation(format!("File is empty: {}", file_name)));
    }

    let mime = mime_type.to_ascii_lowercase();
    let mime_ok = SUPPORTED_MIME_TYPES.contains(&mime.as_str());
    let ext_ok = extension_of(file_name)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false);

    if mime_ok || ext_ok {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "Unsupported file type: {} ({})",
            file_name, mime_type
        )))
    }
}

fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_hex_sha256() {
        // SHA-256("abc")
        assert_eq!(
            digest_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest_bytes(b"abc"), digest_bytes(b"abc"));
        assert_ne!(digest_bytes(b"abc"), digest_bytes(b"abd"));
    }

    #[tokio::test]
    async fn test_compute_digest_matches_sync() {
        let bytes: Arc<[u8]> = Arc::from(&b"hello world"[..]);
        let digest = compute_digest(bytes.clone()).await.unwrap();
        assert_eq!(digest, digest_bytes(&bytes));
    }

    #[test]
    fn test_validate_accepts_by_mime_or_extension() {
        assert!(validate_file_type("song.mp3", "application/octet-stream", 10).is_ok());
        assert!(validate_file_type("song.bin", "audio/flac", 10).is_ok());
        assert!(validate_file_type("SONG.WAV", "", 10).is_ok());
    }

    #[test]
    fn test_validate_rejects_unsupported_and_empty() {
        let err = validate_file_type("notes.txt", "text/plain", 10).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = validate_file_type("song.mp3", "audio/mpeg", 0).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_resolve_mime_prefers_declared_then_sniffed() {
        assert_eq!(resolve_mime("a.mp3", Some("Audio/MPEG"), b""), "audio/mpeg");

        let wav_header = b"RIFF\x24\x00\x00\x00WAVEfmt ";
        assert_eq!(resolve_mime("unknown", None, wav_header), "audio/x-wav");

        assert_eq!(resolve_mime("a.flac", None, b"\x00\x01"), "audio/flac");
        assert_eq!(resolve_mime("a.xyz", None, b"\x00\x01"), "application/octet-stream");
    }
}
