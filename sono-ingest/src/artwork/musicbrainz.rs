//! MusicBrainz release search
//!
//! Rate limited to 1 request/second as MusicBrainz requires.

use super::rate_limit::RateLimiter;
use super::{ReleaseLookup, ReleaseMatch};
use crate::error::LookupError;
use async_trait::async_trait;
use serde::Deserialize;
use sono_common::config::ServicesConfig;
use std::sync::Arc;

const RATE_LIMIT_MS: u64 = 1000;
const SEARCH_LIMIT: &str = "5";

#[derive(Debug, Deserialize)]
struct MBReleaseSearch {
    #[serde(default)]
    releases: Vec<MBRelease>,
}

#[derive(Debug, Deserialize)]
struct MBRelease {
    id: String,
    title: String,
    /// Search relevance 0-100
    #[serde(default)]
    score: Option<f64>,
}

pub struct MusicBrainzClient {
    http_client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    base_url: String,
}

impl MusicBrainzClient {
    pub fn new(config: &ServicesConfig) -> Result<Self, LookupError> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LookupError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            rate_limiter: Arc::new(RateLimiter::new(RATE_LIMIT_MS)),
            base_url: config.musicbrainz_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Lucene query matching artist and release title
pub(crate) fn release_query(artist: &str, album: &str) -> String {
    format!(
        "artist:\"{}\" AND release:\"{}\"",
        escape_phrase(artist),
        escape_phrase(album)
    )
}

fn escape_phrase(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[async_trait]
impl ReleaseLookup for MusicBrainzClient {
    async fn search_release(&self, artist: &str, album: &str) -> Result<Option<ReleaseMatch>, LookupError> {
        self.rate_limiter.wait("MusicBrainz").await;

        let url = format!("{}/release/", self.base_url);
        let query = release_query(artist, album);

        tracing::debug!(artist = %artist, album = %album, "Searching MusicBrainz releases");

        let response = self
            .http_client
            .get(&url)
            .query(&[("query", query.as_str()), ("fmt", "json"), ("limit", SEARCH_LIMIT)])
            .send()
            .await
            .map_err(|e| LookupError::NetworkError(e.to_string()))?;

        let status = response.status();

        if status == 404 {
            return Ok(None);
        }

        if status == 503 {
            return Err(LookupError::RateLimitExceeded);
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LookupError::ApiError(status.as_u16(), error_text));
        }

        let search: MBReleaseSearch = response
            .json()
            .await
            .map_err(|e| LookupError::ParseError(e.to_string()))?;

        // Highest score; ties keep the first (search order)
        let best = search
            .releases
            .into_iter()
            .fold(None::<MBRelease>, |best, release| match best {
                Some(b) if b.score.unwrap_or(0.0) >= release.score.unwrap_or(0.0) => Some(b),
                _ => Some(release),
            })
            .map(|release| ReleaseMatch {
                release_id: release.id,
                title: release.title,
                score: release.score.unwrap_or(0.0),
            });

        if let Some(release) = &best {
            tracing::info!(
                release_id = %release.release_id,
                title = %release.title,
                score = release.score,
                "MusicBrainz release match"
            );
        }

        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_query_escapes_quotes() {
        assert_eq!(
            release_query("Daft Punk", "Homework"),
            r#"artist:"Daft Punk" AND release:"Homework""#
        );
        assert_eq!(
            release_query(r#"The "Band""#, "A"),
            r#"artist:"The \"Band\"" AND release:"A""#
        );
    }

    #[test]
    fn test_search_response_parses() {
        let json = r#"{"created":"x","count":2,"offset":0,"releases":[
            {"id":"r1","score":88,"title":"Homework"},
            {"id":"r2","score":100,"title":"Homework (Deluxe)"}
        ]}"#;
        let search: MBReleaseSearch = serde_json::from_str(json).unwrap();
        assert_eq!(search.releases.len(), 2);
        assert_eq!(search.releases[1].score, Some(100.0));
    }

    #[test]
    fn test_client_creation() {
        assert!(MusicBrainzClient::new(&ServicesConfig::default()).is_ok());
    }
}
