//! Cover Art Archive image fetcher

use super::{CoverArtFetcher, FetchedImage};
use crate::error::LookupError;
use async_trait::async_trait;
use sono_common::config::ServicesConfig;
use sono_common::hashing::sniff_mime;

/// Front cover thumbnail size requested from the archive
const FRONT_SIZE: &str = "front-500";

pub struct CoverArtClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl CoverArtClient {
    pub fn new(config: &ServicesConfig) -> Result<Self, LookupError> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LookupError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.coverart_url.trim_end_matches('/').to_string(),
        })
    }

    pub(crate) fn front_url(&self, release_id: &str) -> String {
        format!("{}/release/{}/{}", self.base_url, release_id, FRONT_SIZE)
    }
}

#[async_trait]
impl CoverArtFetcher for CoverArtClient {
    async fn fetch_front(&self, release_id: &str) -> Result<Option<FetchedImage>, LookupError> {
        let url = self.front_url(release_id);
        tracing::debug!(release_id = %release_id, url = %url, "Fetching cover art");

        // Redirects to the image host are followed by reqwest
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| LookupError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == 404 {
            tracing::debug!(release_id = %release_id, "No cover art for release");
            return Ok(None);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LookupError::ApiError(status.as_u16(), error_text));
        }

        let header_mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("image/"));

        let data = response
            .bytes()
            .await
            .map_err(|e| LookupError::NetworkError(e.to_string()))?
            .to_vec();

        if data.is_empty() {
            return Ok(None);
        }

        let mime_type = header_mime
            .or_else(|| sniff_mime(&data).map(str::to_string))
            .unwrap_or_else(|| "image/jpeg".to_string());

        Ok(Some(FetchedImage { data, mime_type, url }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_front_url() {
        let client = CoverArtClient::new(&ServicesConfig::default()).unwrap();
        assert_eq!(
            client.front_url("abc-123"),
            "https://coverartarchive.org/release/abc-123/front-500"
        );
    }
}
