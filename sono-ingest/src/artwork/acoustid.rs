//! AcoustID fingerprint lookup
//!
//! Rate limited to 3 requests/second. Asks for recordings with their releases
//! so a hit can go straight to the Cover Art Archive.

use super::rate_limit::RateLimiter;
use super::{FingerprintLookup, FingerprintMatch};
use crate::error::LookupError;
use async_trait::async_trait;
use serde::Deserialize;
use sono_common::config::ServicesConfig;
use std::sync::Arc;

const RATE_LIMIT_MS: u64 = 334; // 3 requests per second

#[derive(Debug, Deserialize)]
struct AcoustIDResponse {
    status: String,
    #[serde(default)]
    results: Vec<AcoustIDResult>,
    #[serde(default)]
    error: Option<AcoustIDErrorBody>,
}

#[derive(Debug, Deserialize)]
struct AcoustIDErrorBody {
    #[serde(default)]
    code: Option<u16>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct AcoustIDResult {
    id: String,
    /// Match confidence (0.0 to 1.0)
    score: f64,
    #[serde(default)]
    recordings: Vec<AcoustIDRecording>,
}

#[derive(Debug, Deserialize)]
struct AcoustIDRecording {
    id: String,
    #[serde(default)]
    releases: Vec<AcoustIDRelease>,
}

#[derive(Debug, Deserialize)]
struct AcoustIDRelease {
    id: String,
    #[serde(default)]
    title: Option<String>,
}

pub struct AcoustIdClient {
    http_client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    api_key: String,
    base_url: String,
}

impl AcoustIdClient {
    pub fn new(api_key: String, config: &ServicesConfig) -> Result<Self, LookupError> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LookupError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            rate_limiter: Arc::new(RateLimiter::new(RATE_LIMIT_MS)),
            api_key,
            base_url: config.acoustid_url.clone(),
        })
    }
}

/// Best-scoring result that carries a release
fn best_match(response: AcoustIDResponse) -> Option<FingerprintMatch> {
    let mut best: Option<FingerprintMatch> = None;

    for result in response.results {
        let release = result
            .recordings
            .iter()
            .find_map(|rec| rec.releases.first().map(|rel| (rec.id.clone(), rel)));

        let Some((recording_id, release)) = release else {
            continue;
        };

        if best.as_ref().map(|b| result.score > b.score).unwrap_or(true) {
            best = Some(FingerprintMatch {
                acoustid: result.id.clone(),
                score: result.score,
                recording_id,
                release_id: release.id.clone(),
                release_title: release.title.clone(),
            });
        }
    }

    best
}

#[async_trait]
impl FingerprintLookup for AcoustIdClient {
    async fn lookup(&self, fingerprint: &str, duration_seconds: u64) -> Result<Option<FingerprintMatch>, LookupError> {
        self.rate_limiter.wait("AcoustID").await;

        let duration = duration_seconds.to_string();
        let params = [
            ("client", self.api_key.as_str()),
            ("meta", "recordings releases"),
            ("duration", duration.as_str()),
            ("fingerprint", fingerprint),
        ];

        tracing::debug!(duration_seconds, "Querying AcoustID API");

        let response = self
            .http_client
            .post(&self.base_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| LookupError::NetworkError(e.to_string()))?;

        let status = response.status();

        if status == 401 {
            return Err(LookupError::InvalidApiKey);
        }

        if status == 429 || status == 503 {
            return Err(LookupError::RateLimitExceeded);
        }

        let body: AcoustIDResponse = response
            .json()
            .await
            .map_err(|e| LookupError::ParseError(e.to_string()))?;

        if body.status != "ok" {
            let (code, message) = body
                .error
                .map(|e| (e.code.unwrap_or(status.as_u16()), e.message))
                .unwrap_or((status.as_u16(), "unknown error".to_string()));
            // AcoustID reports an invalid key as error code 4
            if code == 4 {
                return Err(LookupError::InvalidApiKey);
            }
            return Err(LookupError::ApiError(code, message));
        }

        let best = best_match(body);
        match &best {
            Some(m) => tracing::info!(
                acoustid = %m.acoustid,
                score = m.score,
                release_id = %m.release_id,
                "AcoustID lookup successful"
            ),
            None => tracing::debug!("AcoustID lookup returned no release"),
        }

        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_match_skips_results_without_release() {
        let json = r#"{"status":"ok","results":[
            {"id":"a1","score":0.97,"recordings":[{"id":"rec1"}]},
            {"id":"a2","score":0.91,"recordings":[{"id":"rec2","releases":[{"id":"rel2","title":"Album"}]}]},
            {"id":"a3","score":0.50,"recordings":[{"id":"rec3","releases":[{"id":"rel3"}]}]}
        ]}"#;
        let response: AcoustIDResponse = serde_json::from_str(json).unwrap();
        let best = best_match(response).unwrap();

        assert_eq!(best.acoustid, "a2");
        assert_eq!(best.release_id, "rel2");
        assert_eq!(best.release_title.as_deref(), Some("Album"));
        assert!((best.score - 0.91).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_response_parses() {
        let json = r#"{"status":"error","error":{"code":4,"message":"invalid API key"}}"#;
        let response: AcoustIDResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.status, "error");
        assert_eq!(response.error.unwrap().code, Some(4));
        assert!(response.results.is_empty());
    }
}
