//! TMDB API Client
//!
//! Season listings for TV shows, used as the reference when checking local
//! season/episode counts.
//!
//! ## Endpoint
//!
//! - **Show details**: `GET {base}/tv/{id}`; only the `seasons` array is read
//!
//! ## Authentication
//!
//! TMDB accepts either a v3 API key (sent as the `api_key` query parameter)
//! or a v4 read access token (a JWT, sent as a bearer token). The client
//! picks the form from the shape of the configured credential.
//!
//! ## Rate Limiting
//!
//! Requests are spaced by a minimum delay. A 429 answer is retried up to
//! `max_attempts` times, waiting for `Retry-After` when the server sends it
//! (capped) and an exponential backoff otherwise.
//!
//! ## Usage
//!
//! ```ignore
//! use provider_tmdb::TmdbClient;
//!
//! let client = TmdbClient::from_config(http_client, &config.metadata)?;
//! let seasons = client.fetch_show_seasons("1399").await?;
//! ```

use crate::error::{Result, TmdbError};
use crate::types::TvDetails;
use async_trait::async_trait;
use bridge_traits::error::BridgeError;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::metadata_source::{ExternalMetadataSource, SeasonInfo};
use core_runtime::config::MetadataApiConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument, warn};

/// Timeout for API requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// First backoff when a 429 carries no `Retry-After`
const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// v4 read access tokens are JWTs
const V4_TOKEN_PREFIX: &str = "eyJ";

enum Credential {
    ApiKey(String),
    BearerToken(String),
}

impl Credential {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with(V4_TOKEN_PREFIX) {
            Credential::BearerToken(raw.to_string())
        } else {
            Credential::ApiKey(raw.to_string())
        }
    }
}

/// Enforces a minimum delay between consecutive requests
struct RateLimiter {
    last_request: Option<Instant>,
    min_delay: Duration,
}

impl RateLimiter {
    fn new(delay_ms: u64) -> Self {
        Self {
            last_request: None,
            min_delay: Duration::from_millis(delay_ms),
        }
    }

    async fn wait_if_needed(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                debug!("Rate limiting: waiting {:?}", wait_time);
                sleep(wait_time).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}

/// TMDB API client
pub struct TmdbClient {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    credential: Credential,
    max_attempts: u32,
    max_retry_wait: Duration,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl TmdbClient {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        api_key: &str,
        rate_limit_delay_ms: u64,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential: Credential::parse(api_key),
            max_attempts: 3,
            max_retry_wait: Duration::from_secs(30),
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(rate_limit_delay_ms))),
        }
    }

    /// Build a client from the metadata section.
    ///
    /// Fails with `AuthenticationFailed` when no API key is configured.
    pub fn from_config(http_client: Arc<dyn HttpClient>, config: &MetadataApiConfig) -> Result<Self> {
        let api_key = config
            .tmdb_api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| TmdbError::AuthenticationFailed("No TMDB API key configured".to_string()))?;

        Ok(Self::new(
            http_client,
            config.tmdb_base_url.clone(),
            api_key,
            config.rate_limit_delay_ms,
        )
        .with_retry_limits(config.max_attempts, Duration::from_secs(config.max_retry_wait_secs)))
    }

    pub fn with_retry_limits(mut self, max_attempts: u32, max_retry_wait: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.max_retry_wait = max_retry_wait;
        self
    }

    fn show_request(&self, show_id: &str) -> HttpRequest {
        let request = HttpRequest::new(HttpMethod::Get, format!("{}/tv/{}", self.base_url, show_id))
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT);

        match &self.credential {
            Credential::BearerToken(token) => request.bearer_token(token.as_str()),
            Credential::ApiKey(key) => request.query("api_key", key),
        }
    }

    /// Wait before the next attempt after a 429.
    fn retry_delay(&self, response: &HttpResponse, attempt: u32) -> (Duration, Option<u64>) {
        let retry_after = response
            .header("Retry-After")
            .and_then(|value| value.trim().parse::<u64>().ok());

        let delay = match retry_after {
            Some(secs) => Duration::from_secs(secs),
            None => BASE_RETRY_DELAY * 2u32.saturating_pow(attempt.saturating_sub(1)),
        };
        (delay.min(self.max_retry_wait), retry_after)
    }

    #[instrument(skip(self))]
    async fn get_show(&self, show_id: &str) -> Result<TvDetails> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.rate_limiter.lock().await.wait_if_needed().await;

            let response = self.http_client.execute(self.show_request(show_id)).await?;

            match response.status {
                200..=299 => {
                    return response
                        .json::<TvDetails>()
                        .map_err(|e| TmdbError::ParseError(e.to_string()));
                }
                401 | 403 => {
                    return Err(TmdbError::AuthenticationFailed(format!(
                        "GET /tv/{show_id}: status {}",
                        response.status
                    )));
                }
                404 => {
                    return Err(TmdbError::ShowNotFound {
                        show_id: show_id.to_string(),
                    });
                }
                429 => {
                    let (delay, retry_after) = self.retry_delay(&response, attempt);
                    if attempt >= self.max_attempts {
                        warn!(show_id, attempt, "TMDB rate limit persisted, giving up");
                        return Err(TmdbError::RateLimited {
                            attempts: attempt,
                            retry_after_seconds: retry_after,
                        });
                    }
                    warn!(
                        show_id,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "TMDB rate limited, retrying"
                    );
                    sleep(delay).await;
                }
                status => {
                    return Err(TmdbError::ApiError {
                        status_code: status,
                        message: String::from_utf8_lossy(&response.body).trim().to_string(),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl ExternalMetadataSource for TmdbClient {
    async fn fetch_show_seasons(&self, show_id: &str) -> bridge_traits::error::Result<Vec<SeasonInfo>> {
        let details = self.get_show(show_id).await.map_err(BridgeError::from)?;
        debug!(show_id, seasons = details.seasons.len(), "Fetched TMDB seasons");
        Ok(details.seasons.into_iter().map(SeasonInfo::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mockall::mock;
    use mockall::Sequence;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> bridge_traits::error::Result<HttpResponse>;
        }
    }

    const SHOW_BODY: &str = r#"{
        "id": 1399,
        "name": "Game of Thrones",
        "seasons": [
            { "season_number": 0, "episode_count": 14, "name": "Specials" },
            { "season_number": 1, "episode_count": 10, "name": "Season 1" }
        ]
    }"#;

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> bridge_traits::error::Result<HttpResponse> {
        Ok(HttpResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            body: Bytes::from(body.to_string()),
        })
    }

    fn client(mock_http: MockHttpClient, api_key: &str) -> TmdbClient {
        TmdbClient::new(Arc::new(mock_http), "https://tmdb.test/3/", api_key, 0)
    }

    #[tokio::test]
    async fn test_fetch_show_seasons_with_v3_key() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.url, "https://tmdb.test/3/tv/1399?api_key=abc123");
            assert!(!req.headers.contains_key("Authorization"));
            response(200, &[], SHOW_BODY)
        });

        let seasons = client(mock_http, "abc123")
            .fetch_show_seasons("1399")
            .await
            .unwrap();

        assert_eq!(seasons.len(), 2);
        assert_eq!(seasons[1].season_number, 1);
        assert_eq!(seasons[1].episode_count, 10);
    }

    #[tokio::test]
    async fn test_v4_token_is_sent_as_bearer() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.url, "https://tmdb.test/3/tv/1399");
            assert_eq!(
                req.headers.get("Authorization").map(String::as_str),
                Some("Bearer eyJhbGciOiJIUzI1NiJ9.payload")
            );
            response(200, &[], SHOW_BODY)
        });

        client(mock_http, "eyJhbGciOiJIUzI1NiJ9.payload")
            .fetch_show_seasons("1399")
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_honors_retry_after() {
        let mut mock_http = MockHttpClient::new();
        let mut seq = Sequence::new();
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| response(429, &[("Retry-After", "2")], ""));
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| response(200, &[], SHOW_BODY));

        let started = Instant::now();
        let seasons = client(mock_http, "abc123")
            .fetch_show_seasons("1399")
            .await
            .unwrap();

        assert_eq!(seasons.len(), 2);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_gives_up_after_max_attempts() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(3)
            .returning(|_| response(429, &[("retry-after", "600")], ""));

        let started = Instant::now();
        let error = client(mock_http, "abc123")
            .with_retry_limits(3, Duration::from_secs(5))
            .fetch_show_seasons("1399")
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            BridgeError::RateLimited {
                retry_after_secs: Some(600)
            }
        ));
        // Two waits, each capped.
        assert!(started.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_authentication() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| response(401, &[], r#"{"status_code":7,"status_message":"Invalid API key"}"#));

        let error = client(mock_http, "bad")
            .fetch_show_seasons("1399")
            .await
            .unwrap_err();
        assert!(error.is_authentication());
    }

    #[tokio::test]
    async fn test_missing_show_maps_to_not_found() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| response(404, &[], ""));

        let error = client(mock_http, "abc123")
            .fetch_show_seasons("999999")
            .await
            .unwrap_err();
        assert!(matches!(error, BridgeError::NotFound(id) if id == "999999"));
    }

    #[test]
    fn test_from_config_requires_key() {
        let http: Arc<dyn HttpClient> = Arc::new(MockHttpClient::new());
        assert!(TmdbClient::from_config(Arc::clone(&http), &MetadataApiConfig::new()).is_err());
        assert!(TmdbClient::from_config(http, &MetadataApiConfig::new().with_tmdb_api_key("k")).is_ok());
    }
}
