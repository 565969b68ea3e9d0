//! Emby API connector implementation
//!
//! Implements the `RemoteMediaSource` trait against the Emby/Jellyfin REST API.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::media_source::{ItemKind, ItemPage, RemoteItem, RemoteMediaSource};
use chrono::{DateTime, SecondsFormat, Utc};
use core_runtime::config::MediaServerConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::EmbyError;
use crate::types::{BaseItem, ItemsResponse};

/// Fields requested for full item listings
const ITEM_FIELDS: &str = "ProviderIds,Path,MediaSources,SeriesId,SeriesName,ParentIndexNumber,IndexNumber";

/// Ids fetched per request by `list_all_ids`
const ID_PAGE_SIZE: u32 = 5000;

/// Attempts per listing request on 5xx or transport errors
const MAX_LIST_ATTEMPTS: u32 = 3;

/// Emby API connector
///
/// # Features
///
/// - Recursive `/Items` listing filtered by item type
/// - Delta listing with `MinDateLastSaved`
/// - Minimal-field id listing
/// - Deletion through `DELETE` with a `POST .../Delete` fallback
///
/// # Example
///
/// ```ignore
/// use provider_emby::EmbyConnector;
/// use bridge_traits::media_source::{ItemKind, RemoteMediaSource};
///
/// let connector = EmbyConnector::new(http_client, "http://emby.local:8096", api_key);
/// let page = connector.page_items(&ItemKind::TRACKED, 0, 200).await?;
/// ```
pub struct EmbyConnector {
    http_client: Arc<dyn HttpClient>,

    /// Server root without trailing slash
    base_url: String,

    api_key: String,

    request_timeout: Duration,
}

impl EmbyConnector {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(http_client: Arc<dyn HttpClient>, config: &MediaServerConfig) -> Self {
        Self::new(http_client, config.base_url.clone(), config.api_key.clone())
            .with_timeout(Duration::from_secs(config.request_timeout_secs))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        HttpRequest::new(method, format!("{}{}", self.base_url, path))
            .header("X-Emby-Token", self.api_key.as_str())
            .header("Accept", "application/json")
            .timeout(self.request_timeout)
    }

    fn items_request(&self, kinds: &[ItemKind], start_index: u64, limit: u32) -> HttpRequest {
        let types = kinds
            .iter()
            .map(ItemKind::as_str)
            .collect::<Vec<_>>()
            .join(",");

        self.request(HttpMethod::Get, "/Items")
            .query("Recursive", "true")
            .query("IncludeItemTypes", types)
            .query("SortBy", "DateCreated,SortName")
            .query("SortOrder", "Ascending")
            .query("StartIndex", start_index.to_string())
            .query("Limit", limit.to_string())
    }

    /// Convert an API item, skipping types the cache does not track.
    fn convert_item(item: BaseItem) -> Option<RemoteItem> {
        let kind = match item.item_type.parse::<ItemKind>() {
            Ok(kind) => kind,
            Err(_) => {
                debug!(item_id = %item.id, item_type = %item.item_type, "Skipping untracked item type");
                return None;
            }
        };

        let size = item.effective_size();
        let has_primary_image = item.has_primary_image();

        Some(RemoteItem {
            id: item.id,
            name: item.name,
            kind,
            has_primary_image,
            provider_ids: item.provider_ids,
            size,
            index_number: item.index_number,
            parent_index_number: item.parent_index_number,
            series_id: item.series_id,
            series_name: item.series_name,
            path: item.path,
        })
    }

    fn check_response(response: HttpResponse, context: &str) -> std::result::Result<HttpResponse, EmbyError> {
        if response.is_success() {
            return Ok(response);
        }

        if response.status == 429 {
            return Err(EmbyError::RateLimitExceeded {
                retry_after_seconds: response
                    .header("Retry-After")
                    .and_then(|value| value.trim().parse().ok()),
            });
        }

        let body = String::from_utf8_lossy(&response.body).to_string();
        Err(EmbyError::from_status(response.status, context, body.trim()))
    }

    /// Execute a listing request, retrying server errors with backoff.
    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn fetch_items(&self, request: HttpRequest) -> Result<ItemsResponse> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = match self.http_client.execute(request.clone()).await {
                Ok(response) => Self::check_response(response, "GET /Items").map_err(BridgeError::from),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(response) => {
                    return response.json::<ItemsResponse>().map_err(|e| {
                        EmbyError::ParseError(format!("Failed to parse items response: {e}")).into()
                    });
                }
                Err(e) if e.is_authentication() || !e.is_retryable() || attempt >= MAX_LIST_ATTEMPTS => {
                    warn!(attempt, error = %e, "Items request failed");
                    return Err(e);
                }
                Err(e) => {
                    let backoff_ms = 100u64 * 2u64.pow(attempt);
                    warn!(
                        attempt,
                        max_attempts = MAX_LIST_ATTEMPTS,
                        backoff_ms,
                        error = %e,
                        "Items request failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
            }
        }
    }

    /// Skipped items still count as consumed so the caller's next
    /// `StartIndex` lines up with the server's.
    fn to_page(response: ItemsResponse) -> ItemPage {
        let consumed = response.items.len() as u64;
        let items = response
            .items
            .into_iter()
            .filter_map(Self::convert_item)
            .collect();
        ItemPage::new(items, response.total_record_count).with_consumed(consumed)
    }

    /// Try `primary`, then `fallback` whatever the primary failure was.
    async fn delete_with_fallback(&self, primary: HttpRequest, fallback: HttpRequest) -> Result<()> {
        let context = primary.url.clone();

        let primary_error = match self.http_client.execute(primary).await {
            Ok(response) => match Self::check_response(response, &context) {
                Ok(_) => return Ok(()),
                Err(e) => BridgeError::from(e),
            },
            Err(e) => e,
        };

        warn!(url = %context, error = %primary_error, "Primary delete endpoint failed, trying fallback");

        let fallback_context = fallback.url.clone();
        let response = self.http_client.execute(fallback).await?;
        Self::check_response(response, &fallback_context)?;
        Ok(())
    }
}

#[async_trait]
impl RemoteMediaSource for EmbyConnector {
    #[instrument(skip(self))]
    async fn page_items(&self, kinds: &[ItemKind], start_index: u64, limit: u32) -> Result<ItemPage> {
        let request = self
            .items_request(kinds, start_index, limit)
            .query("Fields", ITEM_FIELDS);

        let page = Self::to_page(self.fetch_items(request).await?);
        debug!(items = page.items.len(), total = page.total_count, "Fetched items page");
        Ok(page)
    }

    #[instrument(skip(self))]
    async fn changed_since(
        &self,
        since: DateTime<Utc>,
        kinds: &[ItemKind],
        start_index: u64,
        limit: u32,
    ) -> Result<ItemPage> {
        let request = self
            .items_request(kinds, start_index, limit)
            .query("Fields", ITEM_FIELDS)
            .query("MinDateLastSaved", since.to_rfc3339_opts(SecondsFormat::Secs, true));

        let page = Self::to_page(self.fetch_items(request).await?);
        debug!(items = page.items.len(), total = page.total_count, "Fetched changed items page");
        Ok(page)
    }

    #[instrument(skip(self))]
    async fn list_all_ids(&self, kinds: &[ItemKind]) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut start_index = 0u64;

        loop {
            let request = self
                .items_request(kinds, start_index, ID_PAGE_SIZE)
                .query("EnableImages", "false")
                .query("EnableUserData", "false");

            let response = self.fetch_items(request).await?;
            let received = response.items.len() as u64;
            ids.extend(response.items.into_iter().map(|item| item.id));
            start_index += received;

            if received == 0 || start_index >= response.total_record_count {
                break;
            }
        }

        info!(count = ids.len(), "Listed remote item ids");
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn delete_item(&self, id: &str) -> Result<()> {
        let primary = self.request(HttpMethod::Delete, &format!("/Items/{id}"));
        let fallback = self.request(HttpMethod::Post, &format!("/Items/{id}/Delete"));
        self.delete_with_fallback(primary, fallback).await?;
        info!(item_id = %id, "Deleted item on server");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_version(&self, id: &str) -> Result<()> {
        let primary = self.request(HttpMethod::Delete, &format!("/Videos/{id}/AlternateSources"));
        let fallback = self.request(
            HttpMethod::Post,
            &format!("/Videos/{id}/AlternateSources/Delete"),
        );
        self.delete_with_fallback(primary, fallback).await?;
        info!(item_id = %id, "Deleted media version on server");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::TimeZone;
    use mockall::mock;
    use mockall::Sequence;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
        }
    }

    fn json_response(status: u16, body: &str) -> Result<HttpResponse> {
        Ok(HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        })
    }

    fn connector(mock_http: MockHttpClient) -> EmbyConnector {
        EmbyConnector::new(Arc::new(mock_http), "http://emby.local:8096/", "secret")
    }

    #[tokio::test]
    async fn test_page_items_converts_tracked_types() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.method, HttpMethod::Get);
            assert!(req.url.starts_with("http://emby.local:8096/Items?"));
            assert!(req.url.contains("IncludeItemTypes=Movie%2CSeries%2CEpisode"));
            assert!(req.url.contains("StartIndex=200&Limit=100"));
            assert_eq!(req.headers.get("X-Emby-Token"), Some(&"secret".to_string()));

            json_response(
                200,
                r#"{
                    "Items": [
                        { "Id": "m1", "Name": "Heat", "Type": "Movie",
                          "ImageTags": { "Primary": "t" }, "ProviderIds": { "Tmdb": "949" }, "Size": 42 },
                        { "Id": "f1", "Name": "Extras", "Type": "Folder" },
                        { "Id": "e1", "Name": "Pilot", "Type": "Episode", "SeriesId": "s1",
                          "SeriesName": "Show", "IndexNumber": 1, "ParentIndexNumber": 1 }
                    ],
                    "TotalRecordCount": 1203
                }"#,
            )
        });

        let page = connector(mock_http)
            .page_items(&ItemKind::TRACKED, 200, 100)
            .await
            .unwrap();

        assert_eq!(page.total_count, 1203);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.consumed, 3);
        assert_eq!(page.next_start(200), 203);
        assert!(page.items[0].has_primary_image);
        assert_eq!(page.items[0].provider_ids.get("Tmdb"), Some(&"949".to_string()));
        assert_eq!(page.items[0].size, Some(42));
        assert_eq!(page.items[1].kind, ItemKind::Episode);
        assert_eq!(page.items[1].parent_index_number, Some(1));
    }

    #[tokio::test]
    async fn test_changed_since_sends_min_date() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert!(req.url.contains("MinDateLastSaved=2024-03-01T12%3A00%3A00Z"));
            json_response(200, r#"{ "Items": [], "TotalRecordCount": 0 }"#)
        });

        let since = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let page = connector(mock_http)
            .changed_since(since, &ItemKind::TRACKED, 0, 200)
            .await
            .unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_authentication() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| json_response(401, ""));

        let error = connector(mock_http)
            .page_items(&ItemKind::TRACKED, 0, 200)
            .await
            .unwrap_err();
        assert!(error.is_authentication());
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let mut mock_http = MockHttpClient::new();
        let mut seq = Sequence::new();
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| json_response(503, "busy"));
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| json_response(200, r#"{ "Items": [{ "Id": "m1", "Type": "Movie" }], "TotalRecordCount": 1 }"#));

        let page = connector(mock_http)
            .page_items(&ItemKind::TRACKED, 0, 200)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn test_list_all_ids_pages_until_total() {
        let mut mock_http = MockHttpClient::new();
        let mut seq = Sequence::new();
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| {
                assert!(req.url.contains("StartIndex=0"));
                assert!(req.url.contains("EnableImages=false"));
                assert!(!req.url.contains("Fields="));
                let items: Vec<String> = (0..ID_PAGE_SIZE).map(|n| format!(r#"{{ "Id": "i{n}" }}"#)).collect();
                json_response(
                    200,
                    &format!(r#"{{ "Items": [{}], "TotalRecordCount": {} }}"#, items.join(","), ID_PAGE_SIZE + 2),
                )
            });
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| {
                assert!(req.url.contains(&format!("StartIndex={ID_PAGE_SIZE}")));
                json_response(
                    200,
                    r#"{ "Items": [{ "Id": "last-1" }, { "Id": "last-2" }], "TotalRecordCount": 5002 }"#,
                )
            });

        let ids = connector(mock_http)
            .list_all_ids(&ItemKind::TRACKED)
            .await
            .unwrap();
        assert_eq!(ids.len(), ID_PAGE_SIZE as usize + 2);
        assert_eq!(ids.last().map(String::as_str), Some("last-2"));
    }

    #[tokio::test]
    async fn test_list_all_ids_follows_capped_pages() {
        let mut mock_http = MockHttpClient::new();
        let mut seq = Sequence::new();
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| json_response(200, r#"{ "Items": [{ "Id": "a" }, { "Id": "b" }], "TotalRecordCount": 3 }"#));
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| {
                assert!(req.url.contains("StartIndex=2"));
                json_response(200, r#"{ "Items": [{ "Id": "c" }], "TotalRecordCount": 3 }"#)
            });

        let ids = connector(mock_http)
            .list_all_ids(&ItemKind::TRACKED)
            .await
            .unwrap();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_delete_item_falls_back_to_post() {
        let mut mock_http = MockHttpClient::new();
        let mut seq = Sequence::new();
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| {
                assert_eq!(req.method, HttpMethod::Delete);
                assert!(req.url.ends_with("/Items/42"));
                json_response(405, "Method Not Allowed")
            });
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| {
                assert_eq!(req.method, HttpMethod::Post);
                assert!(req.url.ends_with("/Items/42/Delete"));
                json_response(204, "")
            });

        connector(mock_http).delete_item("42").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_version_uses_alternate_sources() {
        let mut mock_http = MockHttpClient::new();
        let mut seq = Sequence::new();
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| {
                assert!(req.url.ends_with("/Videos/7/AlternateSources"));
                Err(BridgeError::OperationFailed("connection reset".into()))
            });
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| {
                assert!(req.url.ends_with("/Videos/7/AlternateSources/Delete"));
                json_response(500, "still broken")
            });

        let error = connector(mock_http).delete_version("7").await.unwrap_err();
        assert!(matches!(error, BridgeError::OperationFailed(_)));
    }

    #[tokio::test]
    async fn test_delete_falls_back_after_auth_failure() {
        let mut mock_http = MockHttpClient::new();
        let mut seq = Sequence::new();
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| {
                assert_eq!(req.method, HttpMethod::Delete);
                json_response(403, "")
            });
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| {
                assert_eq!(req.method, HttpMethod::Post);
                assert!(req.url.ends_with("/Items/42/Delete"));
                json_response(403, "")
            });

        let error = connector(mock_http).delete_item("42").await.unwrap_err();
        assert!(error.is_authentication());
    }

    #[tokio::test]
    async fn test_delete_succeeds_when_only_fallback_is_authorized() {
        let mut mock_http = MockHttpClient::new();
        let mut seq = Sequence::new();
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| json_response(401, ""));
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| json_response(204, ""));

        connector(mock_http).delete_item("42").await.unwrap();
    }
}
