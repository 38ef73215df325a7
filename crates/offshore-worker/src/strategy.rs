//! Per-class caching strategies.
//!
//! [`StrategyRunner::run`] is total: whatever the network and the caches
//! are doing, every request handed to it gets a response. Network-first
//! classes (navigation, API) prefer live data and fall back to cache;
//! cache-first classes (images, static assets) skip the network entirely on
//! a hit; everything else is served stale while a background fetch
//! revalidates the entry for next time.

use std::sync::Arc;
use std::time::Duration;

use offshore_cache::{CacheKey, CacheStorage, Partition};
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use crate::classify::ResourceClass;
use crate::config::{PartitionNames, WorkerConfig};
use crate::fallback;
use crate::fetcher::Fetcher;
use crate::request::{FetchRequest, FetchResponse};
use crate::WorkerError;

/// Runs the caching strategy selected by a request's resource class.
pub struct StrategyRunner {
    storage: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    names: PartitionNames,
    origin: Url,
    shell_key: CacheKey,
    fetch_timeout: Duration,
    offline_api_message: String,
}

impl StrategyRunner {
    /// Create a runner over shared storage and a network backend.
    pub fn new(
        config: &WorkerConfig,
        storage: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, WorkerError> {
        let shell_key = CacheKey::get(&config.shell_url()?);
        Ok(Self {
            storage,
            fetcher,
            names: config.partition_names(),
            origin: config.origin.clone(),
            shell_key,
            fetch_timeout: config.fetch_timeout,
            offline_api_message: config.offline_api_message.clone(),
        })
    }

    /// Run the strategy for a classified request. Always yields a response.
    pub async fn run(&self, class: ResourceClass, request: &FetchRequest) -> FetchResponse {
        match class {
            ResourceClass::Navigation => self.navigation(request).await,
            ResourceClass::Api => self.api(request).await,
            ResourceClass::Image => {
                self.cache_first(request, &self.names.images, fallback::offline_image)
                    .await
            }
            ResourceClass::StaticAsset => {
                self.cache_first(request, &self.names.static_assets, fallback::offline_asset)
                    .await
            }
            ResourceClass::Other => self.stale_while_revalidate(request).await,
        }
    }

    // ==================== Network-first ====================

    /// Document navigations: live network, then the cached app shell.
    ///
    /// Any live same-origin document also overwrites the cached shell in
    /// the background, so the offline copy tracks the newest markup.
    async fn navigation(&self, request: &FetchRequest) -> FetchResponse {
        match self.fetch(request).await {
            Ok(response) => {
                if request.is_same_origin(&self.origin) {
                    self.refresh_shell(&response).await;
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "navigation fetch failed, serving cached shell");
                let shell = self.storage.open(&self.names.static_assets).await;
                match shell.match_request(&self.shell_key).await {
                    Some(entry) => FetchResponse::from_entry(&entry),
                    None => fallback::offline_document(),
                }
            }
        }
    }

    /// Overwrite the cached app-shell document with a fresh copy,
    /// fire-and-forget.
    async fn refresh_shell(&self, response: &FetchResponse) {
        let partition = self.storage.open(&self.names.static_assets).await;
        let key = self.shell_key.clone();
        let entry = response.to_entry();
        tokio::spawn(async move {
            if let Err(e) = partition.put(key, entry).await {
                warn!(error = %e, "app shell refresh failed");
            }
        });
    }

    /// Backend API calls: live network, then the cached reply for the
    /// exact request identity, then a synthesized empty payload.
    async fn api(&self, request: &FetchRequest) -> FetchResponse {
        let partition = self.storage.open(&self.names.api).await;
        let key = request.cache_key();
        match self.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    store(&partition, key, &response).await;
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "api fetch failed, trying cache");
                match partition.match_request(&key).await {
                    Some(entry) => FetchResponse::from_entry(&entry),
                    None => fallback::offline_api(&self.offline_api_message),
                }
            }
        }
    }

    // ==================== Cache-first ====================

    /// Immutable subresources: a hit never touches the network; a miss is
    /// fetched and stored for next time.
    async fn cache_first(
        &self,
        request: &FetchRequest,
        partition_name: &str,
        offline: fn() -> FetchResponse,
    ) -> FetchResponse {
        let partition = self.storage.open(partition_name).await;
        let key = request.cache_key();
        if let Some(entry) = partition.match_request(&key).await {
            return FetchResponse::from_entry(&entry);
        }
        match self.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    store(&partition, key, &response).await;
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "subresource fetch failed, synthesizing fallback");
                offline()
            }
        }
    }

    // ==================== Stale-while-revalidate ====================

    /// Everything else: a hit is returned immediately while a background
    /// fetch refreshes the entry; a miss waits for the network.
    async fn stale_while_revalidate(&self, request: &FetchRequest) -> FetchResponse {
        let partition = self.storage.open(&self.names.dynamic).await;
        let key = request.cache_key();
        if let Some(entry) = partition.match_request(&key).await {
            self.revalidate(partition.clone(), key.clone(), request.clone());
            return FetchResponse::from_entry(&entry);
        }
        match self.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    store(&partition, key, &response).await;
                }
                response
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "uncached fetch failed, synthesizing fallback");
                fallback::offline_generic()
            }
        }
    }

    /// Refresh a cached entry in the background; a failure only costs the
    /// refresh.
    fn revalidate(&self, partition: Partition, key: CacheKey, request: FetchRequest) {
        let fetcher = Arc::clone(&self.fetcher);
        let limit = self.fetch_timeout;
        tokio::spawn(async move {
            match fetch_with_timeout(fetcher.as_ref(), limit, &request).await {
                Ok(response) if response.ok() => store(&partition, key, &response).await,
                Ok(response) => {
                    debug!(url = %request.url, status = %response.status, "revalidation kept stale entry")
                }
                Err(e) => debug!(url = %request.url, error = %e, "revalidation fetch failed"),
            }
        });
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, WorkerError> {
        fetch_with_timeout(self.fetcher.as_ref(), self.fetch_timeout, request).await
    }
}

/// Store a response snapshot. Write failures are logged, never propagated;
/// the live response has already been handed back regardless.
async fn store(partition: &Partition, key: CacheKey, response: &FetchResponse) {
    if let Err(e) = partition.put(key, response.to_entry()).await {
        warn!(partition = %partition.name, error = %e, "cache write failed");
    }
}

/// Bound a fetch with the configured timeout, flattening expiry into a
/// fetch failure.
pub(crate) async fn fetch_with_timeout(
    fetcher: &dyn Fetcher,
    limit: Duration,
    request: &FetchRequest,
) -> Result<FetchResponse, WorkerError> {
    match timeout(limit, fetcher.fetch(request)).await {
        Ok(result) => result,
        Err(_) => Err(WorkerError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FakeFetcher;
    use crate::request::{RequestDestination, ResponseSource};
    use bytes::Bytes;
    use hashbrown::HashMap;
    use http::StatusCode;
    use offshore_cache::CacheEntry;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            origin: url("https://app.example.com"),
            api_hosts: vec!["api.example.com".to_string()],
            fetch_timeout: Duration::from_secs(5),
            ..WorkerConfig::default()
        }
    }

    fn runner_with(config: &WorkerConfig) -> (StrategyRunner, CacheStorage, Arc<FakeFetcher>) {
        let storage = CacheStorage::new();
        let fetcher = FakeFetcher::new();
        let runner = StrategyRunner::new(config, storage.clone(), fetcher.clone()).unwrap();
        (runner, storage, fetcher)
    }

    fn runner() -> (StrategyRunner, CacheStorage, Arc<FakeFetcher>) {
        runner_with(&test_config())
    }

    fn entry(body: &'static [u8]) -> CacheEntry {
        CacheEntry::new(200, HashMap::new(), Bytes::from_static(body))
    }

    /// Poll until a background write lands, bounded so a broken spawn
    /// fails the test instead of hanging it.
    async fn wait_for_body(partition: &Partition, key: &CacheKey, body: &[u8]) {
        for _ in 0..200 {
            if let Some(entry) = partition.match_request(key).await {
                if entry.body.as_ref() == body {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("cache entry never reached expected content");
    }

    // ==================== API ====================

    #[tokio::test]
    async fn test_api_success_caches_and_returns_live() {
        let (runner, storage, fetcher) = runner();
        let request = FetchRequest::get(url("https://api.example.com/promos?code=1"));
        fetcher.respond("https://api.example.com/promos?code=1", StatusCode::OK, "promo-body");

        let response = runner.run(ResourceClass::Api, &request).await;

        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(response.body.as_ref(), b"promo-body");
        let partition = storage.open(&test_config().partition_names().api).await;
        let hit = partition.match_request(&request.cache_key()).await.unwrap();
        assert_eq!(hit.body.as_ref(), b"promo-body");
    }

    #[tokio::test]
    async fn test_api_cache_write_failure_leaves_live_response_intact() {
        // zero-entry quota: every cache write is rejected
        let storage = CacheStorage::with_max_entries(0);
        let fetcher = FakeFetcher::new();
        let runner = StrategyRunner::new(&test_config(), storage.clone(), fetcher.clone()).unwrap();
        let request = FetchRequest::get(url("https://api.example.com/promos"));
        fetcher.respond("https://api.example.com/promos", StatusCode::OK, "promo-body");

        let response = runner.run(ResourceClass::Api, &request).await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(response.body.as_ref(), b"promo-body");
        let partition = storage.open(&test_config().partition_names().api).await;
        assert!(partition.is_empty().await);

        fetcher.go_offline();
        let fallback = runner.run(ResourceClass::Api, &request).await;
        assert_eq!(fallback.source, ResponseSource::Fallback);
    }

    #[tokio::test]
    async fn test_api_offline_replays_cached_body() {
        let (runner, _storage, fetcher) = runner();
        let request = FetchRequest::get(url("https://api.example.com/promos"));
        fetcher.respond(
            "https://api.example.com/promos",
            StatusCode::OK,
            r#"{"promoResult":["b9"]}"#,
        );
        runner.run(ResourceClass::Api, &request).await;

        fetcher.go_offline();
        let replayed = runner.run(ResourceClass::Api, &request).await;

        assert_eq!(replayed.source, ResponseSource::Cache);
        assert_eq!(replayed.body.as_ref(), br#"{"promoResult":["b9"]}"#);
    }

    #[tokio::test]
    async fn test_api_offline_cold_returns_json_fallback() {
        let (runner, _storage, fetcher) = runner();
        fetcher.go_offline();

        let response = runner
            .run(
                ResourceClass::Api,
                &FetchRequest::get(url("https://api.example.com/promos")),
            )
            .await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type(), Some("application/json"));
        assert_eq!(response.source, ResponseSource::Fallback);
        let payload: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(payload["status"], "SUCCESS");
        assert_eq!(payload["promoResult"], serde_json::json!([]));
        assert_eq!(payload["offline"], true);
        assert_eq!(payload["message"], "Sin conexión. No hay promociones en cache.");
    }

    #[tokio::test]
    async fn test_api_error_status_returned_live_but_never_cached() {
        let (runner, _storage, fetcher) = runner();
        let request = FetchRequest::get(url("https://api.example.com/promos"));
        fetcher.respond("https://api.example.com/promos", StatusCode::BAD_GATEWAY, "upstream died");

        let live = runner.run(ResourceClass::Api, &request).await;
        assert_eq!(live.status, StatusCode::BAD_GATEWAY);
        assert_eq!(live.source, ResponseSource::Network);

        fetcher.go_offline();
        let offline = runner.run(ResourceClass::Api, &request).await;
        assert_eq!(offline.source, ResponseSource::Fallback);
    }

    #[tokio::test]
    async fn test_api_identity_includes_query_string() {
        let (runner, _storage, fetcher) = runner();
        fetcher.respond("https://api.example.com/promo?code=750100", StatusCode::OK, "caramelo");
        runner
            .run(
                ResourceClass::Api,
                &FetchRequest::get(url("https://api.example.com/promo?code=750100")),
            )
            .await;

        fetcher.go_offline();
        let other = runner
            .run(
                ResourceClass::Api,
                &FetchRequest::get(url("https://api.example.com/promo?code=750101")),
            )
            .await;

        // The entry cached for ?code=750100 must not answer for ?code=750101.
        assert_eq!(other.source, ResponseSource::Fallback);
    }

    // ==================== Cache-first ====================

    #[tokio::test]
    async fn test_image_hit_skips_network() {
        let (runner, storage, fetcher) = runner();
        let request = FetchRequest::get(url("https://app.example.com/images/logob9.png"))
            .with_destination(RequestDestination::Image);
        let partition = storage.open(&test_config().partition_names().images).await;
        partition.put(request.cache_key(), entry(b"png")).await.unwrap();

        let response = runner.run(ResourceClass::Image, &request).await;

        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.body.as_ref(), b"png");
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_image_miss_fetches_once_then_serves_cache() {
        let (runner, _storage, fetcher) = runner();
        let request = FetchRequest::get(url("https://app.example.com/images/bastonb9.png"))
            .with_destination(RequestDestination::Image);
        fetcher.respond("https://app.example.com/images/bastonb9.png", StatusCode::OK, "baston");

        let first = runner.run(ResourceClass::Image, &request).await;
        let second = runner.run(ResourceClass::Image, &request).await;

        assert_eq!(first.source, ResponseSource::Network);
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.body.as_ref(), b"baston");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_image_offline_cold_serves_placeholder() {
        let (runner, _storage, fetcher) = runner();
        fetcher.go_offline();

        let response = runner
            .run(
                ResourceClass::Image,
                &FetchRequest::get(url("https://app.example.com/images/missing.png"))
                    .with_destination(RequestDestination::Image),
            )
            .await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type(), Some("image/svg+xml"));
        assert!(!response.body.is_empty());
    }

    #[tokio::test]
    async fn test_static_asset_cache_first() {
        let (runner, _storage, fetcher) = runner();
        let request = FetchRequest::get(url(
            "https://cdn.jsdelivr.net/npm/bootstrap@5.3.3/dist/css/bootstrap.min.css",
        ))
        .with_destination(RequestDestination::Style);
        fetcher.respond(
            "https://cdn.jsdelivr.net/npm/bootstrap@5.3.3/dist/css/bootstrap.min.css",
            StatusCode::OK,
            "body{}",
        );

        let miss = runner.run(ResourceClass::StaticAsset, &request).await;
        fetcher.go_offline();
        let hit = runner.run(ResourceClass::StaticAsset, &request).await;

        assert_eq!(miss.source, ResponseSource::Network);
        assert_eq!(hit.source, ResponseSource::Cache);
        assert_eq!(hit.body.as_ref(), b"body{}");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_static_asset_offline_cold_504() {
        let (runner, _storage, fetcher) = runner();
        fetcher.go_offline();

        let response = runner
            .run(
                ResourceClass::StaticAsset,
                &FetchRequest::get(url("https://cdn.example.com/lib.js"))
                    .with_destination(RequestDestination::Script),
            )
            .await;

        assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
        assert!(response.body.is_empty());
        assert_eq!(response.source, ResponseSource::Fallback);
    }

    // ==================== Stale-while-revalidate ====================

    #[tokio::test]
    async fn test_swr_serves_stale_then_revalidates() {
        let (runner, storage, fetcher) = runner();
        let request = FetchRequest::get(url("https://data.example.com/feed.json"));
        let partition = storage.open(&test_config().partition_names().dynamic).await;
        partition.put(request.cache_key(), entry(b"stale")).await.unwrap();
        fetcher.respond("https://data.example.com/feed.json", StatusCode::OK, "fresh");

        let immediate = runner.run(ResourceClass::Other, &request).await;
        assert_eq!(immediate.source, ResponseSource::Cache);
        assert_eq!(immediate.body.as_ref(), b"stale");

        // The background refresh replaces the entry for next time.
        wait_for_body(&partition, &request.cache_key(), b"fresh").await;
        let next = runner.run(ResourceClass::Other, &request).await;
        assert_eq!(next.body.as_ref(), b"fresh");
    }

    #[tokio::test]
    async fn test_swr_miss_waits_for_network_and_stores() {
        let (runner, storage, fetcher) = runner();
        let request = FetchRequest::get(url("https://data.example.com/feed.json"));
        fetcher.respond("https://data.example.com/feed.json", StatusCode::OK, "fresh");

        let response = runner.run(ResourceClass::Other, &request).await;

        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(response.body.as_ref(), b"fresh");
        let partition = storage.open(&test_config().partition_names().dynamic).await;
        assert!(partition.match_request(&request.cache_key()).await.is_some());
    }

    #[tokio::test]
    async fn test_swr_failed_revalidation_keeps_stale_entry() {
        let (runner, storage, fetcher) = runner();
        let request = FetchRequest::get(url("https://data.example.com/feed.json"));
        let partition = storage.open(&test_config().partition_names().dynamic).await;
        partition.put(request.cache_key(), entry(b"stale")).await.unwrap();
        fetcher.go_offline();

        let response = runner.run(ResourceClass::Other, &request).await;
        assert_eq!(response.body.as_ref(), b"stale");

        // Give the doomed background fetch a moment, then confirm the entry
        // survived it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let kept = partition.match_request(&request.cache_key()).await.unwrap();
        assert_eq!(kept.body.as_ref(), b"stale");
    }

    #[tokio::test]
    async fn test_swr_offline_cold_500() {
        let (runner, _storage, fetcher) = runner();
        fetcher.go_offline();

        let response = runner
            .run(
                ResourceClass::Other,
                &FetchRequest::get(url("https://data.example.com/feed.json")),
            )
            .await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.body.is_empty());
        assert_eq!(response.source, ResponseSource::Fallback);
    }

    // ==================== Navigation ====================

    #[tokio::test]
    async fn test_navigation_same_origin_refreshes_shell() {
        let (runner, storage, fetcher) = runner();
        let request = FetchRequest::navigate(url("https://app.example.com/products?q=baston"));
        fetcher.respond(
            "https://app.example.com/products?q=baston",
            StatusCode::OK,
            "<html>v2</html>",
        );

        let response = runner.run(ResourceClass::Navigation, &request).await;
        assert_eq!(response.source, ResponseSource::Network);

        // The fresh document lands under the fixed shell key, not the
        // route's own URL.
        let shell_key = CacheKey::get(&url("https://app.example.com/index.html"));
        let partition = storage.open(&test_config().partition_names().static_assets).await;
        wait_for_body(&partition, &shell_key, b"<html>v2</html>").await;
    }

    #[tokio::test]
    async fn test_navigation_cross_origin_leaves_shell_alone() {
        let (runner, storage, fetcher) = runner();
        let request = FetchRequest::navigate(url("https://elsewhere.example.com/page"));
        fetcher.respond("https://elsewhere.example.com/page", StatusCode::OK, "<html>other</html>");

        runner.run(ResourceClass::Navigation, &request).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let shell_key = CacheKey::get(&url("https://app.example.com/index.html"));
        let partition = storage.open(&test_config().partition_names().static_assets).await;
        assert!(partition.match_request(&shell_key).await.is_none());
    }

    #[tokio::test]
    async fn test_navigation_offline_serves_cached_shell_for_any_route() {
        let (runner, storage, fetcher) = runner();
        let shell_key = CacheKey::get(&url("https://app.example.com/index.html"));
        let partition = storage.open(&test_config().partition_names().static_assets).await;
        partition.put(shell_key, entry(b"<html>shell</html>")).await.unwrap();
        fetcher.go_offline();

        let response = runner
            .run(
                ResourceClass::Navigation,
                &FetchRequest::navigate(url("https://app.example.com/deep/route")),
            )
            .await;

        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.body.as_ref(), b"<html>shell</html>");
    }

    #[tokio::test]
    async fn test_navigation_offline_cold_503() {
        let (runner, _storage, fetcher) = runner();
        fetcher.go_offline();

        let response = runner
            .run(
                ResourceClass::Navigation,
                &FetchRequest::navigate(url("https://app.example.com/")),
            )
            .await;

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.body.is_empty());
    }

    // ==================== Timeout ====================

    #[tokio::test]
    async fn test_fetch_with_timeout_flattens_expiry() {
        let fetcher = FakeFetcher::new();
        fetcher.respond("https://slow.example.com/", StatusCode::OK, "late");
        fetcher.set_delay(Duration::from_secs(5));

        let err = fetch_with_timeout(
            fetcher.as_ref(),
            Duration::from_millis(10),
            &FetchRequest::get(url("https://slow.example.com/")),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, WorkerError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_hung_fetch_times_out_into_fallback() {
        let config = WorkerConfig {
            fetch_timeout: Duration::from_millis(25),
            ..test_config()
        };
        let (runner, _storage, fetcher) = runner_with(&config);
        let request = FetchRequest::get(url("https://api.example.com/promos"));
        fetcher.respond("https://api.example.com/promos", StatusCode::OK, "too late");
        fetcher.set_delay(Duration::from_secs(5));

        let response = runner.run(ResourceClass::Api, &request).await;

        assert_eq!(response.source, ResponseSource::Fallback);
        assert_eq!(fetcher.calls(), 1);
    }
}
