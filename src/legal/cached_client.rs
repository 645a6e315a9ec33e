//! Cached case-management client: the resource operations callers use.

use std::sync::Arc;

use tracing::info;

use crate::cache::{CacheLayer, FetchProgress, FetchResult, Listing, MemoryStorage, ProgressTracker};
use crate::clock::{Clock, Sleeper};
use crate::error::UpstreamError;
use crate::settings::Settings;

use super::api_types::normalize;
use super::cache::ResourceKey;
use super::client::{validate_id, LegalClient};
use super::crawler::{CrawlOptions, Crawler};

/// Case-management client with transparent caching and stale fallback.
///
/// Every operation answers with the same [`FetchResult`] envelope, whether
/// the data came from the upstream, the cache, or neither.
#[derive(Clone)]
pub struct CachedLegalClient {
  inner: LegalClient,
  cache: CacheLayer<MemoryStorage>,
  crawler: Crawler,
  progress: ProgressTracker,
}

impl CachedLegalClient {
  /// Wire the client, cache and crawler together.
  ///
  /// `options.delay` is replaced by the inter-request delay from `settings`.
  pub fn new(
    inner: LegalClient,
    settings: &Settings,
    options: CrawlOptions,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
  ) -> Self {
    let progress = ProgressTracker::new(clock.clone());
    let options = CrawlOptions {
      delay: settings.inter_request_delay,
      ..options
    };
    let crawler = Crawler::new(options, sleeper, progress.clone());
    let cache = CacheLayer::new(MemoryStorage::new(clock), settings.cache_ttl);

    Self {
      inner,
      cache,
      crawler,
      progress,
    }
  }

  /// All lawsuits, crawled across every page.
  pub async fn lawsuits(&self, force_refresh: bool) -> Result<FetchResult, UpstreamError> {
    let key = ResourceKey::LawsuitsFull;
    self
      .crawl(&key, force_refresh, |page, limit| {
        self.inner.lawsuits_page(page, limit)
      })
      .await
  }

  /// The first page of lawsuits only.
  pub async fn lawsuits_first_page(&self, force_refresh: bool) -> Result<FetchResult, UpstreamError> {
    let key = ResourceKey::LawsuitsFirstPage;
    let limit = self.crawler.options().page_size;
    info!(resource = %key.description(), force_refresh, "resource requested");

    self
      .cache
      .fetch(&key.cache_key(), force_refresh, || async move {
        let value = self.inner.lawsuits_page(1, limit).await?;
        let page = normalize(value, 0);
        Ok(Listing::new(page.items, page.total_count))
      })
      .await
  }

  /// Every movement of one lawsuit.
  ///
  /// A missing or malformed id is rejected before the cache is consulted.
  pub async fn movements(
    &self,
    lawsuit_id: &str,
    force_refresh: bool,
  ) -> Result<FetchResult, UpstreamError> {
    let lawsuit_id = validate_id(lawsuit_id)?.to_string();
    let key = ResourceKey::Movements {
      lawsuit_id: lawsuit_id.clone(),
    };
    self
      .crawl(&key, force_refresh, |page, limit| {
        self.inner.movements_page(&lawsuit_id, page, limit)
      })
      .await
  }

  /// Progress of the latest crawl stored under `key`.
  pub fn progress(&self, key: &str) -> Option<FetchProgress> {
    self.progress.get(key)
  }

  /// Number of resources currently cached.
  pub fn cached_resources(&self) -> usize {
    self.cache.storage().len()
  }

  async fn crawl<F, Fut>(
    &self,
    key: &ResourceKey,
    force_refresh: bool,
    fetch_page: F,
  ) -> Result<FetchResult, UpstreamError>
  where
    F: Fn(u32, u32) -> Fut,
    Fut: std::future::Future<Output = Result<serde_json::Value, UpstreamError>>,
  {
    let cache_key = key.cache_key();
    info!(resource = %key.description(), force_refresh, "resource requested");

    self
      .cache
      .fetch(&cache_key, force_refresh, || async {
        let outcome = self.crawler.crawl(&cache_key, fetch_page).await?;
        Ok(Listing::new(outcome.items, outcome.total_count))
      })
      .await
  }
}
