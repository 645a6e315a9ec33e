//! Cache layer that orchestrates caching logic with network fetching.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::UpstreamError;

use super::storage::CacheStorage;
use super::types::{CacheEntry, FetchResult, Listing};

/// One in-flight slot per key. Callers queue on the lock, which holds the
/// outcome of the last fetch; the counter tells a queued caller whether a
/// fetch finished while it waited.
#[derive(Default)]
struct Flight {
  last: tokio::sync::Mutex<Option<Result<(), UpstreamError>>>,
  completed: AtomicU64,
}

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the resource operations and the upstream client.
/// Availability wins over freshness: once a key has been fetched, callers get
/// data back even while the upstream is failing.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  /// How long a stored entry is served without refetching
  ttl: Duration,
  flights: Arc<Mutex<HashMap<String, Arc<Flight>>>>,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer over the given storage backend.
  pub fn new(storage: S, ttl: Duration) -> Self {
    Self {
      storage: Arc::new(storage),
      ttl,
      flights: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Fetch a listing with cache-first strategy and stale fallback.
  ///
  /// 1. Unless `force_refresh`, a fresh entry is returned immediately
  /// 2. Otherwise the fetcher runs, at most once at a time per key
  /// 3. On success the entry is replaced
  /// 4. On failure any entry, of any age, is served instead; a transient
  ///    failure with nothing cached yields an empty rate-limited listing
  ///
  /// Only a non-transient failure with nothing cached is returned as an error.
  pub async fn fetch<F, Fut>(
    &self,
    key: &str,
    force_refresh: bool,
    fetcher: F,
  ) -> Result<FetchResult, UpstreamError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Listing, UpstreamError>>,
  {
    if !force_refresh {
      if let Some(result) = self.fresh(key) {
        debug!(key, "cache hit");
        return Ok(result);
      }
    }

    let flight = self.flight(key);
    let seen = flight.completed.load(Ordering::Acquire);
    let mut last = flight.last.lock().await;

    // Someone else fetched this key while we queued; share their outcome.
    if flight.completed.load(Ordering::Acquire) != seen {
      match last.clone() {
        Some(Ok(())) => {
          if let Some(entry) = self.storage.get(key) {
            debug!(key, "joined in-flight fetch");
            let now = self.storage.clock().now();
            return Ok(FetchResult::from_cache(entry, now, false));
          }
        }
        Some(Err(err)) => {
          debug!(key, "joined failed in-flight fetch");
          return self.fallback(key, err);
        }
        None => {}
      }
    }

    info!(key, force_refresh, "fetching from upstream");
    let outcome = fetcher().await;
    *last = Some(outcome.as_ref().map(|_| ()).map_err(Clone::clone));
    flight.completed.fetch_add(1, Ordering::Release);

    match outcome {
      Ok(data) => {
        self.storage.set(key, data.clone(), false);
        Ok(FetchResult::from_network(data))
      }
      Err(err) => self.fallback(key, err),
    }
  }

  fn fresh(&self, key: &str) -> Option<FetchResult> {
    if !self.storage.is_fresh(key, self.ttl) {
      return None;
    }
    let entry = self.storage.get(key)?;
    let now = self.storage.clock().now();
    Some(FetchResult::from_cache(entry, now, false))
  }

  fn fallback(&self, key: &str, err: UpstreamError) -> Result<FetchResult, UpstreamError> {
    let now = self.storage.clock().now();
    let cached = self.storage.get(key);

    if err.is_transient() {
      if err.is_rate_limit() {
        warn!(key, error = %err, "upstream rate limited");
      } else {
        warn!(key, error = %err, "transient upstream failure");
      }
      return Ok(match cached {
        Some(entry) => {
          warn!(key, age_secs = entry.age(now).as_secs(), "serving cached data");
          let entry = CacheEntry {
            rate_limited: true,
            ..entry
          };
          self.storage.put(key, entry.clone());
          FetchResult::from_cache(entry, now, true)
        }
        None => {
          warn!(key, "nothing cached, serving empty listing");
          FetchResult::empty_rate_limited()
        }
      });
    }

    match cached {
      Some(entry) => {
        warn!(key, error = %err, "upstream request failed, serving cached data");
        Ok(FetchResult::from_cache(entry, now, false))
      }
      None => Err(err),
    }
  }

  fn flight(&self, key: &str) -> Arc<Flight> {
    let mut flights = self
      .flights
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner);
    Arc::clone(flights.entry(key.to_string()).or_default())
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      ttl: self.ttl,
      flights: Arc::clone(&self.flights),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::clock::testing::ManualClock;
  use serde_json::json;
  use std::sync::atomic::AtomicU32;

  const TTL: Duration = Duration::from_secs(300);

  fn layer() -> (CacheLayer<MemoryStorage>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let layer = CacheLayer::new(MemoryStorage::new(clock.clone()), TTL);
    (layer, clock)
  }

  fn listing(n: usize) -> Listing {
    Listing::new((0..n).map(|i| json!({ "id": i })).collect(), n as u64)
  }

  #[tokio::test]
  async fn test_fresh_entry_skips_fetcher() {
    let (layer, clock) = layer();
    let calls = AtomicU32::new(0);

    let first = layer
      .fetch("k", false, || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(listing(3))
      })
      .await
      .unwrap();
    assert!(!first.metadata.from_cache);

    clock.advance(Duration::from_secs(299));
    let second = layer
      .fetch("k", false, || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(listing(5))
      })
      .await
      .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(second.metadata.from_cache);
    assert!(!second.metadata.rate_limited);
    assert_eq!(second.items, first.items);
    assert_eq!(second.metadata.cache_age, Duration::from_secs(299));
  }

  #[tokio::test]
  async fn test_stale_entry_is_refetched() {
    let (layer, clock) = layer();
    layer.fetch("k", false, || async { Ok(listing(1)) }).await.unwrap();

    clock.advance(TTL);
    let result = layer.fetch("k", false, || async { Ok(listing(2)) }).await.unwrap();

    assert!(!result.metadata.from_cache);
    assert_eq!(result.total_count, 2);
  }

  #[tokio::test]
  async fn test_force_refresh_always_fetches() {
    let (layer, _clock) = layer();
    let calls = AtomicU32::new(0);

    for _ in 0..3 {
      let result = layer
        .fetch("k", true, || async {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(listing(1))
        })
        .await
        .unwrap();
      assert!(!result.metadata.from_cache);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_transient_failure_serves_stale_entry() {
    let (layer, clock) = layer();
    let original = layer.fetch("k", false, || async { Ok(listing(4)) }).await.unwrap();

    clock.advance(Duration::from_secs(3600));
    let result = layer
      .fetch("k", true, || async { Err(UpstreamError::RateLimited { attempts: 5 }) })
      .await
      .unwrap();

    assert_eq!(result.items, original.items);
    assert_eq!(result.total_count, 4);
    assert!(result.metadata.from_cache);
    assert!(result.metadata.rate_limited);
    assert_eq!(result.metadata.cache_age, Duration::from_secs(3600));
    assert!(layer.storage().get("k").unwrap().rate_limited);
  }

  #[tokio::test]
  async fn test_transient_failure_without_cache_is_empty() {
    let (layer, _clock) = layer();

    let result = layer
      .fetch("k", false, || async { Err(UpstreamError::status(502, "Bad Gateway")) })
      .await
      .unwrap();

    assert!(result.items.is_empty());
    assert_eq!(result.total_count, 0);
    assert!(result.metadata.rate_limited);
    assert!(!result.metadata.from_cache);
    assert!(layer.storage().get("k").is_none());
  }

  #[tokio::test]
  async fn test_non_transient_failure_prefers_cache() {
    let (layer, clock) = layer();
    layer.fetch("k", false, || async { Ok(listing(2)) }).await.unwrap();
    clock.advance(Duration::from_secs(10));

    let result = layer
      .fetch("k", true, || async { Err(UpstreamError::status(404, "gone")) })
      .await
      .unwrap();

    assert_eq!(result.total_count, 2);
    assert!(result.metadata.from_cache);
    assert!(!result.metadata.rate_limited);
  }

  #[tokio::test]
  async fn test_non_transient_failure_without_cache_propagates() {
    let (layer, _clock) = layer();

    let err = layer
      .fetch("k", false, || async { Err(UpstreamError::status(403, "forbidden")) })
      .await
      .unwrap_err();

    assert_eq!(err.http_status(), 403);
  }

  #[tokio::test]
  async fn test_concurrent_callers_share_one_fetch() {
    let (layer, _clock) = layer();
    let calls = Arc::new(AtomicU32::new(0));

    let tasks = (0..4).map(|_| {
      let layer = layer.clone();
      let calls = Arc::clone(&calls);
      async move {
        layer
          .fetch("k", false, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(listing(7))
          })
          .await
      }
    });
    let results = futures::future::join_all(tasks).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
      assert_eq!(result.unwrap().total_count, 7);
    }
  }

  #[tokio::test]
  async fn test_concurrent_callers_share_one_failed_fetch() {
    let (layer, _clock) = layer();
    let calls = Arc::new(AtomicU32::new(0));

    let tasks = (0..4).map(|_| {
      let layer = layer.clone();
      let calls = Arc::clone(&calls);
      async move {
        layer
          .fetch("k", false, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(UpstreamError::RateLimited { attempts: 5 })
          })
          .await
      }
    });
    let results = futures::future::join_all(tasks).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
      let result = result.unwrap();
      assert!(result.items.is_empty());
      assert!(result.metadata.rate_limited);
    }
  }

  #[tokio::test]
  async fn test_waiters_on_failed_fetch_get_stale_entry() {
    let (layer, clock) = layer();
    layer.fetch("k", false, || async { Ok(listing(3)) }).await.unwrap();
    clock.advance(TTL + Duration::from_secs(1));
    let calls = Arc::new(AtomicU32::new(0));

    let tasks = (0..3).map(|_| {
      let layer = layer.clone();
      let calls = Arc::clone(&calls);
      async move {
        layer
          .fetch("k", false, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(UpstreamError::status(503, "unavailable"))
          })
          .await
      }
    });
    let results = futures::future::join_all(tasks).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
      let result = result.unwrap();
      assert_eq!(result.total_count, 3);
      assert!(result.metadata.from_cache);
      assert!(result.metadata.rate_limited);
    }
  }

  #[tokio::test]
  async fn test_waiters_on_non_transient_failure_share_the_error() {
    let (layer, _clock) = layer();
    let calls = Arc::new(AtomicU32::new(0));

    let tasks = (0..3).map(|_| {
      let layer = layer.clone();
      let calls = Arc::clone(&calls);
      async move {
        layer
          .fetch("k", false, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(UpstreamError::status(404, "not found"))
          })
          .await
      }
    });
    let results = futures::future::join_all(tasks).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
      assert_eq!(result.unwrap_err().http_status(), 404);
    }
  }

  #[tokio::test]
  async fn test_sequential_call_after_failure_fetches_again() {
    let (layer, _clock) = layer();

    layer
      .fetch("k", false, || async { Err(UpstreamError::status(503, "down")) })
      .await
      .unwrap();
    let result = layer
      .fetch("k", false, || async { Ok(listing(2)) })
      .await
      .unwrap();

    assert!(!result.metadata.from_cache);
    assert_eq!(result.total_count, 2);
  }

  #[tokio::test]
  async fn test_keys_do_not_block_each_other() {
    let (layer, _clock) = layer();
    let calls = Arc::new(AtomicU32::new(0));

    let tasks = ["a", "b"].into_iter().map(|key| {
      let layer = layer.clone();
      let calls = Arc::clone(&calls);
      async move {
        layer
          .fetch(key, false, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(listing(1))
          })
          .await
      }
    });
    futures::future::join_all(tasks).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }
}
