//! Entry and envelope types shared by the cache storage and layer.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::time::Duration;

/// A list payload together with the total the upstream reported for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
  pub items: Vec<Value>,
  pub total_count: u64,
}

impl Listing {
  pub fn new(items: Vec<Value>, total_count: u64) -> Self {
    Self { items, total_count }
  }
}

/// A cached listing with the moment it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  /// The cached data
  pub data: Listing,
  /// When the data was fetched and stored
  pub stored_at: DateTime<Utc>,
  /// Whether the entry has been served in place of a failed refresh
  pub rate_limited: bool,
}

impl CacheEntry {
  /// Age of the entry at `now`, clamped at zero.
  pub fn age(&self, now: DateTime<Utc>) -> Duration {
    (now - self.stored_at).to_std().unwrap_or(Duration::ZERO)
  }
}

/// How a [`FetchResult`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchMetadata {
  /// Served from the cache rather than a fetch made for this request
  pub from_cache: bool,
  /// Served because the upstream failed transiently
  pub rate_limited: bool,
  /// Age of the served data, in milliseconds on the wire
  #[serde(serialize_with = "serialize_millis")]
  pub cache_age: Duration,
}

/// The envelope every resource operation returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResult {
  #[serde(rename = "data")]
  pub items: Vec<Value>,
  pub total_count: u64,
  pub metadata: FetchMetadata,
}

impl FetchResult {
  /// Data fetched from the upstream for this request.
  pub fn from_network(data: Listing) -> Self {
    Self {
      items: data.items,
      total_count: data.total_count,
      metadata: FetchMetadata {
        from_cache: false,
        rate_limited: false,
        cache_age: Duration::ZERO,
      },
    }
  }

  /// Data served from the cache.
  pub fn from_cache(entry: CacheEntry, now: DateTime<Utc>, rate_limited: bool) -> Self {
    let cache_age = entry.age(now);
    Self {
      items: entry.data.items,
      total_count: entry.data.total_count,
      metadata: FetchMetadata {
        from_cache: true,
        rate_limited,
        cache_age,
      },
    }
  }

  /// Nothing cached and the upstream is unhealthy.
  pub fn empty_rate_limited() -> Self {
    Self {
      items: Vec::new(),
      total_count: 0,
      metadata: FetchMetadata {
        from_cache: false,
        rate_limited: true,
        cache_age: Duration::ZERO,
      },
    }
  }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
  let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
  serializer.serialize_u64(millis)
}
