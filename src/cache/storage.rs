//! Cache storage trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::Clock;

use super::types::{CacheEntry, Listing};

/// Trait for cache storage backends.
///
/// A key maps to at most one entry and writes replace the whole entry.
pub trait CacheStorage: Send + Sync {
  /// Get the entry stored under `key`, whatever its age.
  fn get(&self, key: &str) -> Option<CacheEntry>;

  /// Replace the entry under `key` with `entry` as given.
  fn put(&self, key: &str, entry: CacheEntry);

  /// Source of the timestamps this storage stamps and compares against.
  fn clock(&self) -> &dyn Clock;

  /// Store `data` under `key`, stamped with the current time.
  fn set(&self, key: &str, data: Listing, rate_limited: bool) -> CacheEntry {
    let entry = CacheEntry {
      data,
      stored_at: self.clock().now(),
      rate_limited,
    };
    self.put(key, entry.clone());
    entry
  }

  /// Whether an entry exists for `key` and is younger than `ttl`.
  fn is_fresh(&self, key: &str, ttl: Duration) -> bool {
    self
      .get(key)
      .is_some_and(|entry| entry.age(self.clock().now()) < ttl)
  }
}

/// Process-lifetime storage backed by a mutex-guarded map.
///
/// Nothing is ever evicted; the set of resource keys is small and fixed in
/// practice, so growth is bounded by the number of distinct lawsuits queried.
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, CacheEntry>>,
  clock: Arc<dyn Clock>,
}

impl MemoryStorage {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      clock,
    }
  }

  /// Number of keys currently cached.
  pub fn len(&self) -> usize {
    self.entries().len()
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    // Every write is a single insert, so a poisoned map is still consistent.
    self
      .entries
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner)
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, key: &str) -> Option<CacheEntry> {
    self.entries().get(key).cloned()
  }

  fn put(&self, key: &str, entry: CacheEntry) {
    self.entries().insert(key.to_string(), entry);
  }

  fn clock(&self) -> &dyn Clock {
    self.clock.as_ref()
  }
}
