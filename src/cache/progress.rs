//! Crawl progress, kept per resource key for callers to poll.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::Clock;

/// State of the latest crawl for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchProgress {
  pub in_progress: bool,
  pub started_at: DateTime<Utc>,
  /// Human-readable progress, e.g. "2000 of 2450 items (page 2)"
  pub progress_message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

/// Key → progress map shared between the crawler and status queries.
///
/// Each update overwrites the previous state for the key. It does not stop
/// two crawls of the same key from interleaving their updates.
#[derive(Clone)]
pub struct ProgressTracker {
  entries: Arc<Mutex<HashMap<String, FetchProgress>>>,
  clock: Arc<dyn Clock>,
}

impl ProgressTracker {
  pub fn new(clock: Arc<dyn Clock>) -> Self {
    Self {
      entries: Arc::new(Mutex::new(HashMap::new())),
      clock,
    }
  }

  /// Record that a crawl of `key` has begun.
  pub fn start(&self, key: &str) {
    let progress = FetchProgress {
      in_progress: true,
      started_at: self.clock.now(),
      progress_message: "Starting".to_string(),
      error: None,
    };
    self.entries().insert(key.to_string(), progress);
  }

  /// Replace the progress message of a running crawl.
  pub fn update(&self, key: &str, message: impl Into<String>) {
    let message = message.into();
    let started_at = self.clock.now();
    self
      .entries()
      .entry(key.to_string())
      .and_modify(|p| p.progress_message.clone_from(&message))
      .or_insert_with(|| FetchProgress {
        in_progress: true,
        started_at,
        progress_message: message,
        error: None,
      });
  }

  /// Mark the crawl of `key` as completed.
  pub fn finish(&self, key: &str, message: impl Into<String>) {
    self.close(key, message.into(), None);
  }

  /// Mark the crawl of `key` as stopped by an error.
  pub fn fail(&self, key: &str, error: impl Into<String>) {
    let error = error.into();
    self.close(key, format!("Failed: {error}"), Some(error));
  }

  /// Current state for `key`, if a crawl was ever started for it.
  pub fn get(&self, key: &str) -> Option<FetchProgress> {
    self.entries().get(key).cloned()
  }

  fn close(&self, key: &str, message: String, error: Option<String>) {
    let now = self.clock.now();
    let mut entries = self.entries();
    let progress = entries.entry(key.to_string()).or_insert_with(|| FetchProgress {
      in_progress: false,
      started_at: now,
      progress_message: String::new(),
      error: None,
    });
    progress.in_progress = false;
    progress.progress_message = message;
    progress.error = error;
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, FetchProgress>> {
    self
      .entries
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner)
  }
}
