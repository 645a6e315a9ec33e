//! Exhaustive pagination over a list endpoint.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::ProgressTracker;
use crate::clock::Sleeper;
use crate::error::UpstreamError;

use super::api_types::Envelope;

/// Limits and pacing for a crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlOptions {
  /// Items requested per page
  pub page_size: u32,
  /// Hard cap on pages fetched, whatever the upstream claims
  pub max_pages: u32,
  /// Pause between consecutive pages
  pub delay: Duration,
}

impl Default for CrawlOptions {
  fn default() -> Self {
    Self {
      page_size: 1000,
      max_pages: 100,
      delay: Duration::from_millis(1500),
    }
  }
}

/// Everything a completed crawl collected.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlOutcome {
  pub items: Vec<Value>,
  pub total_count: u64,
  pub pages: u32,
}

/// Fetches every page of a resource, reporting progress after each one.
#[derive(Clone)]
pub struct Crawler {
  options: CrawlOptions,
  sleeper: Arc<dyn Sleeper>,
  progress: ProgressTracker,
}

impl Crawler {
  pub fn new(options: CrawlOptions, sleeper: Arc<dyn Sleeper>, progress: ProgressTracker) -> Self {
    Self {
      options,
      sleeper,
      progress,
    }
  }

  pub fn options(&self) -> CrawlOptions {
    self.options
  }

  /// Crawl from page 1 until the resource is exhausted.
  ///
  /// `fetch_page` receives the 1-based page number and the page size. The
  /// crawl stops on an empty page, a short page, once the upstream-reported
  /// total is reached, or at `max_pages`. An error marks the progress for
  /// `key` as failed and is returned as is.
  pub async fn crawl<F, Fut>(&self, key: &str, fetch_page: F) -> Result<CrawlOutcome, UpstreamError>
  where
    F: Fn(u32, u32) -> Fut,
    Fut: Future<Output = Result<Value, UpstreamError>>,
  {
    let page_size = self.options.page_size.max(1);
    let mut items: Vec<Value> = Vec::new();
    let mut reported_total: Option<u64> = None;
    let mut pages = 0u32;

    self.progress.start(key);
    info!(key, page_size, "starting crawl");

    loop {
      let page = pages + 1;
      if page > self.options.max_pages {
        warn!(key, max_pages = self.options.max_pages, "page cap reached, stopping crawl");
        break;
      }
      if page > 1 {
        self.sleeper.sleep(self.options.delay).await;
      }

      let value = match fetch_page(page, page_size).await {
        Ok(value) => value,
        Err(err) => {
          warn!(key, page, error = %err, "crawl failed");
          self.progress.fail(key, err.to_string());
          return Err(err);
        }
      };
      pages = page;

      let envelope = Envelope::decode(value);
      if let Some(total) = envelope.reported_total() {
        reported_total = Some(total);
      }
      let batch = envelope.into_page(0).items;
      let batch_len = batch.len();
      items.extend(batch);

      let message = match reported_total {
        Some(total) => format!("{} of {} items (page {})", items.len(), total, page),
        None => format!("{} items (page {})", items.len(), page),
      };
      debug!(key, page, batch_len, "{message}");
      self.progress.update(key, message);

      if batch_len == 0 || batch_len < page_size as usize {
        break;
      }
      if reported_total.is_some_and(|total| items.len() as u64 >= total) {
        break;
      }
    }

    let total_count = reported_total.unwrap_or(items.len() as u64);
    info!(key, items = items.len(), total_count, pages, "crawl complete");
    self.progress.finish(
      key,
      format!("Completed: {} items in {} pages", items.len(), pages),
    );

    Ok(CrawlOutcome {
      items,
      total_count,
      pages,
    })
  }
}
