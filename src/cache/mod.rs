//! Generic caching layer for upstream listings.
//!
//! This module knows nothing about the case-management API. It provides:
//! - A process-lifetime key → entry store with TTL freshness checks
//! - A layer that serves fresh entries, refreshes stale ones, and falls back
//!   to whatever is cached when a refresh fails
//! - Single-flight refreshes, so concurrent callers for one key share a fetch
//! - Per-key progress for long crawls

mod layer;
mod progress;
mod storage;
mod types;

pub use layer::CacheLayer;
pub use progress::{FetchProgress, ProgressTracker};
pub use storage::{CacheStorage, MemoryStorage};
pub use types::{CacheEntry, FetchMetadata, FetchResult, Listing};
