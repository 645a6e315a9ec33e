//! Mirror of the external legal case-management API.

pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod crawler;

pub use cached_client::CachedLegalClient;
pub use client::{LegalClient, RetryPolicy};
pub use crawler::CrawlOptions;
