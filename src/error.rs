//! Error taxonomy for calls against the upstream case-management API.

use std::sync::Arc;

use thiserror::Error;

/// Longest body excerpt kept on an error.
pub const EXCERPT_LEN: usize = 200;

/// Failure of an upstream call, classified for the fallback policy.
///
/// Cheap to clone, so one failed fetch can be handed to every caller that
/// waited on it.
#[derive(Error, Debug, Clone)]
pub enum UpstreamError {
  /// HTTP 429 on every attempt of the retry budget
  #[error("upstream rate limit persisted after {attempts} attempts")]
  RateLimited { attempts: u32 },

  /// Any other non-2xx status
  #[error("upstream returned HTTP {status}: {excerpt}")]
  Status { status: u16, excerpt: String },

  /// 2xx whose body is not JSON (gateway error pages and the like)
  #[error("malformed upstream response (HTTP {status}): {excerpt}")]
  Malformed { status: u16, excerpt: String },

  /// Transport failure: timeout, refused connection, TLS
  #[error("network error: {0}")]
  Network(#[source] Arc<reqwest::Error>),

  /// The request was invalid before it left the process
  #[error("invalid request: {0}")]
  InvalidRequest(String),

  #[error("invalid upstream url: {0}")]
  Url(#[from] url::ParseError),
}

impl From<reqwest::Error> for UpstreamError {
  fn from(err: reqwest::Error) -> Self {
    Self::Network(Arc::new(err))
  }
}

impl UpstreamError {
  /// Build a status error, keeping only a short excerpt of the body.
  pub fn status(status: u16, body: &str) -> Self {
    Self::Status {
      status,
      excerpt: excerpt(body),
    }
  }

  /// Build a malformed-response error from the offending body.
  pub fn malformed(status: u16, body: &str) -> Self {
    Self::Malformed {
      status,
      excerpt: excerpt(body),
    }
  }

  pub fn invalid(message: impl Into<String>) -> Self {
    Self::InvalidRequest(message.into())
  }

  /// Whether the failure is expected to clear on its own.
  ///
  /// Transient failures are answered with whatever the cache holds, or with an
  /// empty listing when it holds nothing.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::RateLimited { .. } | Self::Malformed { .. } | Self::Network(_) => true,
      Self::Status { status, .. } => *status >= 500,
      Self::InvalidRequest(_) | Self::Url(_) => false,
    }
  }

  /// Whether this is a rate-limit failure.
  pub fn is_rate_limit(&self) -> bool {
    matches!(self, Self::RateLimited { .. })
  }

  /// Status code to answer with when the error reaches an HTTP caller.
  pub fn http_status(&self) -> u16 {
    match self {
      Self::InvalidRequest(_) => 400,
      Self::Status { status, .. } if (400..500).contains(status) => *status,
      Self::RateLimited { .. } => 503,
      Self::Url(_) => 500,
      _ => 502,
    }
  }
}

fn excerpt(body: &str) -> String {
  let trimmed = body.trim();
  if trimmed.chars().count() <= EXCERPT_LEN {
    return trimmed.to_string();
  }
  let mut cut: String = trimmed.chars().take(EXCERPT_LEN).collect();
  cut.push('…');
  cut
}
