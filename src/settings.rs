//! Tunable parameters read once at startup from the settings database.
//!
//! The settings store is owned by the office's admin tooling; this process
//! only reads it. Nothing here is fatal: an unreachable database or a bad
//! value falls back to the built-in default for that parameter.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const CACHE_TTL_KEY: &str = "cache_ttl_minutes";
const DELAY_KEY: &str = "delay_between_requests_ms";

/// Process-wide parameters, immutable once loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
  /// How long a cached resource is served without refetching
  pub cache_ttl: Duration,
  /// Pause between consecutive page requests of a crawl
  pub inter_request_delay: Duration,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      cache_ttl: Duration::from_secs(5 * 60),
      inter_request_delay: Duration::from_millis(1500),
    }
  }
}

/// Somewhere settings can be read from by name.
pub trait SettingsSource {
  /// Raw value for `key`, or `None` when the store has no such row.
  fn read(&self, key: &str) -> Result<Option<String>>;
}

/// Read-only view of the SQLite settings database.
pub struct SqliteSettings {
  conn: Connection,
}

impl SqliteSettings {
  /// Open an existing settings database without creating or migrating it.
  pub fn open(path: &Path) -> Result<Self> {
    let conn = Connection::open_with_flags(
      path,
      OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| eyre!("Failed to open settings database at {}: {}", path.display(), e))?;

    Ok(Self { conn })
  }
}

impl SettingsSource for SqliteSettings {
  fn read(&self, key: &str) -> Result<Option<String>> {
    self
      .conn
      .query_row(
        "SELECT value FROM app_settings WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read setting {}: {}", key, e))
  }
}

/// Load settings from `source`, falling back per parameter to the defaults.
pub fn load(source: &dyn SettingsSource) -> Settings {
  let defaults = Settings::default();

  let settings = Settings {
    cache_ttl: read_or(source, CACHE_TTL_KEY, defaults.cache_ttl, |minutes| {
      Duration::from_secs(minutes.saturating_mul(60))
    }),
    inter_request_delay: read_or(
      source,
      DELAY_KEY,
      defaults.inter_request_delay,
      Duration::from_millis,
    ),
  };

  info!(
    cache_ttl_secs = settings.cache_ttl.as_secs(),
    delay_ms = settings.inter_request_delay.as_millis() as u64,
    "settings loaded"
  );
  settings
}

/// Open the database at `path` and load settings from it, or use the
/// defaults when it cannot be opened.
pub fn load_from_path(path: &Path) -> Settings {
  match SqliteSettings::open(path) {
    Ok(store) => load(&store),
    Err(e) => {
      warn!(error = %e, "settings store unavailable, using defaults");
      Settings::default()
    }
  }
}

fn read_or(
  source: &dyn SettingsSource,
  key: &str,
  default: Duration,
  convert: impl Fn(u64) -> Duration,
) -> Duration {
  match source.read(key) {
    Ok(Some(raw)) => match raw.trim().parse::<u64>() {
      Ok(value) => convert(value),
      Err(_) => {
        warn!(key, value = %raw, "unparsable setting, using default");
        default
      }
    },
    Ok(None) => {
      warn!(key, "setting missing, using default");
      default
    }
    Err(e) => {
      warn!(key, error = %e, "failed to read setting, using default");
      default
    }
  }
}
