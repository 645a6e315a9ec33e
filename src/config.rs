use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::legal::{CrawlOptions, RetryPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub upstream: UpstreamConfig,
  #[serde(default)]
  pub crawl: CrawlConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub settings: SettingsConfig,
  #[serde(default)]
  pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
  /// API root, e.g. https://api.example.com/v2
  pub base_url: String,
  /// List endpoint for lawsuits
  pub lawsuits_path: String,
  /// Movements endpoint; `{id}` is replaced by the lawsuit id
  pub movements_path: String,
  pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
  fn default() -> Self {
    Self {
      base_url: String::new(),
      lawsuits_path: "/lawsuits".to_string(),
      movements_path: "/lawsuits/{id}/movements".to_string(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
  pub page_size: u32,
  pub max_pages: u32,
}

impl Default for CrawlConfig {
  fn default() -> Self {
    let options = CrawlOptions::default();
    Self {
      page_size: options.page_size,
      max_pages: options.max_pages,
    }
  }
}

impl CrawlConfig {
  /// Crawl options before the delay from the settings store is applied.
  pub fn options(&self) -> CrawlOptions {
    CrawlOptions {
      page_size: self.page_size.max(1),
      max_pages: self.max_pages.max(1),
      ..CrawlOptions::default()
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  /// Attempts per request on HTTP 429, the first one included
  pub max_attempts: u32,
  pub base_delay_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    let policy = RetryPolicy::default();
    Self {
      max_attempts: policy.max_attempts,
      base_delay_ms: policy.base_delay.as_millis() as u64,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsConfig {
  /// SQLite settings database (default: $XDG_DATA_HOME/casemirror/settings.db)
  pub database: Option<PathBuf>,
}

impl SettingsConfig {
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("casemirror").join("settings.db"))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub bind: String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      bind: "127.0.0.1:8787".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./casemirror.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/casemirror/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/casemirror/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("casemirror.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("casemirror").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.upstream.base_url.trim().is_empty() {
      return Err(eyre!("upstream.base_url is required"));
    }
    Ok(config)
  }

  /// Get the upstream API token from environment variables.
  ///
  /// Checks CASEMIRROR_API_TOKEN first, then LEGAL_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("CASEMIRROR_API_TOKEN")
      .or_else(|_| std::env::var("LEGAL_API_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set CASEMIRROR_API_TOKEN or LEGAL_API_TOKEN environment variable.")
      })
  }
}
