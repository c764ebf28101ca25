use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::query::{QueryClientConfig, Revalidate, RetryPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// Base URL of the REST API, e.g. "https://auth.example.org/api/"
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Name of the session cookie the backend authenticates with
  #[serde(default = "default_session_cookie")]
  pub session_cookie: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// How long fetched data counts as fresh
  #[serde(default = "default_stale_after_secs")]
  pub stale_after_secs: u64,
  /// Whether mutations refetch affected queries right away or on next read
  #[serde(default)]
  pub revalidate: Revalidate,
  /// Keep confirmed results on disk for an offline start
  #[serde(default = "default_true")]
  pub persist: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_after_secs: default_stale_after_secs(),
      revalidate: Revalidate::default(),
      persist: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
  /// Total attempts for transient failures, including the first one
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  #[serde(default = "default_base_delay_ms")]
  pub base_delay_ms: u64,
  #[serde(default = "default_max_delay_ms")]
  pub max_delay_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: default_max_attempts(),
      base_delay_ms: default_base_delay_ms(),
      max_delay_ms: default_max_delay_ms(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_session_cookie() -> String {
  "sessionid".to_string()
}

fn default_stale_after_secs() -> u64 {
  300
}

fn default_true() -> bool {
  true
}

fn default_max_attempts() -> u32 {
  3
}

fn default_base_delay_ms() -> u64 {
  1_000
}

fn default_max_delay_ms() -> u64 {
  30_000
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./opsdash.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/opsdash/config.yaml
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
        "No configuration file found. Create one at ~/.config/opsdash/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("opsdash.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("opsdash").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the session cookie value from environment variables.
  ///
  /// Checks OPSDASH_SESSION first, then SESSIONID as fallback.
  pub fn get_session() -> Result<String> {
    std::env::var("OPSDASH_SESSION")
      .or_else(|_| std::env::var("SESSIONID"))
      .map_err(|_| {
        eyre!("Session cookie not found. Set OPSDASH_SESSION or SESSIONID environment variable.")
      })
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.backend.timeout_secs)
  }

  /// Cache and retry settings for a [`crate::query::QueryClient`].
  pub fn query_client_config(&self) -> QueryClientConfig {
    let retry = RetryPolicy::new(self.retry.max_attempts).with_backoff(
      Duration::from_millis(self.retry.base_delay_ms),
      Duration::from_millis(self.retry.max_delay_ms),
    );
    QueryClientConfig {
      stale_after: Duration::from_secs(self.cache.stale_after_secs),
      retry,
      revalidate: self.cache.revalidate,
    }
  }
}
