//! Tracing setup. Stdout carries command output, so logs go to a file.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "OPSDASH_LOG";
const DEFAULT_FILTER: &str = "opsdash=info";

/// Directory holding the daily log files.
pub fn log_dir() -> Option<PathBuf> {
  dirs::data_dir().map(|d| d.join("opsdash").join("logs"))
}

/// `OPSDASH_LOG`, then `RUST_LOG`, then the default.
fn env_filter(verbose: bool) -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV)
    .or_else(|_| EnvFilter::try_from_default_env())
    .unwrap_or_else(|_| {
      if verbose {
        EnvFilter::new("opsdash=debug")
      } else {
        EnvFilter::new(DEFAULT_FILTER)
      }
    })
}

/// Install the global subscriber writing to a daily-rolling file.
///
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn init(verbose: bool) -> Result<WorkerGuard> {
  let dir = log_dir().ok_or_else(|| eyre!("Could not determine data directory"))?;
  std::fs::create_dir_all(&dir)?;

  let appender = tracing_appender::rolling::daily(&dir, "opsdash.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(env_filter(verbose))
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}

/// Log to the test harness output. Safe to call from every test.
pub fn init_test() {
  let _ = tracing_subscriber::registry()
    .with(env_filter(false))
    .with(
      tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_test_writer()
        .compact(),
    )
    .try_init();
}
