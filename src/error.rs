//! Typed errors produced at the HTTP boundary and by the cache layer.

use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;

/// Broad classification of an [`AppError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// No response was received (connect failure, timeout, DNS). Status is 0.
  Transport,
  /// The backend answered 4xx. Never retried.
  Client,
  /// The backend answered 5xx.
  Server,
  /// A cache key could not be serialized into a stable form.
  Validation,
  /// A response or cached value did not match the requested type.
  Decode,
  /// A background task failed without producing a response.
  Internal,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ErrorKind::Transport => "transport error",
      ErrorKind::Client => "client error",
      ErrorKind::Server => "server error",
      ErrorKind::Validation => "validation error",
      ErrorKind::Decode => "decode error",
      ErrorKind::Internal => "internal error",
    };
    f.write_str(name)
  }
}

/// Error surfaced to callers of the HTTP client, queries and mutations.
///
/// Created once and never mutated afterwards; cache entries hold clones.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind} ({http_status}): {message}")]
pub struct AppError {
  http_status: u16,
  message: String,
  raw: Option<Value>,
  kind: ErrorKind,
}

impl AppError {
  /// A request that never got a response.
  pub fn transport(message: impl Into<String>) -> Self {
    Self {
      http_status: 0,
      message: message.into(),
      raw: None,
      kind: ErrorKind::Transport,
    }
  }

  /// A non-2xx response. Statuses outside 4xx/5xx are treated as client errors.
  pub fn from_status(status: u16, message: impl Into<String>, raw: Option<Value>) -> Self {
    let kind = match status {
      500..=599 => ErrorKind::Server,
      _ => ErrorKind::Client,
    };
    Self {
      http_status: status,
      message: message.into(),
      raw,
      kind,
    }
  }

  pub fn validation(message: impl Into<String>) -> Self {
    Self {
      http_status: 0,
      message: message.into(),
      raw: None,
      kind: ErrorKind::Validation,
    }
  }

  pub fn decode(message: impl Into<String>) -> Self {
    Self {
      http_status: 0,
      message: message.into(),
      raw: None,
      kind: ErrorKind::Decode,
    }
  }

  pub fn internal(message: impl Into<String>) -> Self {
    Self {
      http_status: 0,
      message: message.into(),
      raw: None,
      kind: ErrorKind::Internal,
    }
  }

  pub fn http_status(&self) -> u16 {
    self.http_status
  }

  pub fn message(&self) -> &str {
    &self.message
  }

  /// Parsed error body, if the backend sent JSON.
  pub fn raw(&self) -> Option<&Value> {
    self.raw.as_ref()
  }

  pub fn kind(&self) -> ErrorKind {
    self.kind
  }

  pub fn is_client_error(&self) -> bool {
    self.kind == ErrorKind::Client
  }

  /// Whether retrying the same request could plausibly succeed.
  pub fn is_transient(&self) -> bool {
    matches!(self.kind, ErrorKind::Transport | ErrorKind::Server)
  }

  /// Build an error from a non-2xx response body.
  ///
  /// Uses the `message`, `detail` or `error` field of a JSON body when present,
  /// otherwise the status reason phrase.
  pub fn from_response(status: StatusCode, body: &[u8]) -> Self {
    let raw: Option<Value> = serde_json::from_slice(body).ok();
    let message = raw
      .as_ref()
      .and_then(extract_message)
      .unwrap_or_else(|| {
        status
          .canonical_reason()
          .map(String::from)
          .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
      });
    Self::from_status(status.as_u16(), message, raw)
  }
}

fn extract_message(body: &Value) -> Option<String> {
  ["message", "detail", "error"]
    .iter()
    .find_map(|field| body.get(field).and_then(Value::as_str))
    .map(String::from)
}

impl From<serde_json::Error> for AppError {
  fn from(err: serde_json::Error) -> Self {
    Self::decode(err.to_string())
  }
}
