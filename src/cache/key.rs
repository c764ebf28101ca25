//! Cache keys: a resource namespace followed by identifiers and filter objects.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::AppError;

/// Fingerprint of a cached resource.
///
/// Every segment is kept in a canonical JSON form with object keys sorted, so
/// two keys built from `{"a":1,"b":2}` and `{"b":2,"a":1}` compare and hash equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
  segments: Vec<String>,
}

impl CacheKey {
  /// Start a key with the resource namespace (e.g. "users").
  pub fn new(namespace: &str) -> Self {
    Self {
      segments: vec![canonical_json(&Value::from(namespace))],
    }
  }

  /// Append a plain string segment such as "list" or an entity id.
  pub fn segment(mut self, segment: &str) -> Self {
    self.segments.push(canonical_json(&Value::from(segment)));
    self
  }

  /// Append a numeric identifier.
  pub fn id(mut self, id: u64) -> Self {
    self.segments.push(canonical_json(&Value::from(id)));
    self
  }

  /// Append any serializable filter object.
  ///
  /// Fails with a validation error when the value has no stable JSON form,
  /// e.g. a map with non-string keys.
  pub fn with<S: Serialize + ?Sized>(mut self, part: &S) -> Result<Self, AppError> {
    let value = serde_json::to_value(part)
      .map_err(|e| AppError::validation(format!("cache key segment is not serializable: {}", e)))?;
    self.segments.push(canonical_json(&value));
    Ok(self)
  }

  /// Rebuild a key from the output of [`CacheKey::canonical`].
  pub fn from_canonical(text: &str) -> Result<Self, AppError> {
    let parts: Vec<Value> = serde_json::from_str(text)
      .map_err(|e| AppError::validation(format!("invalid cache key '{}': {}", text, e)))?;
    if parts.is_empty() {
      return Err(AppError::validation("cache key has no namespace"));
    }
    Ok(Self {
      segments: parts.iter().map(canonical_json).collect(),
    })
  }

  /// The first segment.
  pub fn namespace(&self) -> String {
    self
      .segments
      .first()
      .and_then(|s| serde_json::from_str::<String>(s).ok())
      .unwrap_or_default()
  }

  pub fn len(&self) -> usize {
    self.segments.len()
  }

  pub fn is_empty(&self) -> bool {
    self.segments.is_empty()
  }

  /// Whether `prefix`'s segments are the leading segments of this key.
  pub fn starts_with(&self, prefix: &CacheKey) -> bool {
    self.segments.starts_with(&prefix.segments)
  }

  /// Serialized form: a JSON array of the canonical segments.
  pub fn canonical(&self) -> String {
    format!("[{}]", self.segments.join(","))
  }

  /// SHA-256 hex digest of the canonical form, for fixed-length storage keys.
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.canonical().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.canonical())
  }
}

/// Serialize with object keys in sorted order, independent of map ordering.
fn canonical_json(value: &Value) -> String {
  let mut out = String::new();
  write_canonical(value, &mut out);
  out
}

fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut fields: Vec<(&String, &Value)> = map.iter().collect();
      fields.sort_by(|a, b| a.0.cmp(b.0));
      out.push('{');
      for (i, (name, field)) in fields.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&Value::from(name.as_str()).to_string());
        out.push(':');
        write_canonical(field, out);
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    scalar => out.push_str(&scalar.to_string()),
  }
}
