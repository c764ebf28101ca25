//! Serde types for the list response shapes the backend uses.
//!
//! Endpoints are inconsistent: some wrap lists in `{"data": [...]}`, some in
//! `{"items": [...], "pagination": {...}}`, some return a bare array. All of
//! them are normalised to a plain `Vec<T>` before caching.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;

/// Page metadata sent alongside `items` by paginated endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Pagination {
  #[serde(default)]
  pub page: Option<u64>,
  #[serde(default, alias = "pageSize", alias = "page_size")]
  pub per_page: Option<u64>,
  #[serde(default, alias = "totalItems", alias = "total_items")]
  pub total: Option<u64>,
  #[serde(default, alias = "totalPages")]
  pub total_pages: Option<u64>,
}

/// Every list envelope shape the backend is known to produce.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListEnvelope<T> {
  Data {
    data: Vec<T>,
  },
  Items {
    items: Vec<T>,
    #[serde(default)]
    pagination: Option<Pagination>,
  },
  Bare(Vec<T>),
}

impl<T> ListEnvelope<T> {
  pub fn into_items(self) -> Vec<T> {
    match self {
      ListEnvelope::Data { data } => data,
      ListEnvelope::Items { items, .. } => items,
      ListEnvelope::Bare(items) => items,
    }
  }

  pub fn pagination(&self) -> Option<&Pagination> {
    match self {
      ListEnvelope::Items { pagination, .. } => pagination.as_ref(),
      _ => None,
    }
  }
}

/// Decode any supported list shape into a plain vector.
pub fn normalize_list<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, AppError> {
  serde_json::from_value::<ListEnvelope<T>>(value)
    .map(ListEnvelope::into_items)
    .map_err(|_| AppError::decode("response is not a list, {data: [..]} or {items: [..]}"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[derive(Debug, Deserialize, PartialEq)]
  struct Row {
    id: u32,
  }

  #[test]
  fn test_all_shapes_normalize() {
    let expected = vec![Row { id: 1 }, Row { id: 2 }];
    for body in [
      json!({"data": [{"id": 1}, {"id": 2}]}),
      json!({"items": [{"id": 1}, {"id": 2}], "pagination": {"page": 1, "total": 2}}),
      json!([{"id": 1}, {"id": 2}]),
    ] {
      assert_eq!(normalize_list::<Row>(body).unwrap(), expected);
    }
  }

  #[test]
  fn test_pagination_is_kept() {
    let envelope: ListEnvelope<Row> = serde_json::from_value(json!({
      "items": [],
      "pagination": {"page": 3, "pageSize": 25, "totalItems": 80}
    }))
    .unwrap();
    let pagination = envelope.pagination().unwrap();
    assert_eq!(pagination.page, Some(3));
    assert_eq!(pagination.per_page, Some(25));
    assert_eq!(pagination.total, Some(80));
  }

  #[test]
  fn test_rejects_non_list() {
    let err = normalize_list::<Row>(json!({"id": 1})).unwrap_err();
    assert_eq!(err.kind(), crate::error::ErrorKind::Decode);
  }
}
