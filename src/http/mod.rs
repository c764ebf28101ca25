//! HTTP access to the REST backend.

mod client;
mod envelope;

pub use client::{RequestBody, ResourceClient};
pub use envelope::{normalize_list, ListEnvelope, Pagination};
