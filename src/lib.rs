//! Client for the operations dashboard backend.
//!
//! Reads go through a keyed cache with in-flight de-duplication and retry;
//! writes apply optimistically and roll back exactly when the backend
//! rejects them.

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod mutation;
pub mod query;
pub mod resources;

pub use cache::{CacheKey, CacheStore, QueryStatus};
pub use config::Config;
pub use error::{AppError, ErrorKind};
pub use http::ResourceClient;
pub use mutation::Mutation;
pub use query::{QueryClient, QueryClientConfig, Revalidate};
pub use resources::OpsApi;
