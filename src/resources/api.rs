//! Cached access to the backend's resources.

use color_eyre::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::cache::SqliteStorage;
use crate::config::Config;
use crate::error::AppError;
use crate::http::ResourceClient;
use crate::query::{QueryClient, QueryOptions};

use super::catalog::Resource;
use super::mutations::{CreateTicket, DeleteTicket, MoveTo, Reorder, UpdateUser};
use super::types::{
  Alliance, ChatContact, Corporation, DeleteResponse, Group, KanbanTask, NewTicket, Permission,
  SchedulerTask, Ticket, User, UserPatch,
};

/// Resource client with transparent caching and optimistic writes.
///
/// Reads go through the [`QueryClient`], so concurrent reads of the same
/// resource share one request and fresh results are served from memory.
#[derive(Clone)]
pub struct OpsApi {
  http: ResourceClient,
  cache: QueryClient,
}

impl OpsApi {
  pub fn new(http: ResourceClient, cache: QueryClient) -> Self {
    Self { http, cache }
  }

  /// Build the HTTP client and cache from configuration, opening the on-disk
  /// cache when persistence is enabled.
  pub fn from_config(config: &Config) -> Result<Self> {
    let http = ResourceClient::new(config)?;
    let client_config = config.query_client_config();
    let cache = if config.cache.persist {
      QueryClient::with_storage(client_config, Arc::new(SqliteStorage::open()?))
    } else {
      QueryClient::new(client_config)
    };
    Ok(Self::new(http, cache))
  }

  pub fn http(&self) -> &ResourceClient {
    &self.http
  }

  pub fn cache(&self) -> &QueryClient {
    &self.cache
  }

  /// Full list of a resource.
  pub async fn list<T>(&self, resource: Resource) -> Result<Vec<T>, AppError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
  {
    let http = self.http.clone();
    let result = self
      .cache
      .query(
        &resource.list_key(),
        move || {
          let http = http.clone();
          async move { http.get_list::<T>(resource.path()).await }
        },
        QueryOptions::new(),
      )
      .await?;
    Ok(result.value)
  }

  /// One page of a paginated resource.
  pub async fn page<T>(&self, resource: Resource, page: u32) -> Result<Vec<T>, AppError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
  {
    let http = self.http.clone();
    let result = self
      .cache
      .query(
        &resource.page_key(page)?,
        move || {
          let http = http.clone();
          async move { http.get_list_with::<T, _>(resource.path(), &[("page", page)]).await }
        },
        QueryOptions::new(),
      )
      .await?;
    Ok(result.value)
  }

  pub async fn detail<T>(&self, resource: Resource, id: &str) -> Result<T, AppError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
  {
    let http = self.http.clone();
    let path = format!("{}/{}", resource.path(), id);
    let result = self
      .cache
      .query(
        &resource.detail_key(id),
        move || {
          let http = http.clone();
          let path = path.clone();
          async move { http.get::<T>(&path).await }
        },
        QueryOptions::new(),
      )
      .await?;
    Ok(result.value)
  }

  pub async fn users(&self, page: u32) -> Result<Vec<User>, AppError> {
    self.page(Resource::Users, page).await
  }

  pub async fn user(&self, id: u64) -> Result<User, AppError> {
    self.detail(Resource::Users, &id.to_string()).await
  }

  pub async fn groups(&self) -> Result<Vec<Group>, AppError> {
    self.list(Resource::Groups).await
  }

  pub async fn permissions(&self) -> Result<Vec<Permission>, AppError> {
    self.list(Resource::Permissions).await
  }

  pub async fn alliances(&self) -> Result<Vec<Alliance>, AppError> {
    self.list(Resource::Alliances).await
  }

  pub async fn corporations(&self) -> Result<Vec<Corporation>, AppError> {
    self.list(Resource::Corporations).await
  }

  pub async fn scheduler_tasks(&self) -> Result<Vec<SchedulerTask>, AppError> {
    self.list(Resource::Tasks).await
  }

  pub async fn tickets(&self) -> Result<Vec<Ticket>, AppError> {
    self.list(Resource::Tickets).await
  }

  pub async fn kanban_tasks(&self) -> Result<Vec<KanbanTask>, AppError> {
    self.list(Resource::Kanban).await
  }

  pub async fn contacts(&self) -> Result<Vec<ChatContact>, AppError> {
    self.list(Resource::Contacts).await
  }

  pub async fn create_ticket(&self, ticket: NewTicket) -> Result<Ticket, AppError> {
    self.cache.mutate(CreateTicket::new(self.http.clone()), ticket).await
  }

  pub async fn delete_ticket(&self, id: &str) -> Result<DeleteResponse, AppError> {
    self
      .cache
      .mutate(DeleteTicket::new(self.http.clone()), id.to_string())
      .await
  }

  /// Patch a user. Paged user lists are invalidated as well since the
  /// optimistic write only covers the full list and the detail entry.
  pub async fn update_user(&self, patch: UserPatch) -> Result<User, AppError> {
    let result = self.cache.mutate(UpdateUser::new(self.http.clone()), patch).await;
    self
      .cache
      .invalidate(&Resource::Users.all_key(), self.cache.config().revalidate);
    result
  }

  pub async fn move_alliance(&self, id: u64, position: usize) -> Result<Alliance, AppError> {
    self
      .cache
      .mutate(Reorder::<Alliance>::new(self.http.clone()), MoveTo { id, position })
      .await
  }

  pub async fn move_corporation(&self, id: u64, position: usize) -> Result<Corporation, AppError> {
    self
      .cache
      .mutate(Reorder::<Corporation>::new(self.http.clone()), MoveTo { id, position })
      .await
  }
}
