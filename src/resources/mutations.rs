//! Optimistic writes against the backend's resources.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::marker::PhantomData;
use tracing::warn;

use crate::cache::CacheKey;
use crate::error::AppError;
use crate::http::ResourceClient;
use crate::mutation::Mutation;

use super::catalog::Resource;
use super::types::{Alliance, Corporation, DeleteResponse, NewTicket, Ticket, User, UserPatch};

/// Remove a ticket; the list drops it immediately.
pub struct DeleteTicket {
  http: ResourceClient,
}

impl DeleteTicket {
  pub fn new(http: ResourceClient) -> Self {
    Self { http }
  }
}

#[async_trait]
impl Mutation for DeleteTicket {
  type Input = String;
  type Output = DeleteResponse;
  type CacheValue = Vec<Ticket>;

  fn affected_keys(&self, _id: &String) -> Vec<CacheKey> {
    vec![Resource::Tickets.list_key()]
  }

  async fn execute(&self, id: &String) -> Result<DeleteResponse, AppError> {
    let path = format!("{}/{}", Resource::Tickets.path(), id);
    let response: Option<DeleteResponse> = self.http.delete(&path).await?;
    Ok(response.unwrap_or_default())
  }

  fn apply_optimistic(
    &self,
    id: &String,
    _key: &CacheKey,
    current: Option<Vec<Ticket>>,
  ) -> Option<Vec<Ticket>> {
    let mut tickets = current?;
    tickets.retain(|t| &t.id != id);
    Some(tickets)
  }

  fn removed_keys(&self, id: &String, _output: &DeleteResponse) -> Vec<CacheKey> {
    vec![Resource::Tickets.detail_key(id)]
  }

  fn on_error(&self, id: &String, error: &AppError) {
    warn!(ticket = %id, error = %error, "ticket deletion reverted");
  }
}

/// Id shown for a ticket until the backend assigns one.
pub fn provisional_ticket_id(ticket: &NewTicket) -> String {
  format!("pending:{}", ticket.subject)
}

/// Open a ticket; a provisional entry is appended to the list until the
/// backend answers with the real one.
pub struct CreateTicket {
  http: ResourceClient,
}

impl CreateTicket {
  pub fn new(http: ResourceClient) -> Self {
    Self { http }
  }
}

#[async_trait]
impl Mutation for CreateTicket {
  type Input = NewTicket;
  type Output = Ticket;
  type CacheValue = Vec<Ticket>;

  fn affected_keys(&self, _input: &NewTicket) -> Vec<CacheKey> {
    vec![Resource::Tickets.list_key()]
  }

  async fn execute(&self, input: &NewTicket) -> Result<Ticket, AppError> {
    self.http.post(Resource::Tickets.path(), input).await
  }

  fn apply_optimistic(
    &self,
    input: &NewTicket,
    _key: &CacheKey,
    current: Option<Vec<Ticket>>,
  ) -> Option<Vec<Ticket>> {
    let mut tickets = current?;
    tickets.push(Ticket {
      id: provisional_ticket_id(input),
      subject: input.subject.clone(),
      status: "open".to_string(),
      priority: input.priority.clone(),
      requester: None,
      created_at: None,
    });
    Some(tickets)
  }

  fn reconcile(
    &self,
    input: &NewTicket,
    output: &Ticket,
    _key: &CacheKey,
    current: Option<Vec<Ticket>>,
  ) -> Option<Vec<Ticket>> {
    let mut tickets = current?;
    let provisional = provisional_ticket_id(input);
    match tickets.iter().position(|t| t.id == provisional) {
      Some(idx) => tickets[idx] = output.clone(),
      None if !tickets.iter().any(|t| t.id == output.id) => tickets.push(output.clone()),
      None => {}
    }
    Some(tickets)
  }
}

/// Cached shape under user keys: the list, or one user under a detail key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserCache {
  List(Vec<User>),
  One(User),
}

/// Patch a user in both the list and its detail entry.
pub struct UpdateUser {
  http: ResourceClient,
}

impl UpdateUser {
  pub fn new(http: ResourceClient) -> Self {
    Self { http }
  }
}

#[async_trait]
impl Mutation for UpdateUser {
  type Input = UserPatch;
  type Output = User;
  type CacheValue = UserCache;

  fn affected_keys(&self, patch: &UserPatch) -> Vec<CacheKey> {
    vec![
      Resource::Users.list_key(),
      Resource::Users.detail_key(&patch.id.to_string()),
    ]
  }

  async fn execute(&self, patch: &UserPatch) -> Result<User, AppError> {
    let path = format!("{}/{}", Resource::Users.path(), patch.id);
    self.http.patch(&path, patch).await
  }

  fn apply_optimistic(
    &self,
    patch: &UserPatch,
    _key: &CacheKey,
    current: Option<UserCache>,
  ) -> Option<UserCache> {
    match current? {
      UserCache::List(mut users) => {
        users.iter_mut().for_each(|u| patch.apply_to(u));
        Some(UserCache::List(users))
      }
      UserCache::One(mut user) => {
        patch.apply_to(&mut user);
        Some(UserCache::One(user))
      }
    }
  }

  fn reconcile(
    &self,
    _patch: &UserPatch,
    output: &User,
    _key: &CacheKey,
    current: Option<UserCache>,
  ) -> Option<UserCache> {
    match current? {
      UserCache::List(mut users) => {
        for user in users.iter_mut().filter(|u| u.id == output.id) {
          *user = output.clone();
        }
        Some(UserCache::List(users))
      }
      UserCache::One(_) => Some(UserCache::One(output.clone())),
    }
  }
}

/// A resource shown in a user-defined order.
pub trait Positioned: Serialize + DeserializeOwned + Send + Sync + 'static {
  const RESOURCE: Resource;

  fn id(&self) -> u64;
  fn set_position(&mut self, position: u32);
}

impl Positioned for Alliance {
  const RESOURCE: Resource = Resource::Alliances;

  fn id(&self) -> u64 {
    self.id
  }

  fn set_position(&mut self, position: u32) {
    self.position = position;
  }
}

impl Positioned for Corporation {
  const RESOURCE: Resource = Resource::Corporations;

  fn id(&self) -> u64 {
    self.id
  }

  fn set_position(&mut self, position: u32) {
    self.position = position;
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveTo {
  pub id: u64,
  pub position: usize,
}

/// Move the item at `from` to `to` (clamped), renumbering positions.
pub fn move_item<R: Positioned>(items: &mut Vec<R>, from: usize, to: usize) {
  if from >= items.len() {
    return;
  }
  let item = items.remove(from);
  let to = to.min(items.len());
  items.insert(to, item);
  for (idx, item) in items.iter_mut().enumerate() {
    item.set_position(idx as u32);
  }
}

/// Drag one alliance or corporation to a new place in the ordered list.
pub struct Reorder<R> {
  http: ResourceClient,
  _resource: PhantomData<fn() -> R>,
}

impl<R> Reorder<R> {
  pub fn new(http: ResourceClient) -> Self {
    Self {
      http,
      _resource: PhantomData,
    }
  }
}

#[async_trait]
impl<R: Positioned> Mutation for Reorder<R> {
  type Input = MoveTo;
  type Output = R;
  type CacheValue = Vec<R>;

  fn affected_keys(&self, _input: &MoveTo) -> Vec<CacheKey> {
    vec![R::RESOURCE.list_key()]
  }

  async fn execute(&self, input: &MoveTo) -> Result<R, AppError> {
    let path = format!("{}/{}/position", R::RESOURCE.path(), input.id);
    self.http.patch(&path, &json!({ "position": input.position })).await
  }

  fn apply_optimistic(&self, input: &MoveTo, _key: &CacheKey, current: Option<Vec<R>>) -> Option<Vec<R>> {
    let mut items = current?;
    let from = items.iter().position(|item| item.id() == input.id)?;
    move_item(&mut items, from, input.position);
    Some(items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  fn http() -> ResourceClient {
    ResourceClient::connect("http://127.0.0.1:9", None, "sessionid", Duration::from_secs(1)).unwrap()
  }

  fn ticket(id: &str) -> Ticket {
    Ticket {
      id: id.to_string(),
      subject: format!("subject {}", id),
      status: "open".to_string(),
      priority: None,
      requester: None,
      created_at: None,
    }
  }

  fn alliance(id: u64, position: u32) -> Alliance {
    Alliance {
      id,
      name: format!("alliance {}", id),
      ticker: format!("A{}", id),
      position,
      executor_corporation_id: None,
    }
  }

  #[test]
  fn test_delete_ticket_removes_only_target() {
    let mutation = DeleteTicket::new(http());
    let key = Resource::Tickets.list_key();
    let next = mutation
      .apply_optimistic(&"t1".to_string(), &key, Some(vec![ticket("t1"), ticket("t2")]))
      .unwrap();
    assert_eq!(next, vec![ticket("t2")]);
    assert!(mutation.apply_optimistic(&"t1".to_string(), &key, None).is_none());
  }

  #[test]
  fn test_create_ticket_reconciles_provisional_entry() {
    let mutation = CreateTicket::new(http());
    let key = Resource::Tickets.list_key();
    let input = NewTicket {
      subject: "broken jump bridge".to_string(),
      priority: Some("high".to_string()),
      body: None,
    };

    let optimistic = mutation
      .apply_optimistic(&input, &key, Some(vec![ticket("t1")]))
      .unwrap();
    assert_eq!(optimistic[1].id, "pending:broken jump bridge");

    let confirmed = Ticket {
      id: "t7".to_string(),
      ..optimistic[1].clone()
    };
    let reconciled = mutation
      .reconcile(&input, &confirmed, &key, Some(optimistic))
      .unwrap();
    assert_eq!(reconciled, vec![ticket("t1"), confirmed]);
  }

  #[test]
  fn test_update_user_patches_list_and_detail() {
    let mutation = UpdateUser::new(http());
    let user = User {
      id: 3,
      username: "ava".to_string(),
      email: None,
      is_active: true,
      groups: vec![],
      main_character: None,
    };
    let patch = UserPatch {
      id: 3,
      is_active: Some(false),
      ..Default::default()
    };

    let keys = mutation.affected_keys(&patch);
    let list = mutation.apply_optimistic(&patch, &keys[0], Some(UserCache::List(vec![user.clone()])));
    let one = mutation.apply_optimistic(&patch, &keys[1], Some(UserCache::One(user.clone())));

    let expected = User {
      is_active: false,
      ..user
    };
    assert_eq!(list, Some(UserCache::List(vec![expected.clone()])));
    assert_eq!(one, Some(UserCache::One(expected)));
  }

  #[test]
  fn test_user_cache_decodes_both_shapes() {
    let list: UserCache = serde_json::from_value(json!([{"id": 1, "username": "a"}])).unwrap();
    let one: UserCache = serde_json::from_value(json!({"id": 1, "username": "a"})).unwrap();
    assert!(matches!(list, UserCache::List(_)));
    assert!(matches!(one, UserCache::One(_)));
  }

  #[test]
  fn test_move_item_renumbers() {
    let mut items = vec![alliance(1, 0), alliance(2, 1), alliance(3, 2)];
    move_item(&mut items, 0, 2);
    let ids: Vec<u64> = items.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![2, 3, 1]);
    assert!(items.iter().enumerate().all(|(i, a)| a.position == i as u32));

    move_item(&mut items, 2, 99);
    assert_eq!(items.last().unwrap().id, 1);
  }

  #[test]
  fn test_reorder_unknown_id_leaves_list() {
    let mutation: Reorder<Alliance> = Reorder::new(http());
    let key = Resource::Alliances.list_key();
    let input = MoveTo { id: 42, position: 0 };
    assert!(mutation
      .apply_optimistic(&input, &key, Some(vec![alliance(1, 0)]))
      .is_none());
  }
}
