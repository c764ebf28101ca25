//! The operations backend's resources: names, models, cached reads and
//! optimistic writes.

mod api;
pub mod catalog;
mod mutations;
mod types;

pub use api::OpsApi;
pub use catalog::{get_suggestions, lookup, Resource, ResourceInfo, RESOURCES};
pub use mutations::{
  move_item, provisional_ticket_id, CreateTicket, DeleteTicket, MoveTo, Positioned, Reorder,
  UpdateUser, UserCache,
};
pub use types::{
  Alliance, ChatContact, Corporation, DeleteResponse, Group, KanbanTask, NewTicket, Permission,
  SchedulerTask, Ticket, User, UserPatch,
};
