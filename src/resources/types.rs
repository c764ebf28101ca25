//! Serde models for the backend's resources.

use serde::{Deserialize, Serialize};

/// Dashboard user account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: u64,
  pub username: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub is_active: bool,
  #[serde(default)]
  pub groups: Vec<String>,
  #[serde(default, alias = "mainCharacter")]
  pub main_character: Option<String>,
}

/// Partial update of a user; only set fields are sent
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserPatch {
  #[serde(skip)]
  pub id: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub is_active: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub groups: Option<Vec<String>>,
}

impl UserPatch {
  pub fn apply_to(&self, user: &mut User) {
    if user.id != self.id {
      return;
    }
    if let Some(email) = &self.email {
      user.email = Some(email.clone());
    }
    if let Some(is_active) = self.is_active {
      user.is_active = is_active;
    }
    if let Some(groups) = &self.groups {
      user.groups = groups.clone();
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub permissions: Vec<String>,
  #[serde(default)]
  pub member_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
  pub id: u64,
  pub name: String,
  pub codename: String,
  #[serde(default)]
  pub description: Option<String>,
}

/// EVE alliance, ordered by `position` in the admin view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alliance {
  pub id: u64,
  pub name: String,
  pub ticker: String,
  #[serde(default)]
  pub position: u32,
  #[serde(default)]
  pub executor_corporation_id: Option<u64>,
}

/// EVE corporation, ordered by `position` in the admin view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Corporation {
  pub id: u64,
  pub name: String,
  pub ticker: String,
  #[serde(default)]
  pub alliance_id: Option<u64>,
  #[serde(default)]
  pub member_count: Option<u32>,
  #[serde(default)]
  pub position: u32,
}

/// Task registered with the remote scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerTask {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub schedule: Option<String>,
  #[serde(default)]
  pub enabled: bool,
  #[serde(default)]
  pub last_run: Option<String>,
  #[serde(default)]
  pub next_run: Option<String>,
}

/// Support ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
  pub id: String,
  pub subject: String,
  #[serde(default)]
  pub status: String,
  #[serde(default)]
  pub priority: Option<String>,
  #[serde(default)]
  pub requester: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTicket {
  pub subject: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
}

/// Response of DELETE endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
  pub success: bool,
}

impl Default for DeleteResponse {
  fn default() -> Self {
    Self { success: true }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KanbanTask {
  pub id: String,
  pub title: String,
  pub column: String,
  #[serde(default)]
  pub position: u32,
  #[serde(default)]
  pub assignee: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatContact {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub online: bool,
  #[serde(default)]
  pub unread: u32,
}
