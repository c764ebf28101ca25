//! Known backend resources, their cache namespaces and name lookup.

use crate::cache::CacheKey;
use crate::error::AppError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
  Users,
  Groups,
  Permissions,
  Alliances,
  Corporations,
  Tasks,
  Tickets,
  Kanban,
  Contacts,
}

#[derive(Serialize)]
struct PageFilter {
  page: u32,
}

impl Resource {
  /// First segment of every cache key for this resource.
  pub fn namespace(self) -> &'static str {
    match self {
      Resource::Users => "users",
      Resource::Groups => "groups",
      Resource::Permissions => "permissions",
      Resource::Alliances => "alliances",
      Resource::Corporations => "corporations",
      Resource::Tasks => "tasks",
      Resource::Tickets => "tickets",
      Resource::Kanban => "kanban",
      Resource::Contacts => "contacts",
    }
  }

  /// Endpoint path relative to the backend base URL.
  pub fn path(self) -> &'static str {
    match self {
      Resource::Users => "users",
      Resource::Groups => "groups",
      Resource::Permissions => "permissions",
      Resource::Alliances => "alliances",
      Resource::Corporations => "corporations",
      Resource::Tasks => "scheduler/tasks",
      Resource::Tickets => "support/tickets",
      Resource::Kanban => "kanban/tasks",
      Resource::Contacts => "chat/contacts",
    }
  }

  /// Prefix covering every key of this resource.
  pub fn all_key(self) -> CacheKey {
    CacheKey::new(self.namespace())
  }

  pub fn list_key(self) -> CacheKey {
    self.all_key().segment("list")
  }

  pub fn page_key(self, page: u32) -> Result<CacheKey, AppError> {
    self.all_key().with(&PageFilter { page })
  }

  pub fn detail_key(self, id: &str) -> CacheKey {
    self.all_key().segment("detail").segment(id)
  }
}

#[derive(Debug, Clone)]
pub struct ResourceInfo {
  pub resource: Resource,
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All resources reachable from the command line
pub const RESOURCES: &[ResourceInfo] = &[
  ResourceInfo {
    resource: Resource::Users,
    name: "users",
    aliases: &["u", "user"],
    description: "Dashboard user accounts",
  },
  ResourceInfo {
    resource: Resource::Groups,
    name: "groups",
    aliases: &["g", "group"],
    description: "Permission groups",
  },
  ResourceInfo {
    resource: Resource::Permissions,
    name: "permissions",
    aliases: &["p", "perm", "perms"],
    description: "Permission definitions",
  },
  ResourceInfo {
    resource: Resource::Alliances,
    name: "alliances",
    aliases: &["a", "alliance"],
    description: "Tracked alliances",
  },
  ResourceInfo {
    resource: Resource::Corporations,
    name: "corporations",
    aliases: &["c", "corp", "corps"],
    description: "Tracked corporations",
  },
  ResourceInfo {
    resource: Resource::Tasks,
    name: "tasks",
    aliases: &["t", "scheduler", "jobs"],
    description: "Scheduler tasks",
  },
  ResourceInfo {
    resource: Resource::Tickets,
    name: "tickets",
    aliases: &["tix", "support"],
    description: "Support tickets",
  },
  ResourceInfo {
    resource: Resource::Kanban,
    name: "kanban",
    aliases: &["k", "board"],
    description: "Kanban board tasks",
  },
  ResourceInfo {
    resource: Resource::Contacts,
    name: "contacts",
    aliases: &["chat"],
    description: "Chat contacts",
  },
];

/// Ranked matches, best first. Rank 0-3 are exact or prefix matches.
fn ranked(input: &str) -> Vec<(&'static ResourceInfo, u32)> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return RESOURCES.iter().map(|r| (r, 0)).collect();
  }

  let mut matches: Vec<(&ResourceInfo, u32)> = Vec::new();

  for info in RESOURCES {
    if info.name == input_lower {
      matches.push((info, 0));
    } else if info.aliases.contains(&input_lower.as_str()) {
      matches.push((info, 1));
    } else if info.name.starts_with(&input_lower) {
      matches.push((info, 2));
    } else if info.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((info, 3));
    } else if info.name.contains(&input_lower) {
      matches.push((info, 4));
    } else if info.aliases.iter().any(|a| a.contains(&input_lower)) {
      matches.push((info, 5));
    }
  }

  matches.sort_by_key(|(_, priority)| *priority);
  matches
}

/// Get suggestions for a partially typed resource name
pub fn get_suggestions(input: &str) -> Vec<&'static ResourceInfo> {
  ranked(input).into_iter().map(|(info, _)| info).collect()
}

/// Resolve a resource name, alias or unambiguous prefix.
pub fn lookup(input: &str) -> Option<Resource> {
  if input.is_empty() {
    return None;
  }
  ranked(input)
    .into_iter()
    .find(|(_, priority)| *priority <= 3)
    .map(|(info, _)| info.resource)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_input_returns_all() {
    assert_eq!(get_suggestions("").len(), RESOURCES.len());
  }

  #[test]
  fn test_exact_match() {
    assert_eq!(lookup("tickets"), Some(Resource::Tickets));
  }

  #[test]
  fn test_alias_match() {
    assert_eq!(lookup("corp"), Some(Resource::Corporations));
    assert_eq!(lookup("tix"), Some(Resource::Tickets));
  }

  #[test]
  fn test_prefix_match() {
    assert_eq!(lookup("alli"), Some(Resource::Alliances));
  }

  #[test]
  fn test_fuzzy_match_only_suggests() {
    let suggestions = get_suggestions("ission");
    assert_eq!(suggestions[0].resource, Resource::Permissions);
    assert_eq!(lookup("ission"), None);
  }

  #[test]
  fn test_keys() {
    assert!(Resource::Tickets.list_key().starts_with(&Resource::Tickets.all_key()));
    assert_eq!(Resource::Tickets.list_key().namespace(), "tickets");
    assert_eq!(
      Resource::Users.page_key(1).unwrap(),
      CacheKey::new("users").with(&serde_json::json!({"page": 1})).unwrap()
    );
    assert_ne!(Resource::Users.detail_key("1"), Resource::Users.list_key());
  }
}
