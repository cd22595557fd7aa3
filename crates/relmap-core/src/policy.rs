//! Authorization seam
//!
//! The session asks an injected [`AuthorizationChecker`] before every read
//! and write. Resources are either a type name (type-level checks) or an
//! object id key such as `Person:42` (instance-level checks). Write denials
//! are fatal; read denials are logged and the object is omitted.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

/// Operation being authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        };
        write!(f, "{}", name)
    }
}

/// Policy deciding whether an action on a resource is allowed
pub trait AuthorizationChecker {
    fn is_authorized(&self, resource: &str, action: Action) -> bool;
}

/// Policy that allows everything
///
/// # Example
/// ```
/// use relmap_core::policy::{Action, AllowAllPolicy, AuthorizationChecker};
///
/// assert!(AllowAllPolicy.is_authorized("Person:1", Action::Delete));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllPolicy;

impl AuthorizationChecker for AllowAllPolicy {
    fn is_authorized(&self, _resource: &str, _action: Action) -> bool {
        true
    }
}

/// Policy that denies only explicitly listed (resource, action) pairs
///
/// # Example
/// ```
/// use relmap_core::policy::{Action, AuthorizationChecker, SelectedDeniedPolicy};
///
/// let policy = SelectedDeniedPolicy::default()
///     .deny("Person:2", Action::Read)
///     .deny("Invoice", Action::Delete);
///
/// assert!(!policy.is_authorized("Person:2", Action::Read));
/// assert!(policy.is_authorized("Person:2", Action::Update));
/// assert!(!policy.is_authorized("Invoice", Action::Delete));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SelectedDeniedPolicy {
    denied: HashSet<(String, Action)>,
}

impl SelectedDeniedPolicy {
    pub fn deny(mut self, resource: impl Into<String>, action: Action) -> Self {
        self.denied.insert((resource.into(), action));
        self
    }
}

impl AuthorizationChecker for SelectedDeniedPolicy {
    fn is_authorized(&self, resource: &str, action: Action) -> bool {
        !self.denied.contains(&(resource.to_string(), action))
    }
}
