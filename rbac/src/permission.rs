//! Permissions as a capability set.
//!
//! A permission exposes `(id, matches(other))` and optionally an attached
//! filter expression. Two variants ship in-box: [`StdPermission`] (plain id
//! equality) and [`FilterPermission`] (id equality plus a row filter).
//! User-defined matchers plug in as additional trait impls; the composer's
//! exact-vs-custom bucketing keys on [`Permission::exact_id_match`].

use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// A permission identified by `K`.
pub trait Permission<K>: Send + Sync {
  fn id(&self) -> &K;

  /// Whether this assigned permission satisfies the requested one.
  fn matches(&self, requested: &dyn Permission<K>) -> bool;

  /// The attached row filter expression, if any.
  ///
  /// Permissions without a filter grant access to every row.
  fn expression(&self) -> Option<&str> {
    None
  }

  /// True when `matches` is plain id equality. The composer uses this to
  /// bucket permissions for constant-time lookup; custom matchers return
  /// false and are scanned linearly.
  fn exact_id_match(&self) -> bool {
    false
  }
}

/// The default permission: matched by id equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdPermission<K> {
  pub id: K,
}

impl<K> StdPermission<K> {
  pub fn new(id: K) -> Self {
    Self { id }
  }
}

impl<K: Eq + Hash + Send + Sync> Permission<K> for StdPermission<K> {
  fn id(&self) -> &K {
    &self.id
  }

  fn matches(&self, requested: &dyn Permission<K>) -> bool {
    &self.id == requested.id()
  }

  fn exact_id_match(&self) -> bool {
    true
  }
}

/// A permission with an attached filter expression.
///
/// The permission id still decides whether a role is granted; the filter
/// decides which rows are accessible. The expression can reference schema
/// fields (rendered as SQL columns) and extra variables supplied at
/// runtime via bindings (rendered as placeholders).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPermission<K> {
  pub id: K,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub filter: String,
}

impl<K> FilterPermission<K> {
  pub fn new(id: K, filter: impl Into<String>) -> Self {
    Self {
      id,
      filter: filter.into(),
    }
  }
}

impl<K: Eq + Hash + Send + Sync> Permission<K> for FilterPermission<K> {
  fn id(&self) -> &K {
    &self.id
  }

  fn matches(&self, requested: &dyn Permission<K>) -> bool {
    &self.id == requested.id()
  }

  fn expression(&self) -> Option<&str> {
    if self.filter.is_empty() {
      None
    } else {
      Some(&self.filter)
    }
  }

  fn exact_id_match(&self) -> bool {
    true
  }
}
