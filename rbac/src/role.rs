//! Roles and the role source contract.
//!
//! The composer only needs one thing from the RBAC graph: for a role id,
//! the directly assigned permissions and the parent role ids. That is the
//! [`RoleSource`] trait. [`RoleStore`] is the in-box implementation — an
//! in-memory graph under reader-writer protection, read-mode during
//! composition.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::permission::Permission;

/// What a role source reports for one role.
pub struct RoleRecord<K> {
  /// Directly assigned permissions (not including inherited ones).
  pub permissions: Vec<Arc<dyn Permission<K>>>,
  /// Parent role ids. May form cycles; consumers tolerate them.
  pub parents: Vec<K>,
}

/// The RBAC collaborator contract used by the composer.
pub trait RoleSource<K> {
  /// Look up one role. `None` behaves like a role with no permissions.
  fn get(&self, id: &K) -> Option<RoleRecord<K>>;
}

struct RoleEntry<K> {
  permissions: HashMap<K, Arc<dyn Permission<K>>>,
  parents: Vec<K>,
}

impl<K> Default for RoleEntry<K> {
  fn default() -> Self {
    Self {
      permissions: HashMap::new(),
      parents: Vec::new(),
    }
  }
}

/// An in-memory role graph.
///
/// Mutation (assign, revoke, parent edges) takes the write lock; reads
/// during composition take the read lock only.
pub struct RoleStore<K> {
  roles: RwLock<HashMap<K, RoleEntry<K>>>,
}

impl<K: Eq + Hash + Clone> Default for RoleStore<K> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K: Eq + Hash + Clone> RoleStore<K> {
  pub fn new() -> Self {
    Self {
      roles: RwLock::new(HashMap::new()),
    }
  }

  /// Register a role. A no-op if the role already exists.
  pub fn add_role(&self, id: K) {
    self.roles.write().entry(id).or_default();
  }

  /// Assign a permission to a role, creating the role if needed.
  /// Re-assigning a permission id replaces the previous assignment.
  pub fn assign(&self, role: K, permission: impl Permission<K> + 'static) {
    self.assign_arc(role, Arc::new(permission));
  }

  pub fn assign_arc(&self, role: K, permission: Arc<dyn Permission<K>>) {
    let mut roles = self.roles.write();
    let entry = roles.entry(role).or_default();
    entry
      .permissions
      .insert(permission.id().clone(), permission);
  }

  /// Remove a permission assignment.
  pub fn revoke(&self, role: &K, permission_id: &K) {
    if let Some(entry) = self.roles.write().get_mut(role) {
      entry.permissions.remove(permission_id);
    }
  }

  /// Replace a role's parent edges.
  pub fn set_parents(&self, role: K, parents: Vec<K>) {
    let mut roles = self.roles.write();
    roles.entry(role).or_default().parents = parents;
  }

  pub fn set_parent(&self, role: K, parent: K) {
    let mut roles = self.roles.write();
    let entry = roles.entry(role).or_default();
    if !entry.parents.contains(&parent) {
      entry.parents.push(parent);
    }
  }

  /// Whether the role (or any ancestor) holds a matching permission.
  pub fn is_granted(&self, role: &K, requested: &dyn Permission<K>) -> bool {
    let mut cache = crate::compose::ClosureCache::new(self);
    cache
      .permissions(role)
      .iter()
      .any(|assigned| assigned.matches(requested))
  }
}

impl<K: Eq + Hash + Clone> RoleSource<K> for RoleStore<K> {
  fn get(&self, id: &K) -> Option<RoleRecord<K>> {
    let roles = self.roles.read();
    let entry = roles.get(id)?;
    Some(RoleRecord {
      permissions: entry.permissions.values().cloned().collect(),
      parents: entry.parents.clone(),
    })
  }
}
