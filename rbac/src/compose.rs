//! The role/permission composer.
//!
//! Builds a single [`Program`] spanning every row any of the user's roles
//! can see, under the policy: OR across the variants of one permission,
//! AND across required permissions within a role, OR across roles.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use rowfence_engine::{Condition, Engine, EngineBuilder, FilterError, Program, Schema};

use crate::permission::Permission;
use crate::role::RoleSource;

/// Errors produced while composing a filter program.
#[derive(Debug, Error)]
pub enum ComposeError {
  #[error("compose: required permission list is empty")]
  NoPermissions,

  /// A filter expression attached to a matched permission failed to
  /// compile, or the engine itself failed to build. Compose-time errors
  /// from one role abort the whole composition.
  #[error(transparent)]
  Engine(#[from] FilterError),
}

/// Per-build memo of role closures and merged permission lists.
///
/// Walks the inheritance graph with a visited set, so cyclic parent edges
/// terminate; shared ancestors are computed once. Missing role ids behave
/// like roles with no permissions.
pub struct ClosureCache<'a, K> {
  source: &'a dyn RoleSource<K>,
  role_closure: HashMap<K, Vec<K>>,
  direct: HashMap<K, Vec<Arc<dyn Permission<K>>>>,
  merged: HashMap<K, Vec<Arc<dyn Permission<K>>>>,
}

impl<'a, K: Eq + Hash + Clone> ClosureCache<'a, K> {
  pub fn new(source: &'a dyn RoleSource<K>) -> Self {
    Self {
      source,
      role_closure: HashMap::new(),
      direct: HashMap::new(),
      merged: HashMap::new(),
    }
  }

  /// All permissions a role has: direct, plus those reachable through
  /// parent edges.
  pub fn permissions(&mut self, role: &K) -> Vec<Arc<dyn Permission<K>>> {
    if let Some(perms) = self.merged.get(role) {
      return perms.clone();
    }

    let mut visiting = HashSet::new();
    let closure = self.role_closure(role, &mut visiting);

    let mut out = Vec::new();
    for id in &closure {
      if let Some(direct) = self.direct.get(id) {
        out.extend(direct.iter().cloned());
      }
    }
    self.merged.insert(role.clone(), out.clone());
    out
  }

  fn role_closure(&mut self, role: &K, visiting: &mut HashSet<K>) -> Vec<K> {
    if let Some(closure) = self.role_closure.get(role) {
      return closure.clone();
    }
    // A cycle reads as "already visited": contributes nothing further.
    if !visiting.insert(role.clone()) {
      return Vec::new();
    }

    let result = match self.source.get(role) {
      None => {
        self.direct.insert(role.clone(), Vec::new());
        Vec::new()
      }
      Some(record) => {
        self.direct.insert(role.clone(), record.permissions);

        let mut closure = vec![role.clone()];
        let mut seen: HashSet<K> = HashSet::from([role.clone()]);
        for parent in &record.parents {
          for id in self.role_closure(parent, visiting) {
            if seen.insert(id.clone()) {
              closure.push(id);
            }
          }
        }
        closure
      }
    };

    visiting.remove(role);
    self.role_closure.insert(role.clone(), result.clone());
    result
  }
}

/// Assigned permissions bucketed by match kind: exact-id permissions are
/// looked up in constant time, custom matchers are scanned linearly.
struct PermissionBuckets<K> {
  exact_by_id: HashMap<K, Vec<Arc<dyn Permission<K>>>>,
  non_exact: Vec<Arc<dyn Permission<K>>>,
}

impl<K: Eq + Hash + Clone> PermissionBuckets<K> {
  fn new(all: Vec<Arc<dyn Permission<K>>>) -> Self {
    let mut buckets = Self {
      exact_by_id: HashMap::with_capacity(all.len()),
      non_exact: Vec::new(),
    };
    for p in all {
      if p.exact_id_match() {
        buckets
          .exact_by_id
          .entry(p.id().clone())
          .or_default()
          .push(p);
      } else {
        buckets.non_exact.push(p);
      }
    }
    buckets
  }

  fn matching(&self, requested: &dyn Permission<K>) -> Vec<Arc<dyn Permission<K>>> {
    let mut out = Vec::new();
    if let Some(exact) = self.exact_by_id.get(requested.id()) {
      out.extend(exact.iter().cloned());
    }
    for assigned in &self.non_exact {
      if assigned.matches(requested) {
        out.push(assigned.clone());
      }
    }
    out
  }
}

type Configure<'a> = Box<dyn FnOnce(EngineBuilder) -> EngineBuilder + 'a>;

/// Builder for a filter program spanning roles and required permissions.
pub struct FilterScope<'a, K> {
  source: &'a dyn RoleSource<K>,
  roles: Vec<K>,
  permissions: Vec<Arc<dyn Permission<K>>>,
  schema: Schema,
  configure: Option<Configure<'a>>,
  extra_filter: Option<String>,
}

impl<'a, K: Eq + Hash + Clone> FilterScope<'a, K> {
  pub fn new(
    source: &'a dyn RoleSource<K>,
    roles: Vec<K>,
    permissions: Vec<Arc<dyn Permission<K>>>,
    schema: Schema,
  ) -> Self {
    Self {
      source,
      roles,
      permissions,
      schema,
      configure: None,
      extra_filter: None,
    }
  }

  /// Customize the engine used to compile permission filters: extra
  /// declarations, macros, SQL predicates, compile hooks.
  pub fn configure_engine<F>(mut self, f: F) -> Self
  where
    F: FnOnce(EngineBuilder) -> EngineBuilder + 'a,
  {
    self.configure = Some(Box::new(f));
    self
  }

  /// AND an extra user-supplied expression (e.g. a search clause) onto
  /// the composed result.
  pub fn extra_filter(mut self, filter: impl Into<String>) -> Self {
    self.extra_filter = Some(filter.into());
    self
  }

  /// Compose the program.
  ///
  /// A role in which any required permission has no match contributes
  /// nothing. If no role contributes, the program is constant-false
  /// (no rows visible).
  pub fn build(self) -> Result<Program, ComposeError> {
    if self.permissions.is_empty() {
      return Err(ComposeError::NoPermissions);
    }

    let mut builder = Engine::builder(self.schema);
    if let Some(configure) = self.configure {
      builder = configure(builder);
    }
    let engine = builder.build()?;

    let mut cache = ClosureCache::new(self.source);
    let mut role_conds = Vec::with_capacity(self.roles.len());
    for role in &self.roles {
      let role_perms = cache.permissions(role);
      if let Some(cond) = single_role_condition(&engine, role_perms, &self.permissions)? {
        role_conds.push(cond);
      }
    }

    debug!(
      roles = self.roles.len(),
      contributing = role_conds.len(),
      permissions = self.permissions.len(),
      "composed filter scope"
    );

    let mut cond = if role_conds.is_empty() {
      Condition::Constant(false)
    } else {
      Condition::or_all(role_conds)
    };

    if let Some(extra) = &self.extra_filter {
      let extra_cond = engine.compile(extra)?.into_condition();
      cond = Condition::and(cond, extra_cond);
    }

    Ok(Program::from_condition(engine.schema().clone(), cond))
  }
}

/// AND across required permissions; OR across the matched variants of
/// each. `None` when a required permission has no match in this role.
fn single_role_condition<K: Eq + Hash + Clone>(
  engine: &Engine,
  role_permissions: Vec<Arc<dyn Permission<K>>>,
  required: &[Arc<dyn Permission<K>>],
) -> Result<Option<Condition>, ComposeError> {
  let buckets = PermissionBuckets::new(role_permissions);

  let mut perm_conds = Vec::with_capacity(required.len());
  for requested in required {
    let matching = buckets.matching(requested.as_ref());
    if matching.is_empty() {
      return Ok(None);
    }

    let mut variants = Vec::with_capacity(matching.len());
    for assigned in matching {
      match assigned.expression() {
        // Permissions without attached filters are allow-all.
        None => variants.push(Condition::Constant(true)),
        Some(expr) => variants.push(engine.compile(expr)?.into_condition()),
      }
    }
    perm_conds.push(Condition::or_all(variants));
  }

  Ok(Some(Condition::and_all(perm_conds)))
}
