//! User-registered SQL predicates.
//!
//! A predicate is a named, trusted SQL fragment referenced from filter
//! expressions via `sql("name")` or `sql("name", [arg, ...])`. Templates
//! are configuration: user input must only ever flow through `?` argument
//! slots, never into the template body.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::eval::EvalOptions;
use crate::schema::{Dialect, Schema};
use crate::value::{Bindings, Value};

/// Dialect-specific SQL templates for one predicate.
///
/// Templates are fragments used inside a WHERE clause and must evaluate to
/// a boolean expression in the target dialect. Placeholders:
///   - `{{field_name}}` is replaced with the schema column expression for
///     that field (alias-resolved; scalar and bool-column kinds only).
///   - each `?` is replaced with a freshly allocated dialect placeholder
///     and populated from the predicate's args, in order.
#[derive(Debug, Clone, Default)]
pub struct DialectTemplates {
  pub default: String,
  pub sqlite: String,
  pub mysql: String,
  pub postgres: String,
}

impl DialectTemplates {
  /// A single template used for every dialect.
  pub fn default_only(template: impl Into<String>) -> Self {
    Self {
      default: template.into(),
      ..Self::default()
    }
  }

  /// Pick the template for a dialect, falling back to `default`.
  /// `postgres_named` shares the `postgres` entry.
  pub fn for_dialect(&self, dialect: Dialect) -> &str {
    let specific = match dialect {
      Dialect::Sqlite => &self.sqlite,
      Dialect::Mysql => &self.mysql,
      Dialect::Postgres | Dialect::PostgresNamed => &self.postgres,
    };
    if specific.is_empty() {
      &self.default
    } else {
      specific
    }
  }
}

/// In-memory evaluation callback for a predicate.
///
/// Receives the schema, the full variable map, and the resolved argument
/// values (literals and bound params). Predicates registered without a
/// callback fail evaluation with a structured error.
#[derive(Clone)]
pub struct SqlPredicateEval(
  pub Arc<dyn Fn(&Schema, &Bindings, &[Value], &EvalOptions) -> Result<bool> + Send + Sync>,
);

impl SqlPredicateEval {
  pub fn new<F>(f: F) -> Self
  where
    F: Fn(&Schema, &Bindings, &[Value], &EvalOptions) -> Result<bool> + Send + Sync + 'static,
  {
    Self(Arc::new(f))
  }
}

impl fmt::Debug for SqlPredicateEval {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("SqlPredicateEval(..)")
  }
}

/// A custom predicate: dialect templates plus an optional in-memory
/// evaluation callback.
#[derive(Debug, Clone, Default)]
pub struct SqlPredicate {
  pub sql: DialectTemplates,
  pub eval: Option<SqlPredicateEval>,
}
