//! Schema: the declarative binding from expression identifiers to typed
//! columns, JSON paths and operator allow-lists.
//!
//! A [`Schema`] is plain data. It is validated once at engine construction
//! and never mutated afterwards, so compiled programs can share it freely
//! across threads.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FilterError, Result};

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
  Sqlite,
  Mysql,
  Postgres,
  /// Postgres rendered with named arguments (`@pN`).
  ///
  /// The generated statement populates `Statement::named_args` instead of
  /// the positional `Statement::args`.
  PostgresNamed,
}

impl Dialect {
  /// Both Postgres variants share every SQL shape; only placeholder
  /// emission differs.
  pub fn is_postgres(self) -> bool {
    matches!(self, Dialect::Postgres | Dialect::PostgresNamed)
  }
}

impl fmt::Display for Dialect {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Dialect::Sqlite => "sqlite",
      Dialect::Mysql => "mysql",
      Dialect::Postgres => "postgres",
      Dialect::PostgresNamed => "postgres_named",
    })
  }
}

/// Logical type of a field as seen by the expression language.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
  #[default]
  String,
  Int,
  Bool,
  /// Exposed as unix seconds in the expression language.
  Timestamp,
}

impl fmt::Display for FieldType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      FieldType::String => "string",
      FieldType::Int => "int",
      FieldType::Bool => "bool",
      FieldType::Timestamp => "timestamp",
    })
  }
}

/// How a field is stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
  #[default]
  Scalar,
  BoolColumn,
  JsonBool,
  JsonList,
  VirtualAlias,
}

impl fmt::Display for FieldKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      FieldKind::Scalar => "scalar",
      FieldKind::BoolColumn => "bool_column",
      FieldKind::JsonBool => "json_bool",
      FieldKind::JsonList => "json_list",
      FieldKind::VirtualAlias => "virtual_alias",
    })
  }
}

/// Comparison operators of the expression language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
  Eq,
  Neq,
  Lt,
  Lte,
  Gt,
  Gte,
}

impl CompareOp {
  /// SQL spelling of the operator.
  pub fn sql(self) -> &'static str {
    match self {
      CompareOp::Eq => "=",
      CompareOp::Neq => "!=",
      CompareOp::Lt => "<",
      CompareOp::Lte => "<=",
      CompareOp::Gt => ">",
      CompareOp::Gte => ">=",
    }
  }

  /// The operator with its operands swapped: eq/neq are symmetric,
  /// lt↔gt, lte↔gte.
  pub fn inverted(self) -> CompareOp {
    match self {
      CompareOp::Eq => CompareOp::Eq,
      CompareOp::Neq => CompareOp::Neq,
      CompareOp::Lt => CompareOp::Gt,
      CompareOp::Lte => CompareOp::Gte,
      CompareOp::Gt => CompareOp::Lt,
      CompareOp::Gte => CompareOp::Lte,
    }
  }

  pub const ALL: [CompareOp; 6] = [
    CompareOp::Eq,
    CompareOp::Neq,
    CompareOp::Lt,
    CompareOp::Lte,
    CompareOp::Gt,
    CompareOp::Gte,
  ];
}

impl fmt::Display for CompareOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.sql())
  }
}

/// Identifies the backing table column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
  pub table: String,
  pub name: String,
}

impl Column {
  pub fn new(table: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      table: table.into(),
      name: name.into(),
    }
  }
}

/// Schema metadata for one exposed expression identifier.
#[derive(Debug, Clone, Default)]
pub struct Field {
  pub name: String,
  pub kind: FieldKind,
  pub ty: FieldType,
  /// Backing column; unused for `virtual_alias` fields.
  pub column: Column,
  /// Ordered key path inside the JSON column, for the JSON kinds.
  pub json_path: Vec<String>,
  /// Target identifier, for `virtual_alias` fields.
  pub alias_for: String,
  /// Enables `.contains` / `.startsWith` / `.endsWith` on this field.
  pub supports_contains: bool,
  /// Per-dialect template with one `%s` slot applied to the qualified
  /// column (e.g. unix-timestamp conversions). `postgres_named` falls back
  /// to the `postgres` entry.
  pub expressions: HashMap<Dialect, String>,
  /// Per-field comparison allow-list. `None` means unrestricted; an empty
  /// set means the field supports no comparisons at all.
  pub allowed_comparison_ops: Option<HashSet<CompareOp>>,
}

impl Field {
  /// The column expression for a dialect, with any schema override applied.
  pub(crate) fn column_expr(&self, dialect: Dialect, base: &str) -> String {
    let template = self.expressions.get(&dialect).or_else(|| {
      if dialect == Dialect::PostgresNamed {
        self.expressions.get(&Dialect::Postgres)
      } else {
        None
      }
    });
    match template {
      Some(t) if !t.is_empty() => t.replacen("%s", base, 1),
      _ => base.to_string(),
    }
  }

  pub(crate) fn allows_comparison(&self, op: CompareOp) -> bool {
    match &self.allowed_comparison_ops {
      Some(ops) => ops.contains(&op),
      None => true,
    }
  }
}

/// Named collection of fields addressable from filter expressions.
#[derive(Debug, Clone, Default)]
pub struct Schema {
  pub name: String,
  pub fields: HashMap<String, Field>,
}

impl Schema {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      fields: HashMap::new(),
    }
  }

  /// Add a field, keyed by its name.
  pub fn with_field(mut self, field: Field) -> Self {
    self.fields.insert(field.name.clone(), field);
    self
  }

  pub fn field(&self, name: &str) -> Option<&Field> {
    self.fields.get(name)
  }

  /// Resolve a name to its concrete field, following one `virtual_alias`
  /// hop if needed.
  pub fn resolve_alias(&self, name: &str) -> Option<&Field> {
    let field = self.fields.get(name)?;
    if field.kind == FieldKind::VirtualAlias {
      return self.fields.get(&field.alias_for);
    }
    Some(field)
  }

  /// Check structural invariants: alias targets resolve to concrete fields,
  /// JSON kinds carry a path, and JSON types line up.
  pub fn validate(&self) -> Result<()> {
    for field in self.fields.values() {
      match field.kind {
        FieldKind::VirtualAlias => {
          let target = self.fields.get(&field.alias_for);
          match target {
            None => return Err(FilterError::InvalidAlias(field.name.clone())),
            Some(t) if t.kind == FieldKind::VirtualAlias => {
              return Err(FilterError::InvalidAlias(field.name.clone()))
            }
            Some(_) => {}
          }
        }
        FieldKind::JsonBool => {
          if field.ty != FieldType::Bool {
            return Err(FilterError::InvalidField {
              field: field.name.clone(),
              reason: "json_bool requires bool type".into(),
            });
          }
          if field.json_path.is_empty() {
            return Err(FilterError::InvalidField {
              field: field.name.clone(),
              reason: "json_bool requires a json path".into(),
            });
          }
        }
        FieldKind::JsonList => {
          if field.ty != FieldType::String {
            return Err(FilterError::InvalidField {
              field: field.name.clone(),
              reason: "json_list requires string elements".into(),
            });
          }
          if field.json_path.is_empty() {
            return Err(FilterError::InvalidField {
              field: field.name.clone(),
              reason: "json_list requires a json path".into(),
            });
          }
        }
        FieldKind::Scalar | FieldKind::BoolColumn => {}
      }
    }
    Ok(())
  }
}
