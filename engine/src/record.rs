//! Schema derivation from a record descriptor.
//!
//! Reduces boilerplate when the filter schema mirrors a DB model: describe
//! the model's fields once, annotate the interesting ones, and derive the
//! [`Schema`]. The annotation grammar:
//!
//!   - `-` skips the field
//!   - a leading bare segment renames it (`"tags,kind=json_list"`)
//!   - `contains` enables `<field>.contains(x)` and friends
//!   - `kind=scalar|json_bool|json_list|virtual_alias`
//!   - `table=...` / `column=...` override the backing column
//!   - `json=path.with.dots` (dots or slashes) sets the JSON path
//!   - `alias=...` / `alias_for=...` names the alias target
//!   - `ops=eq|neq|lt|lte|gt|gte` restricts comparison operators
//!
//! Name resolution precedence: annotation name > json hint > db hint >
//! snake_case of the record field name. Column precedence: `column=` >
//! db hint > orm `column:` segment > resolved name.

use std::collections::HashSet;

use crate::error::{FilterError, Result};
use crate::schema::{Column, CompareOp, Field, FieldKind, FieldType, Schema};

/// Type of a record field, as declared by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
  String,
  Int,
  Uint,
  Bool,
  /// Exposed as unix seconds.
  Timestamp,
  StringList,
  /// Anything the filter engine cannot address. Skipped unless the
  /// annotation is explicit, in which case derivation fails.
  Unsupported,
}

/// One field of a record descriptor.
#[derive(Debug, Clone)]
pub struct RecordField {
  /// The source field name (any casing; snake_cased as the last resort).
  pub name: String,
  pub ty: RecordType,
  /// The filter annotation, e.g. `"tags,kind=json_list,json=tags"`.
  pub annotation: String,
  /// Serialization name hint (the first segment of a json-style tag).
  pub json_name: Option<String>,
  /// Database column hint (db-style tag).
  pub db_name: Option<String>,
  /// ORM tag carrying `column:<name>` segments separated by `;`.
  pub orm: Option<String>,
}

impl RecordField {
  pub fn new(name: impl Into<String>, ty: RecordType) -> Self {
    Self {
      name: name.into(),
      ty,
      annotation: String::new(),
      json_name: None,
      db_name: None,
      orm: None,
    }
  }

  pub fn annotation(mut self, annotation: impl Into<String>) -> Self {
    self.annotation = annotation.into();
    self
  }

  pub fn json_name(mut self, name: impl Into<String>) -> Self {
    self.json_name = Some(name.into());
    self
  }

  pub fn db_name(mut self, name: impl Into<String>) -> Self {
    self.db_name = Some(name.into());
    self
  }

  pub fn orm(mut self, tag: impl Into<String>) -> Self {
    self.orm = Some(tag.into());
    self
  }
}

/// A record descriptor: schema name, default table, and fields.
#[derive(Debug, Clone)]
pub struct RecordDef {
  pub name: String,
  pub table: String,
  pub fields: Vec<RecordField>,
}

impl RecordDef {
  pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      table: table.into(),
      fields: Vec::new(),
    }
  }

  pub fn field(mut self, field: RecordField) -> Self {
    self.fields.push(field);
    self
  }
}

/// Derive a [`Schema`] from a record descriptor.
pub fn schema_from_record(def: &RecordDef) -> Result<Schema> {
  if def.table.trim().is_empty() {
    return Err(FilterError::InvalidField {
      field: def.name.clone(),
      reason: "table is required".into(),
    });
  }
  if def.name.trim().is_empty() {
    return Err(FilterError::InvalidField {
      field: "<record>".into(),
      reason: "schema name is required".into(),
    });
  }

  let mut schema = Schema::new(def.name.clone());
  for record_field in &def.fields {
    let Some(field) = derive_field(def, record_field)? else {
      continue;
    };
    if schema.fields.contains_key(&field.name) {
      return Err(FilterError::DuplicateField(field.name));
    }
    schema.fields.insert(field.name.clone(), field);
  }

  schema.validate()?;
  Ok(schema)
}

fn derive_field(def: &RecordDef, rf: &RecordField) -> Result<Option<Field>> {
  let tag = parse_annotation(&rf.annotation);
  if tag.skip {
    return Ok(None);
  }

  let name = tag
    .name
    .clone()
    .or_else(|| rf.json_name.clone())
    .or_else(|| rf.db_name.clone())
    .unwrap_or_else(|| snake_case(&rf.name));
  if name == "-" || name.is_empty() {
    return Ok(None);
  }

  let kind = match tag.kind.as_deref() {
    None | Some("") | Some("scalar") => FieldKind::Scalar,
    Some("bool_column") => FieldKind::BoolColumn,
    Some("json_bool") => FieldKind::JsonBool,
    Some("json_list") => FieldKind::JsonList,
    Some("virtual_alias") => FieldKind::VirtualAlias,
    Some(other) => {
      return Err(FilterError::InvalidField {
        field: rf.name.clone(),
        reason: format!("unknown kind `{other}`"),
      })
    }
  };

  let ty = match infer_field_type(rf.ty, kind) {
    Ok(ty) => ty,
    // Unsupported types are ignored unless the annotation is explicit.
    Err(FilterError::InvalidField { reason, .. }) => {
      if tag.explicit {
        return Err(FilterError::InvalidField {
          field: rf.name.clone(),
          reason,
        });
      }
      return Ok(None);
    }
    Err(other) => return Err(other),
  };

  let mut field = Field {
    name: name.clone(),
    kind,
    ty,
    supports_contains: tag.supports_contains,
    ..Field::default()
  };

  match kind {
    FieldKind::VirtualAlias => {
      let target = tag.alias_for.clone().unwrap_or_default();
      if target.trim().is_empty() {
        return Err(FilterError::InvalidField {
          field: rf.name.clone(),
          reason: "virtual_alias requires alias=<target field name>".into(),
        });
      }
      field.alias_for = target;
    }
    _ => {
      let column = tag
        .column
        .clone()
        .or_else(|| rf.db_name.clone())
        .or_else(|| rf.orm.as_deref().and_then(orm_column))
        .unwrap_or_else(|| name.clone());
      let table = tag.table.clone().unwrap_or_else(|| def.table.clone());
      field.column = Column::new(table, column);
    }
  }

  match kind {
    FieldKind::JsonBool => {
      if ty != FieldType::Bool {
        return Err(FilterError::InvalidField {
          field: rf.name.clone(),
          reason: "json_bool requires bool type".into(),
        });
      }
      if tag.json_path.is_empty() {
        return Err(FilterError::InvalidField {
          field: rf.name.clone(),
          reason: "json_bool requires json=<path>".into(),
        });
      }
      field.json_path = tag.json_path.clone();
    }
    FieldKind::JsonList => {
      if ty != FieldType::String {
        return Err(FilterError::InvalidField {
          field: rf.name.clone(),
          reason: "json_list requires string elements".into(),
        });
      }
      if tag.json_path.is_empty() {
        return Err(FilterError::InvalidField {
          field: rf.name.clone(),
          reason: "json_list requires json=<path>".into(),
        });
      }
      field.json_path = tag.json_path.clone();
    }
    _ => {}
  }

  field.allowed_comparison_ops = Some(match tag.allowed_ops {
    Some(ops) => ops,
    None => default_allowed_ops(kind, ty),
  });

  Ok(Some(field))
}

#[derive(Debug, Default)]
struct ParsedAnnotation {
  skip: bool,
  explicit: bool,
  name: Option<String>,
  kind: Option<String>,
  table: Option<String>,
  column: Option<String>,
  json_path: Vec<String>,
  alias_for: Option<String>,
  supports_contains: bool,
  allowed_ops: Option<HashSet<CompareOp>>,
}

fn parse_annotation(raw: &str) -> ParsedAnnotation {
  if raw.is_empty() {
    return ParsedAnnotation::default();
  }

  let mut out = ParsedAnnotation {
    explicit: true,
    ..ParsedAnnotation::default()
  };

  for (idx, part) in raw.split(',').enumerate() {
    let part = part.trim();
    if part.is_empty() {
      continue;
    }
    if part == "-" {
      out.skip = true;
      return out;
    }
    if idx == 0 && !part.contains('=') && part != "contains" {
      out.name = Some(part.to_string());
      continue;
    }

    if part == "contains" {
      out.supports_contains = true;
    } else if let Some(kind) = part.strip_prefix("kind=") {
      out.kind = Some(kind.to_string());
    } else if let Some(table) = part.strip_prefix("table=") {
      out.table = Some(table.to_string());
    } else if let Some(column) = part.strip_prefix("column=") {
      out.column = Some(column.to_string());
    } else if let Some(path) = part.strip_prefix("json=") {
      let path = path.trim_matches(|c| c == '.' || c == '/');
      if !path.is_empty() {
        out.json_path = path
          .split(|c| c == '.' || c == '/')
          .filter(|s| !s.is_empty())
          .map(str::to_string)
          .collect();
      }
    } else if let Some(alias) = part.strip_prefix("alias_for=") {
      out.alias_for = Some(alias.to_string());
    } else if let Some(alias) = part.strip_prefix("alias=") {
      out.alias_for = Some(alias.to_string());
    } else if let Some(spec) = part.strip_prefix("ops=") {
      out.allowed_ops = Some(parse_comparison_ops(spec));
    }
  }

  out
}

fn parse_comparison_ops(spec: &str) -> HashSet<CompareOp> {
  let mut out = HashSet::new();
  for raw in spec.split('|') {
    match raw.trim() {
      "eq" | "==" => {
        out.insert(CompareOp::Eq);
      }
      "neq" | "!=" => {
        out.insert(CompareOp::Neq);
      }
      "lt" | "<" => {
        out.insert(CompareOp::Lt);
      }
      "lte" | "<=" => {
        out.insert(CompareOp::Lte);
      }
      "gt" | ">" => {
        out.insert(CompareOp::Gt);
      }
      "gte" | ">=" => {
        out.insert(CompareOp::Gte);
      }
      _ => {}
    }
  }
  out
}

fn infer_field_type(ty: RecordType, kind: FieldKind) -> Result<FieldType> {
  if kind == FieldKind::JsonList {
    return match ty {
      RecordType::StringList => Ok(FieldType::String),
      _ => Err(FilterError::InvalidField {
        field: String::new(),
        reason: "json_list requires a string-list field".into(),
      }),
    };
  }

  match ty {
    RecordType::String => Ok(FieldType::String),
    RecordType::Bool => Ok(FieldType::Bool),
    RecordType::Int | RecordType::Uint => Ok(FieldType::Int),
    RecordType::Timestamp => Ok(FieldType::Timestamp),
    RecordType::StringList | RecordType::Unsupported => Err(FilterError::InvalidField {
      field: String::new(),
      reason: "unsupported record field type".into(),
    }),
  }
}

fn default_allowed_ops(kind: FieldKind, ty: FieldType) -> HashSet<CompareOp> {
  match kind {
    FieldKind::JsonList | FieldKind::VirtualAlias => HashSet::new(),
    FieldKind::JsonBool => [CompareOp::Eq, CompareOp::Neq].into(),
    _ => match ty {
      FieldType::Bool => [CompareOp::Eq, CompareOp::Neq].into(),
      _ => CompareOp::ALL.into(),
    },
  }
}

/// Extract `column:<name>` from an orm-style tag (`;`-separated segments).
fn orm_column(tag: &str) -> Option<String> {
  for part in tag.split(';') {
    let part = part.trim();
    if let Some(column) = part.strip_prefix("column:") {
      return Some(column.to_string());
    }
    if let Some(column) = part.strip_prefix("column=") {
      return Some(column.to_string());
    }
  }
  None
}

fn snake_case(s: &str) -> String {
  let s = s.trim();
  let mut out = String::with_capacity(s.len() + 4);
  let chars: Vec<char> = s.chars().collect();

  for (i, &c) in chars.iter().enumerate() {
    if c.is_uppercase() {
      if i > 0 {
        let prev = chars[i - 1];
        let next = chars.get(i + 1).copied();
        // Break before an upper that follows lower/digit, or that starts
        // a new word ahead of a lower ("HTTPServer" → "http_server").
        if prev.is_lowercase() || prev.is_ascii_digit() || next.is_some_and(|n| n.is_lowercase()) {
          out.push('_');
        }
      }
      out.extend(c.to_lowercase());
      continue;
    }
    out.push(c);
  }
  out
}
