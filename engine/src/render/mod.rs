//! SQL rendering.
//!
//! Walks a [`Condition`] and produces a `(sql, args)` fragment for one
//! dialect. Owns placeholder numbering, trivial/unsatisfiable folding,
//! logical-chain flattening and argument accumulation. JSON-specific
//! shapes live in [`json`].

mod json;

use std::collections::HashMap;

use tracing::debug;

use crate::error::{FilterError, Result};
use crate::eval;
use crate::ir::{Condition, LogicalOp, StringMatchKind, ValueExpr};
use crate::schema::{Column, CompareOp, Dialect, Field, FieldKind, FieldType, Schema};
use crate::value::{Bindings, Value};

/// Options controlling SQL rendering.
#[derive(Debug, Clone)]
pub struct RenderOptions {
  pub dialect: Dialect,
  /// Added to every emitted `$N` / `@pN` index so fragments can be
  /// concatenated: pass the arg count of everything rendered before this
  /// fragment.
  pub placeholder_offset: usize,
  /// Maps schema table names to SQL qualifiers (usually aliases).
  ///
  /// Useful when the schema was defined against a concrete table name but
  /// the query uses an alias: column `{table: "project", name: "id"}` with
  /// `{"project": "p"}` renders `p.id`. A mapped empty string disables
  /// qualification for that table.
  pub table_aliases: HashMap<String, String>,
  /// Drop table qualifiers entirely, rendering `id` instead of `t.id`.
  pub omit_table_qualifier: bool,
}

impl RenderOptions {
  pub fn new(dialect: Dialect) -> Self {
    Self {
      dialect,
      placeholder_offset: 0,
      table_aliases: HashMap::new(),
      omit_table_qualifier: false,
    }
  }
}

/// A rendered SQL fragment and its arguments.
///
/// The fragment is suitable for use inside a parenthesized WHERE context;
/// callers usually wrap it in `(...)` when composing. A trivial top-level
/// filter renders as empty SQL with empty args; an unsatisfiable one as
/// `1 = 0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
  pub sql: String,
  pub args: Vec<Value>,
  /// Populated instead of `args` when rendering with
  /// [`Dialect::PostgresNamed`]; keys are `p1`, `p2`, …
  pub named_args: Bindings,
}

#[derive(Clone, Copy)]
struct Checkpoint {
  args: usize,
  counter: usize,
}

#[derive(Default)]
struct RenderResult {
  sql: String,
  trivial: bool,
  unsatisfiable: bool,
}

impl RenderResult {
  fn sql(sql: String) -> Self {
    Self {
      sql,
      ..Self::default()
    }
  }

  fn trivial() -> Self {
    Self {
      trivial: true,
      ..Self::default()
    }
  }

  fn unsatisfiable() -> Self {
    Self {
      sql: "1 = 0".into(),
      unsatisfiable: true,
      ..Self::default()
    }
  }
}

pub(crate) struct Renderer<'a> {
  schema: &'a Schema,
  opts: &'a RenderOptions,
  bindings: &'a Bindings,
  placeholder_counter: usize,
  args: Vec<Value>,
  named_args: Bindings,
}

impl<'a> Renderer<'a> {
  pub(crate) fn new(schema: &'a Schema, opts: &'a RenderOptions, bindings: &'a Bindings) -> Self {
    Self {
      schema,
      opts,
      bindings,
      placeholder_counter: 0,
      args: Vec::new(),
      named_args: Bindings::new(),
    }
  }

  pub(crate) fn render(mut self, cond: &Condition) -> Result<Statement> {
    let result = self.render_condition(cond)?;
    debug!(
      dialect = %self.opts.dialect,
      args = self.args.len() + self.named_args.len(),
      trivial = result.trivial,
      unsatisfiable = result.unsatisfiable,
      "rendered filter condition"
    );

    // Trivial and unsatisfiable outcomes discard the accumulated args so
    // callers never consume phantom placeholders.
    if result.unsatisfiable {
      return Ok(Statement {
        sql: "1 = 0".into(),
        ..Statement::default()
      });
    }
    if result.trivial {
      return Ok(Statement::default());
    }
    Ok(Statement {
      sql: result.sql,
      args: self.args,
      named_args: self.named_args,
    })
  }

  fn render_condition(&mut self, cond: &Condition) -> Result<RenderResult> {
    match cond {
      Condition::Logical { op, .. } => self.render_logical(cond, *op),
      Condition::Not(inner) => {
        let cp = self.checkpoint();
        let child = self.render_condition(inner)?;
        if child.trivial {
          self.rollback(cp);
          return Ok(RenderResult::unsatisfiable());
        }
        if child.unsatisfiable {
          self.rollback(cp);
          return Ok(RenderResult::trivial());
        }
        Ok(RenderResult::sql(format!("NOT ({})", child.sql)))
      }
      Condition::FieldPredicate { field } => self.render_field_predicate(field),
      Condition::Comparison { left, op, right } => self.render_comparison(left, *op, right),
      Condition::In { left, values } => self.render_in(left, values),
      Condition::ElementIn { element, field } => self.render_element_in(element, field),
      Condition::StringMatch { kind, field, value } => {
        self.render_string_match(*kind, field, value)
      }
      Condition::Comprehension {
        field, predicate, ..
      } => self.render_comprehension(field, predicate),
      Condition::SqlPredicate {
        name, sql, args, ..
      } => self.render_sql_predicate(name, sql, args),
      Condition::Constant(true) => Ok(RenderResult::trivial()),
      Condition::Constant(false) => Ok(RenderResult::unsatisfiable()),
    }
  }

  // ── Logical composition ────────────────────────────────────

  fn render_logical(&mut self, cond: &Condition, op: LogicalOp) -> Result<RenderResult> {
    // Same-operator chains flatten left-associatively so `a && b && c`
    // renders `(a AND b AND c)` rather than `((a AND b) AND c)`.
    let mut flattened = Vec::with_capacity(4);
    flatten_logical(cond, op, &mut flattened);

    // Folded-away children must not leave placeholders or args behind:
    // `AND(trivial, X)` renders exactly like `X`, and a short-circuited
    // node drops everything its children accumulated.
    let node_cp = self.checkpoint();
    let mut rendered = Vec::with_capacity(flattened.len());
    for child in flattened {
      let child_cp = self.checkpoint();
      let result = self.render_condition(child)?;
      match op {
        LogicalOp::And => {
          if result.unsatisfiable {
            self.rollback(node_cp);
            return Ok(RenderResult::unsatisfiable());
          }
          if result.trivial {
            self.rollback(child_cp);
            continue;
          }
        }
        LogicalOp::Or => {
          if result.trivial {
            self.rollback(node_cp);
            return Ok(RenderResult::trivial());
          }
          if result.unsatisfiable {
            self.rollback(child_cp);
            continue;
          }
        }
      }
      rendered.push(result);
    }

    Ok(match op {
      LogicalOp::And => combine_and_all(rendered),
      LogicalOp::Or => combine_or_all(rendered),
    })
  }

  fn checkpoint(&self) -> Checkpoint {
    Checkpoint {
      args: self.args.len(),
      counter: self.placeholder_counter,
    }
  }

  /// Undo every placeholder allocation made since the checkpoint.
  fn rollback(&mut self, cp: Checkpoint) {
    self.args.truncate(cp.args);
    for i in cp.counter + 1..=self.placeholder_counter {
      self
        .named_args
        .remove(&format!("p{}", self.opts.placeholder_offset + i));
    }
    self.placeholder_counter = cp.counter;
  }

  // ── Field predicates ───────────────────────────────────────

  fn render_field_predicate(&mut self, name: &str) -> Result<RenderResult> {
    let field = self.resolve_field(name)?;

    if field.kind == FieldKind::JsonBool {
      let sql = self.json_bool_predicate(field)?;
      return Ok(RenderResult::sql(sql));
    }

    if field.ty != FieldType::Bool {
      return Err(FilterError::UnsupportedExpression(format!(
        "field `{name}` cannot be used as a predicate"
      )));
    }
    let column = self.column_expr(field);
    Ok(RenderResult::sql(match self.opts.dialect {
      Dialect::Sqlite => format!("{column} != 0"),
      _ => format!("{column} IS TRUE"),
    }))
  }

  // ── Comparisons ────────────────────────────────────────────

  fn render_comparison(
    &mut self,
    left: &ValueExpr,
    op: CompareOp,
    right: &ValueExpr,
  ) -> Result<RenderResult> {
    match left {
      ValueExpr::FieldRef(name) => {
        let field = self.resolve_field(name)?;
        match field.kind {
          FieldKind::JsonBool => {
            let field = field.clone();
            self.render_json_bool_comparison(&field, op, right)
          }
          FieldKind::JsonList => Err(FilterError::CallNotSupported {
            field: name.clone(),
            call: "comparison",
          }),
          _ => {
            let field = field.clone();
            self.render_field_comparison(&field, op, right)
          }
        }
      }
      ValueExpr::Function { name, args } => {
        self.render_function_comparison(name, args, op, right)
      }
      _ => {
        // Symmetry: `current_user_id == creator_id`, `0 < size(tags)`.
        if matches!(right, ValueExpr::FieldRef(_) | ValueExpr::Function { .. }) {
          return self.render_comparison(right, op.inverted(), left);
        }

        // No column refs at all: fold to a constant using bindings only.
        if eval::eval_comparison(self.schema, left, op, right, self.bindings)? {
          Ok(RenderResult::trivial())
        } else {
          Ok(RenderResult::unsatisfiable())
        }
      }
    }
  }

  fn render_field_comparison(
    &mut self,
    field: &Field,
    op: CompareOp,
    right: &ValueExpr,
  ) -> Result<RenderResult> {
    let value = self.resolve_value(right)?;
    let column = self.column_expr(field);

    if value.is_null() {
      return match op {
        CompareOp::Eq => Ok(RenderResult::sql(format!("{column} IS NULL"))),
        CompareOp::Neq => Ok(RenderResult::sql(format!("{column} IS NOT NULL"))),
        other => Err(FilterError::NullComparison(other)),
      };
    }

    let placeholder = match field.ty {
      FieldType::String => {
        let Value::Str(s) = value else {
          return Err(FilterError::ValueMismatch {
            field: field.name.clone(),
            expected: "string",
            got: value.type_name(),
          });
        };
        self.add_arg(Value::Str(s))
      }
      FieldType::Int | FieldType::Timestamp => {
        let n = value.as_i64().map_err(|_| FilterError::ValueMismatch {
          field: field.name.clone(),
          expected: "integer",
          got: value.type_name(),
        })?;
        self.add_arg(Value::Int(n))
      }
      FieldType::Bool => {
        let Some(b) = value.as_bool() else {
          return Err(FilterError::ValueMismatch {
            field: field.name.clone(),
            expected: "bool",
            got: value.type_name(),
          });
        };
        self.add_bool_arg(b)
      }
    };

    Ok(RenderResult::sql(format!(
      "{column} {} {placeholder}",
      op.sql()
    )))
  }

  // ── Membership ─────────────────────────────────────────────

  fn render_in(&mut self, left: &ValueExpr, values: &[ValueExpr]) -> Result<RenderResult> {
    let ValueExpr::FieldRef(name) = left else {
      // No column refs: fold to a constant using bindings only.
      return if eval::eval_in(self.schema, left, values, self.bindings)? {
        Ok(RenderResult::trivial())
      } else {
        Ok(RenderResult::unsatisfiable())
      };
    };

    let field = self
      .schema
      .field(name)
      .ok_or_else(|| FilterError::UnknownField(name.clone()))?;

    if field.kind == FieldKind::VirtualAlias {
      let resolved = self
        .schema
        .resolve_alias(name)
        .ok_or_else(|| FilterError::InvalidAlias(name.clone()))?;
      if resolved.kind == FieldKind::JsonList {
        let resolved = resolved.clone();
        return self.render_alias_in_list(name, &resolved, values);
      }
      return Err(FilterError::CallNotSupported {
        field: name.clone(),
        call: "IN()",
      });
    }

    if field.kind == FieldKind::JsonList {
      return Err(FilterError::CallNotSupported {
        field: name.clone(),
        call: "IN(); use element-in (\"x\" in field)",
      });
    }
    let field = field.clone();

    // Flatten: a single list-typed binding expands into its elements.
    let mut flat = Vec::with_capacity(values.len());
    for value in values {
      let raw = self.resolve_value(value)?;
      match raw {
        Value::List(items) => flat.extend(items),
        other => flat.push(other),
      }
    }
    if flat.is_empty() {
      return Ok(RenderResult::unsatisfiable());
    }

    // Per-element type enforcement.
    let mut typed = Vec::with_capacity(flat.len());
    for raw in flat {
      if raw.is_null() {
        return Err(FilterError::ValueMismatch {
          field: field.name.clone(),
          expected: "non-null values",
          got: "null",
        });
      }
      match field.ty {
        FieldType::String => {
          let Value::Str(s) = raw else {
            return Err(FilterError::ValueMismatch {
              field: field.name.clone(),
              expected: "string values",
              got: raw.type_name(),
            });
          };
          typed.push(Value::Str(s));
        }
        FieldType::Int | FieldType::Timestamp => {
          let n = raw.as_i64().map_err(|_| FilterError::ValueMismatch {
            field: field.name.clone(),
            expected: "integer values",
            got: raw.type_name(),
          })?;
          typed.push(Value::Int(n));
        }
        FieldType::Bool => {
          return Err(FilterError::CallNotSupported {
            field: field.name.clone(),
            call: "IN()",
          })
        }
      }
    }

    let column = self.column_expr(&field);

    // The named-args dialect binds the whole list once and compares with
    // ANY, sidestepping per-element placeholder numbering.
    if self.opts.dialect == Dialect::PostgresNamed {
      let placeholder = self.add_arg(Value::List(typed));
      return Ok(RenderResult::sql(format!("{column} = ANY({placeholder})")));
    }

    let placeholders: Vec<String> = typed.into_iter().map(|v| self.add_arg(v)).collect();
    Ok(RenderResult::sql(format!(
      "{column} IN ({})",
      placeholders.join(",")
    )))
  }

  // ── String matches ─────────────────────────────────────────

  fn render_string_match(
    &mut self,
    kind: StringMatchKind,
    name: &str,
    value: &ValueExpr,
  ) -> Result<RenderResult> {
    let field = self
      .schema
      .field(name)
      .ok_or_else(|| FilterError::UnknownField(name.to_string()))?;
    if field.ty != FieldType::String {
      return Err(FilterError::CallNotSupported {
        field: name.to_string(),
        call: kind.method_name(),
      });
    }
    let field = field.clone();

    let raw = self.resolve_value(value)?;
    let Value::Str(needle) = raw else {
      return Err(FilterError::Expected {
        expected: "string",
        got: raw.type_name(),
      });
    };
    if needle.is_empty() {
      return Ok(RenderResult::trivial());
    }

    let pattern = match kind {
      StringMatchKind::Contains => format!("%{needle}%"),
      StringMatchKind::StartsWith => format!("{needle}%"),
      StringMatchKind::EndsWith => format!("%{needle}"),
    };

    let column = self.column_expr(&field);
    let placeholder = self.add_arg(Value::Str(pattern));
    // Postgres matches case-insensitively; sqlite/mysql (and the in-memory
    // evaluator) stay case-sensitive.
    let like = if self.opts.dialect.is_postgres() {
      "ILIKE"
    } else {
      "LIKE"
    };
    Ok(RenderResult::sql(format!("{column} {like} {placeholder}")))
  }

  // ── Plumbing ───────────────────────────────────────────────

  /// Look up a field and follow one alias hop.
  fn resolve_field(&self, name: &str) -> Result<&Field> {
    let field = self
      .schema
      .field(name)
      .ok_or_else(|| FilterError::UnknownField(name.to_string()))?;
    if field.kind == FieldKind::VirtualAlias {
      return self
        .schema
        .resolve_alias(name)
        .ok_or_else(|| FilterError::InvalidAlias(name.to_string()));
    }
    Ok(field)
  }

  /// Qualified, quoted column for the current dialect and options.
  fn qualified_column(&self, col: &Column) -> String {
    let quote = |part: &str| -> String {
      if self.opts.dialect.is_postgres() {
        part.to_string()
      } else {
        format!("`{part}`")
      }
    };

    if self.opts.omit_table_qualifier {
      return quote(&col.name);
    }
    let qualifier = match self.opts.table_aliases.get(&col.table) {
      Some(alias) => alias.as_str(),
      None => col.table.as_str(),
    };
    if qualifier.is_empty() {
      return quote(&col.name);
    }
    format!("{}.{}", quote(qualifier), quote(&col.name))
  }

  /// Column expression with any schema dialect override applied.
  fn column_expr(&self, field: &Field) -> String {
    let base = self.qualified_column(&field.column);
    field.column_expr(self.opts.dialect, &base)
  }

  fn resolve_value(&self, expr: &ValueExpr) -> Result<Value> {
    match expr {
      ValueExpr::Literal(lit) => Ok(lit.to_value()),
      ValueExpr::ParamRef(name) => self
        .bindings
        .get(name)
        .cloned()
        .ok_or_else(|| FilterError::MissingBinding(name.clone())),
      _ => Err(FilterError::UnsupportedExpression(
        "expression must be a literal or param".into(),
      )),
    }
  }

  fn resolve_string(&self, expr: &ValueExpr) -> Result<String> {
    let raw = self.resolve_value(expr)?;
    match raw {
      Value::Str(s) => Ok(s),
      other => Err(FilterError::Expected {
        expected: "string",
        got: other.type_name(),
      }),
    }
  }

  /// Allocate the next placeholder and record its argument.
  fn add_arg(&mut self, value: Value) -> String {
    self.placeholder_counter += 1;
    let index = self.opts.placeholder_offset + self.placeholder_counter;
    match self.opts.dialect {
      Dialect::Postgres => {
        self.args.push(value);
        format!("${index}")
      }
      Dialect::PostgresNamed => {
        let key = format!("p{index}");
        self.named_args.insert(key.clone(), value);
        format!("@{key}")
      }
      Dialect::Sqlite | Dialect::Mysql => {
        self.args.push(value);
        "?".into()
      }
    }
  }

  /// Bool args obey dialect coercion: sqlite stores 1/0.
  fn add_bool_arg(&mut self, value: bool) -> String {
    match self.opts.dialect {
      Dialect::Sqlite => self.add_arg(Value::Int(i64::from(value))),
      _ => self.add_arg(Value::Bool(value)),
    }
  }

  // ── sql() predicate templates ──────────────────────────────

  fn render_sql_predicate(
    &mut self,
    name: &str,
    templates: &crate::sql_predicate::DialectTemplates,
    args: &[ValueExpr],
  ) -> Result<RenderResult> {
    let template = templates.for_dialect(self.opts.dialect);
    if template.trim().is_empty() {
      return Err(FilterError::MissingTemplate {
        name: name.to_string(),
        dialect: self.opts.dialect,
      });
    }

    let sql = self.interpolate_template_columns(template)?;

    let mut placeholders = Vec::with_capacity(args.len());
    for arg in args {
      let raw = self.resolve_value(arg)?;
      let placeholder = match raw {
        Value::Bool(b) => self.add_bool_arg(b),
        other => self.add_arg(other),
      };
      placeholders.push(placeholder);
    }

    let sql = replace_arg_placeholders(name, &sql, &placeholders)?;
    if sql.trim().is_empty() {
      return Ok(RenderResult::trivial());
    }
    Ok(RenderResult::sql(sql))
  }

  /// First template pass: `{{field}}` → column expression. Only scalar and
  /// bool-column kinds may appear in templates.
  fn interpolate_template_columns(&self, template: &str) -> Result<String> {
    let bytes = template.as_bytes();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;

    while i < bytes.len() {
      if i + 1 < bytes.len() && bytes[i] == b'{' && bytes[i + 1] == b'{' {
        let Some(end) = template[i + 2..].find("}}") else {
          return Err(FilterError::UnterminatedPlaceholder);
        };
        let name = template[i + 2..i + 2 + end].trim();
        if name.is_empty() {
          return Err(FilterError::EmptyPlaceholder);
        }

        let field = self.resolve_field(name).map_err(|err| match err {
          FilterError::UnknownField(f) => FilterError::UnknownTemplateField(f),
          other => other,
        })?;
        match field.kind {
          FieldKind::Scalar | FieldKind::BoolColumn => {
            out.push_str(&self.column_expr(field));
          }
          kind => {
            return Err(FilterError::PlaceholderKind {
              field: name.to_string(),
              kind,
            })
          }
        }

        i += 2 + end + 2;
        continue;
      }
      // Template bytes are valid UTF-8; copy char-wise to stay on
      // boundaries.
      let ch = template[i..].chars().next().unwrap_or('\u{fffd}');
      out.push(ch);
      i += ch.len_utf8();
    }

    Ok(out)
  }
}

/// Second template pass: each `?` becomes the next allocated placeholder.
/// The count must exactly match the number of args.
fn replace_arg_placeholders(name: &str, template: &str, placeholders: &[String]) -> Result<String> {
  if placeholders.is_empty() {
    if template.contains('?') {
      return Err(FilterError::ArgCountMismatch {
        name: name.to_string(),
        reason: "template contains '?' but no args were provided".into(),
      });
    }
    return Ok(template.to_string());
  }

  let mut out = String::with_capacity(template.len() + placeholders.len() * 2);
  let mut arg_idx = 0;
  for ch in template.chars() {
    if ch == '?' {
      if arg_idx >= placeholders.len() {
        return Err(FilterError::ArgCountMismatch {
          name: name.to_string(),
          reason: format!("template has more '?' than args ({})", placeholders.len()),
        });
      }
      out.push_str(&placeholders[arg_idx]);
      arg_idx += 1;
      continue;
    }
    out.push(ch);
  }
  if arg_idx != placeholders.len() {
    return Err(FilterError::ArgCountMismatch {
      name: name.to_string(),
      reason: format!("template has fewer '?' than args ({})", placeholders.len()),
    });
  }
  Ok(out)
}

fn flatten_logical<'c>(cond: &'c Condition, op: LogicalOp, out: &mut Vec<&'c Condition>) {
  if let Condition::Logical {
    op: child_op,
    left,
    right,
  } = cond
  {
    if *child_op == op {
      flatten_logical(left, op, out);
      flatten_logical(right, op, out);
      return;
    }
  }
  out.push(cond);
}

/// AND over the surviving children (trivial/unsatisfiable ones were
/// handled during the walk). Zero left means everything was trivial.
fn combine_and_all(children: Vec<RenderResult>) -> RenderResult {
  match children.len() {
    0 => RenderResult::trivial(),
    1 => children.into_iter().next().unwrap_or_default(),
    _ => {
      let parts: Vec<String> = children.into_iter().map(|c| c.sql).collect();
      RenderResult::sql(format!("({})", parts.join(" AND ")))
    }
  }
}

/// OR over the surviving children. Zero left means every disjunct was
/// unsatisfiable.
fn combine_or_all(children: Vec<RenderResult>) -> RenderResult {
  match children.len() {
    0 => RenderResult::unsatisfiable(),
    1 => children.into_iter().next().unwrap_or_default(),
    _ => {
      let parts: Vec<String> = children.into_iter().map(|c| c.sql).collect();
      RenderResult::sql(format!("({})", parts.join(" OR ")))
    }
  }
}
