//! JSON-typed column rendering: extraction accessors, boolean JSON fields,
//! list membership, hierarchical tag aliases, size() and the exists()
//! comprehension.
//!
//! Dialect cheat-sheet:
//!   - sqlite/mysql extract with `JSON_EXTRACT(col, '$.a.b')`
//!   - postgres chains `->` keys, with `->>` at the terminal when a scalar
//!     is needed
//!   - list membership encodes the element as a JSON string and matches it
//!     inside the serialized array

use super::{RenderResult, Renderer};
use crate::error::{FilterError, Result};
use crate::ir::{MatchPredicate, ValueExpr};
use crate::schema::{CompareOp, Dialect, Field, FieldKind};
use crate::value::Value;

impl<'a> Renderer<'a> {
  // ── JSON accessors ─────────────────────────────────────────

  fn json_path(field: &Field) -> String {
    format!("$.{}", field.json_path.join("."))
  }

  /// Accessor yielding a scalar (terminal `->>` on postgres).
  fn json_extract_expr(&self, field: &Field) -> String {
    let column = self.qualified_column(&field.column);
    if self.opts.dialect.is_postgres() {
      postgres_json_accessor(&column, &field.json_path, true)
    } else {
      format!("JSON_EXTRACT({column}, '{}')", Self::json_path(field))
    }
  }

  /// Accessor yielding the JSON array itself (terminal `->` on postgres).
  fn json_array_expr(&self, field: &Field) -> String {
    let column = self.qualified_column(&field.column);
    if self.opts.dialect.is_postgres() {
      postgres_json_accessor(&column, &field.json_path, false)
    } else {
      format!("JSON_EXTRACT({column}, '{}')", Self::json_path(field))
    }
  }

  /// Array length with a COALESCE guard so a missing array counts as 0.
  fn json_array_length_expr(&self, field: &Field) -> String {
    let array = self.json_array_expr(field);
    match self.opts.dialect {
      Dialect::Sqlite => format!("JSON_ARRAY_LENGTH(COALESCE({array}, JSON_ARRAY()))"),
      Dialect::Mysql => format!("JSON_LENGTH(COALESCE({array}, JSON_ARRAY()))"),
      Dialect::Postgres | Dialect::PostgresNamed => {
        format!("jsonb_array_length(COALESCE({array}, '[]'::jsonb))")
      }
    }
  }

  // ── Boolean JSON fields ────────────────────────────────────

  pub(super) fn json_bool_predicate(&self, field: &Field) -> Result<String> {
    let expr = self.json_extract_expr(field);
    Ok(match self.opts.dialect {
      Dialect::Sqlite => format!("{expr} IS TRUE"),
      Dialect::Mysql => {
        format!("COALESCE({expr}, CAST('false' AS JSON)) = CAST('true' AS JSON)")
      }
      Dialect::Postgres | Dialect::PostgresNamed => format!("({expr})::boolean IS TRUE"),
    })
  }

  pub(super) fn render_json_bool_comparison(
    &mut self,
    field: &Field,
    op: CompareOp,
    right: &ValueExpr,
  ) -> Result<RenderResult> {
    let raw = self.resolve_value(right)?;
    let Some(value) = raw.as_bool() else {
      return Err(FilterError::ValueMismatch {
        field: field.name.clone(),
        expected: "bool",
        got: raw.type_name(),
      });
    };
    if !matches!(op, CompareOp::Eq | CompareOp::Neq) {
      return Err(FilterError::Unsupported {
        dialect: self.opts.dialect,
        op: format!("{op} on json_bool"),
      });
    }

    let expr = self.json_extract_expr(field);
    Ok(match self.opts.dialect {
      Dialect::Sqlite => {
        // TRUE-ness test, inverted as needed; sqlite has no JSON bool cast.
        let truthy = (op == CompareOp::Eq) == value;
        if truthy {
          RenderResult::sql(format!("{expr} IS TRUE"))
        } else {
          RenderResult::sql(format!("NOT({expr} IS TRUE)"))
        }
      }
      Dialect::Mysql => {
        let literal = if value { "true" } else { "false" };
        RenderResult::sql(format!("{expr} {} CAST('{literal}' AS JSON)", op.sql()))
      }
      Dialect::Postgres | Dialect::PostgresNamed => {
        let placeholder = self.add_arg(Value::Bool(value));
        RenderResult::sql(format!("({expr})::boolean {} {placeholder}", op.sql()))
      }
    })
  }

  // ── size() ─────────────────────────────────────────────────

  pub(super) fn render_function_comparison(
    &mut self,
    name: &str,
    args: &[ValueExpr],
    op: CompareOp,
    right: &ValueExpr,
  ) -> Result<RenderResult> {
    if name != "size" {
      return Err(FilterError::UnsupportedExpression(format!(
        "unsupported function `{name}` in comparison"
      )));
    }
    if args.len() != 1 {
      return Err(FilterError::UnsupportedExpression(
        "size() expects one argument".into(),
      ));
    }
    let ValueExpr::FieldRef(field_name) = &args[0] else {
      return Err(FilterError::UnsupportedExpression(
        "size() argument must be a field".into(),
      ));
    };

    let field = self.resolve_field(field_name)?;
    if field.kind != FieldKind::JsonList {
      return Err(FilterError::CallNotSupported {
        field: field_name.clone(),
        call: "size()",
      });
    }
    let field = field.clone();

    let raw = self.resolve_value(right)?;
    let n = raw.as_i64().map_err(|_| FilterError::Expected {
      expected: "integer",
      got: raw.type_name(),
    })?;

    let expr = self.json_array_length_expr(&field);
    let placeholder = self.add_arg(Value::Int(n));
    Ok(RenderResult::sql(format!(
      "{expr} {} {placeholder}",
      op.sql()
    )))
  }

  // ── List membership ────────────────────────────────────────

  pub(super) fn render_element_in(
    &mut self,
    element: &ValueExpr,
    field_name: &str,
  ) -> Result<RenderResult> {
    let field = self.resolve_field(field_name)?;
    if field.kind != FieldKind::JsonList {
      return Err(FilterError::ValueMismatch {
        field: field_name.to_string(),
        expected: "json list",
        got: "scalar",
      });
    }
    let field = field.clone();

    let raw = self.resolve_value(element)?;
    let Value::Str(s) = raw else {
      return Err(FilterError::Expected {
        expected: "string",
        got: raw.type_name(),
      });
    };

    let array = self.json_array_expr(&field);
    let encoded = json_encode(&s);
    Ok(match self.opts.dialect {
      Dialect::Sqlite => {
        let placeholder = self.add_arg(Value::Str(format!("%{encoded}%")));
        RenderResult::sql(format!("{array} LIKE {placeholder}"))
      }
      Dialect::Mysql => {
        let placeholder = self.add_arg(Value::Str(encoded));
        RenderResult::sql(format!("JSON_CONTAINS({array}, {placeholder})"))
      }
      Dialect::Postgres | Dialect::PostgresNamed => {
        let placeholder = self.add_arg(Value::Str(encoded));
        RenderResult::sql(format!(
          "{array} @> jsonb_build_array({placeholder}::json)"
        ))
      }
    })
  }

  /// `alias in [x, …]` where the alias targets a JSON list. The reserved
  /// alias name `tag` additionally matches elements beginning with `x/`
  /// (hierarchical tags).
  pub(super) fn render_alias_in_list(
    &mut self,
    alias_name: &str,
    field: &Field,
    values: &[ValueExpr],
  ) -> Result<RenderResult> {
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

    let array = self.json_array_expr(field);
    let hierarchical = alias_name == "tag";

    let mut conditions = Vec::with_capacity(flat.len());
    for raw in flat {
      let Value::Str(s) = raw else {
        return Err(FilterError::ValueMismatch {
          field: alias_name.to_string(),
          expected: "string values",
          got: raw.type_name(),
        });
      };

      let exact = match self.opts.dialect {
        Dialect::Sqlite => {
          let placeholder = self.add_arg(Value::Str(format!("%{}%", json_encode(&s))));
          format!("{array} LIKE {placeholder}")
        }
        Dialect::Mysql => {
          let placeholder = self.add_arg(Value::Str(json_encode(&s)));
          format!("JSON_CONTAINS({array}, {placeholder})")
        }
        Dialect::Postgres | Dialect::PostgresNamed => {
          let placeholder = self.add_arg(Value::Str(json_encode(&s)));
          format!("{array} @> jsonb_build_array({placeholder}::json)")
        }
      };

      if hierarchical {
        let pattern = format!("%\"{s}/%");
        let placeholder = self.add_arg(Value::Str(pattern));
        let prefix = if self.opts.dialect.is_postgres() {
          format!("({array})::text LIKE {placeholder}")
        } else {
          format!("{array} LIKE {placeholder}")
        };
        conditions.push(format!("({exact} OR {prefix})"));
      } else {
        conditions.push(exact);
      }
    }

    if conditions.len() == 1 {
      return Ok(RenderResult::sql(
        conditions.into_iter().next().unwrap_or_default(),
      ));
    }
    Ok(RenderResult::sql(format!("({})", conditions.join(" OR "))))
  }

  // ── exists() comprehension ─────────────────────────────────

  pub(super) fn render_comprehension(
    &mut self,
    field_name: &str,
    predicate: &MatchPredicate,
  ) -> Result<RenderResult> {
    let field = self.resolve_field(field_name)?;
    if field.kind != FieldKind::JsonList {
      return Err(FilterError::ValueMismatch {
        field: field_name.to_string(),
        expected: "json list",
        got: "scalar",
      });
    }
    let field = field.clone();

    match predicate {
      MatchPredicate::StartsWith(prefix) => {
        let prefix = self.resolve_string(prefix)?;
        self.render_array_starts_with(&field, &prefix)
      }
      MatchPredicate::EndsWith(suffix) => {
        let suffix = self.resolve_string(suffix)?;
        self.render_array_ends_with(&field, &suffix)
      }
      MatchPredicate::Contains(substring) => {
        let substring = self.resolve_string(substring)?;
        self.render_array_contains(&field, &substring)
      }
    }
  }

  // An element starting with the prefix either equals it exactly or the
  // serialized array contains `"prefix…`.
  fn render_array_starts_with(&mut self, field: &Field, prefix: &str) -> Result<RenderResult> {
    let array = self.json_array_expr(field);

    let condition = if self.opts.dialect.is_postgres() {
      let exact_placeholder = self.add_arg(Value::Str(json_encode(prefix)));
      let like_placeholder = self.add_arg(Value::Str(format!("%\"{prefix}%")));
      format!(
        "({array} @> jsonb_build_array({exact_placeholder}::json) OR ({array})::text LIKE {like_placeholder})"
      )
    } else {
      let exact = self.array_like(&array, format!("%{}%", json_encode(prefix)));
      let prefixed = self.array_like(&array, format!("%\"{prefix}%"));
      format!("({exact} OR {prefixed})")
    };

    Ok(RenderResult::sql(self.wrap_with_null_check(&array, &condition)))
  }

  fn render_array_ends_with(&mut self, field: &Field, suffix: &str) -> Result<RenderResult> {
    let array = self.json_array_expr(field);
    let like = self.array_like(&array, format!("%{suffix}\"%"));
    Ok(RenderResult::sql(self.wrap_with_null_check(&array, &like)))
  }

  fn render_array_contains(&mut self, field: &Field, substring: &str) -> Result<RenderResult> {
    let array = self.json_array_expr(field);
    let like = self.array_like(&array, format!("%{substring}%"));
    Ok(RenderResult::sql(self.wrap_with_null_check(&array, &like)))
  }

  fn array_like(&mut self, array: &str, pattern: String) -> String {
    let placeholder = self.add_arg(Value::Str(pattern));
    if self.opts.dialect.is_postgres() {
      format!("({array})::text LIKE {placeholder}")
    } else {
      format!("{array} LIKE {placeholder}")
    }
  }

  /// Comprehension results guard against NULL / empty arrays so LIKE
  /// matching over the serialized form cannot produce false positives.
  fn wrap_with_null_check(&self, array: &str, condition: &str) -> String {
    let guard = match self.opts.dialect {
      Dialect::Sqlite => format!("{array} IS NOT NULL AND {array} != '[]'"),
      Dialect::Mysql => format!("{array} IS NOT NULL AND JSON_LENGTH({array}) > 0"),
      Dialect::Postgres | Dialect::PostgresNamed => {
        format!("{array} IS NOT NULL AND jsonb_array_length({array}) > 0")
      }
    };
    format!("({condition} AND {guard})")
  }
}

/// JSON string encoding for an element matched inside a serialized array.
fn json_encode(s: &str) -> String {
  serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

fn postgres_json_accessor(base: &str, path: &[String], terminal_text: bool) -> String {
  let mut expr = base.to_string();
  for (idx, part) in path.iter().enumerate() {
    let arrow = if idx == path.len() - 1 && terminal_text {
      "->>"
    } else {
      "->"
    };
    expr = format!("{expr}{arrow}'{part}'");
  }
  expr
}
