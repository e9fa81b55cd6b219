//! In-memory evaluation of compiled conditions.
//!
//! Consumes the same IR the renderer does and must agree with its
//! semantics, modulo dialect-only concerns: evaluation is case-sensitive
//! across the board, while the Postgres renderer emits `ILIKE` for string
//! matches.

use crate::error::{FilterError, Result};
use crate::ir::{ComprehensionKind, Condition, MatchPredicate, StringMatchKind, ValueExpr};
use crate::schema::{CompareOp, FieldKind, Schema};
use crate::value::{Bindings, Value};

/// Options for in-memory evaluation.
///
/// Currently carries no knobs; it exists so predicate eval callbacks keep a
/// stable signature when options are added.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalOptions {}

/// Evaluate a compiled condition tree against the provided vars.
///
/// `vars` keys are expression identifiers: schema field names carrying row
/// values, plus any parameter variables (bindings).
pub fn evaluate_condition(
  schema: &Schema,
  cond: &Condition,
  vars: &Bindings,
  opts: &EvalOptions,
) -> Result<bool> {
  match cond {
    Condition::Logical { op, left, right } => {
      let left = evaluate_condition(schema, left, vars, opts)?;
      match op {
        crate::ir::LogicalOp::And => {
          if !left {
            return Ok(false);
          }
          evaluate_condition(schema, right, vars, opts)
        }
        crate::ir::LogicalOp::Or => {
          if left {
            return Ok(true);
          }
          evaluate_condition(schema, right, vars, opts)
        }
      }
    }

    Condition::Not(inner) => Ok(!evaluate_condition(schema, inner, vars, opts)?),

    Condition::FieldPredicate { field } => {
      let value = vars
        .get(field)
        .ok_or_else(|| FilterError::MissingBinding(field.clone()))?;
      value.as_bool().ok_or_else(|| FilterError::ValueMismatch {
        field: field.clone(),
        expected: "bool",
        got: value.type_name(),
      })
    }

    Condition::Comparison { left, op, right } => eval_comparison(schema, left, *op, right, vars),

    Condition::In { left, values } => eval_in(schema, left, values, vars),

    Condition::ElementIn { element, field } => eval_element_in(schema, element, field, vars),

    Condition::StringMatch { kind, field, value } => {
      let raw = vars
        .get(field)
        .ok_or_else(|| FilterError::MissingBinding(field.clone()))?;
      let haystack = raw.as_str().ok_or_else(|| FilterError::ValueMismatch {
        field: field.clone(),
        expected: "string",
        got: raw.type_name(),
      })?;
      let needle_raw = eval_value(schema, value, vars)?;
      let needle = needle_raw
        .as_str()
        .ok_or_else(|| FilterError::Expected {
          expected: "string",
          got: needle_raw.type_name(),
        })?;
      Ok(match kind {
        StringMatchKind::Contains => haystack.contains(needle),
        StringMatchKind::StartsWith => haystack.starts_with(needle),
        StringMatchKind::EndsWith => haystack.ends_with(needle),
      })
    }

    Condition::Comprehension {
      kind: ComprehensionKind::Exists,
      field,
      predicate,
      ..
    } => eval_comprehension(schema, field, predicate, vars),

    Condition::SqlPredicate {
      name, args, eval, ..
    } => {
      let Some(eval) = eval else {
        return Err(FilterError::PredicateNotEvaluable(name.clone()));
      };
      let mut resolved = Vec::with_capacity(args.len());
      for arg in args {
        resolved.push(eval_value(schema, arg, vars)?);
      }
      (eval.0)(schema, vars, &resolved, opts)
    }

    Condition::Constant(v) => Ok(*v),
  }
}

pub(crate) fn eval_comparison(
  schema: &Schema,
  left: &ValueExpr,
  op: CompareOp,
  right: &ValueExpr,
  vars: &Bindings,
) -> Result<bool> {
  let left = eval_value(schema, left, vars)?;
  let right = eval_value(schema, right, vars)?;

  // Null admits only eq/neq, mirroring the renderer.
  if left.is_null() || right.is_null() {
    return match op {
      CompareOp::Eq => Ok(left.is_null() && right.is_null()),
      CompareOp::Neq => Ok(!(left.is_null() && right.is_null())),
      other => Err(FilterError::NullComparison(other)),
    };
  }

  match (&left, &right) {
    (Value::Str(l), Value::Str(r)) => Ok(match op {
      CompareOp::Eq => l == r,
      CompareOp::Neq => l != r,
      CompareOp::Lt => l < r,
      CompareOp::Lte => l <= r,
      CompareOp::Gt => l > r,
      CompareOp::Gte => l >= r,
    }),
    (Value::Bool(l), Value::Bool(r)) => match op {
      CompareOp::Eq => Ok(l == r),
      CompareOp::Neq => Ok(l != r),
      other => Err(FilterError::ComparisonMismatch {
        left: "bool",
        op: other,
        right: "bool",
      }),
    },
    _ => {
      let mismatch = || FilterError::ComparisonMismatch {
        left: left.type_name(),
        op,
        right: right.type_name(),
      };
      let l = left.as_i64().map_err(|_| mismatch())?;
      let r = right.as_i64().map_err(|_| mismatch())?;
      Ok(match op {
        CompareOp::Eq => l == r,
        CompareOp::Neq => l != r,
        CompareOp::Lt => l < r,
        CompareOp::Lte => l <= r,
        CompareOp::Gt => l > r,
        CompareOp::Gte => l >= r,
      })
    }
  }
}

pub(crate) fn eval_in(
  schema: &Schema,
  left: &ValueExpr,
  values: &[ValueExpr],
  vars: &Bindings,
) -> Result<bool> {
  // Virtual alias over a JSON list: membership against the list variable,
  // with hierarchical matching for the reserved alias name `tag`.
  if let ValueExpr::FieldRef(name) = left {
    let field = schema.field(name);
    if let Some(field) = field {
      if field.kind == FieldKind::VirtualAlias {
        let resolved = schema
          .resolve_alias(name)
          .ok_or_else(|| FilterError::InvalidAlias(name.clone()))?;
        if resolved.kind == FieldKind::JsonList {
          return eval_alias_in_list(schema, name, &resolved.name, values, vars);
        }
      }
    }
  }

  let left = eval_value(schema, left, vars)?;
  for value in values {
    let right = eval_value(schema, value, vars)?;
    if let Value::List(items) = &right {
      if items.iter().any(|item| left.loosely_equals(item)) {
        return Ok(true);
      }
      continue;
    }
    if left.loosely_equals(&right) {
      return Ok(true);
    }
  }
  Ok(false)
}

fn eval_alias_in_list(
  schema: &Schema,
  alias_name: &str,
  list_field: &str,
  values: &[ValueExpr],
  vars: &Bindings,
) -> Result<bool> {
  let Some(list_raw) = vars.get(list_field) else {
    return Ok(false);
  };
  if list_raw.is_null() {
    return Ok(false);
  }
  let items = list_raw.as_list().ok_or_else(|| FilterError::ValueMismatch {
    field: list_field.to_string(),
    expected: "list",
    got: list_raw.type_name(),
  })?;

  let mut candidates = Vec::with_capacity(values.len());
  for value in values {
    let v = eval_value(schema, value, vars)?;
    if let Value::List(expanded) = v {
      candidates.extend(expanded);
    } else {
      candidates.push(v);
    }
  }

  let hierarchical = alias_name == "tag";
  for item in items {
    let item = item.as_str().ok_or_else(|| FilterError::ValueMismatch {
      field: list_field.to_string(),
      expected: "string elements",
      got: item.type_name(),
    })?;
    for candidate in &candidates {
      let candidate = candidate.as_str().ok_or_else(|| FilterError::Expected {
        expected: "string",
        got: candidate.type_name(),
      })?;
      if item == candidate {
        return Ok(true);
      }
      if hierarchical && item.starts_with(&format!("{candidate}/")) {
        return Ok(true);
      }
    }
  }
  Ok(false)
}

fn eval_element_in(
  schema: &Schema,
  element: &ValueExpr,
  field_name: &str,
  vars: &Bindings,
) -> Result<bool> {
  let field = schema
    .field(field_name)
    .ok_or_else(|| FilterError::UnknownField(field_name.to_string()))?;
  let resolved = if field.kind == FieldKind::VirtualAlias {
    schema
      .resolve_alias(field_name)
      .ok_or_else(|| FilterError::InvalidAlias(field_name.to_string()))?
  } else {
    field
  };
  if resolved.kind != FieldKind::JsonList {
    return Err(FilterError::ValueMismatch {
      field: field_name.to_string(),
      expected: "json list",
      got: "scalar",
    });
  }

  let Some(list_raw) = vars.get(&resolved.name) else {
    return Ok(false);
  };
  if list_raw.is_null() {
    return Ok(false);
  }
  let items = list_raw.as_list().ok_or_else(|| FilterError::ValueMismatch {
    field: resolved.name.clone(),
    expected: "list",
    got: list_raw.type_name(),
  })?;

  let element = eval_value(schema, element, vars)?;
  Ok(items.iter().any(|item| element.loosely_equals(item)))
}

fn eval_comprehension(
  schema: &Schema,
  field_name: &str,
  predicate: &MatchPredicate,
  vars: &Bindings,
) -> Result<bool> {
  let resolved = schema
    .resolve_alias(field_name)
    .ok_or_else(|| FilterError::UnknownField(field_name.to_string()))?;
  if resolved.kind != FieldKind::JsonList {
    return Err(FilterError::ValueMismatch {
      field: field_name.to_string(),
      expected: "json list",
      got: "scalar",
    });
  }

  let Some(list_raw) = vars.get(&resolved.name) else {
    return Ok(false);
  };
  if list_raw.is_null() {
    return Ok(false);
  }
  let items = list_raw.as_list().ok_or_else(|| FilterError::ValueMismatch {
    field: resolved.name.clone(),
    expected: "list",
    got: list_raw.type_name(),
  })?;

  let (arg, test): (&ValueExpr, fn(&str, &str) -> bool) = match predicate {
    MatchPredicate::StartsWith(arg) => (arg, |s, p| s.starts_with(p)),
    MatchPredicate::EndsWith(arg) => (arg, |s, p| s.ends_with(p)),
    MatchPredicate::Contains(arg) => (arg, |s, p| s.contains(p)),
  };
  let needle_raw = eval_value(schema, arg, vars)?;
  let needle = needle_raw.as_str().ok_or_else(|| FilterError::Expected {
    expected: "string",
    got: needle_raw.type_name(),
  })?;

  for item in items {
    let s = item.as_str().ok_or_else(|| FilterError::ValueMismatch {
      field: resolved.name.clone(),
      expected: "string elements",
      got: item.type_name(),
    })?;
    if test(s, needle) {
      return Ok(true);
    }
  }
  Ok(false)
}

pub(crate) fn eval_value(schema: &Schema, expr: &ValueExpr, vars: &Bindings) -> Result<Value> {
  match expr {
    ValueExpr::FieldRef(name) | ValueExpr::ParamRef(name) => vars
      .get(name)
      .cloned()
      .ok_or_else(|| FilterError::MissingBinding(name.clone())),
    ValueExpr::Literal(lit) => Ok(lit.to_value()),
    ValueExpr::Function { name, args } => {
      if name != "size" || args.len() != 1 {
        return Err(FilterError::UnsupportedExpression(format!(
          "unsupported function `{name}`"
        )));
      }
      let arg = eval_value(schema, &args[0], vars)?;
      match arg {
        Value::Null => Ok(Value::Int(0)),
        Value::List(items) => Ok(Value::Int(items.len() as i64)),
        other => Err(FilterError::Expected {
          expected: "list",
          got: other.type_name(),
        }),
      }
    }
  }
}
