//! AST→IR builder.
//!
//! Lowers a checked expression into the [`Condition`] tree, applying the
//! builder rules: operator allow-lists, element-in vs scalar-in bucketing,
//! comprehension shape recognition, literal/param bucketing and numeric
//! constant folding.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{FilterError, Result};
use crate::expr::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::ir::{
  ComprehensionKind, Condition, IrLiteral, MatchPredicate, StringMatchKind, ValueExpr,
};
use crate::schema::{CompareOp, FieldKind, Schema};
use crate::sql_predicate::SqlPredicate;

pub(crate) struct IrBuilder<'a> {
  schema: &'a Schema,
  predicates: &'a HashMap<String, SqlPredicate>,
}

impl<'a> IrBuilder<'a> {
  pub(crate) fn new(schema: &'a Schema, predicates: &'a HashMap<String, SqlPredicate>) -> Self {
    Self { schema, predicates }
  }

  pub(crate) fn build(&self, expr: &Expr) -> Result<Condition> {
    match expr {
      Expr::Literal(Literal::Bool(v)) => Ok(Condition::Constant(*v)),
      Expr::Literal(Literal::Int(v)) => Ok(Condition::Constant(*v != 0)),
      Expr::Literal(Literal::Float(v)) => Ok(Condition::Constant(*v != 0.0)),
      Expr::Literal(_) => Err(FilterError::UnsupportedExpression(
        "filter must evaluate to a boolean value".into(),
      )),

      Expr::Ident(name) => {
        let field = self
          .schema
          .field(name)
          .ok_or_else(|| FilterError::UnknownIdentifier(name.clone()))?;
        if field.ty != crate::schema::FieldType::Bool {
          return Err(FilterError::UnsupportedExpression(format!(
            "identifier `{name}` is not boolean"
          )));
        }
        Ok(Condition::FieldPredicate {
          field: name.clone(),
        })
      }

      Expr::Unary {
        op: UnaryOp::Not,
        expr,
      } => Ok(Condition::Not(Box::new(self.build(expr)?))),

      Expr::Binary { op, left, right } => match op {
        BinaryOp::And => Ok(Condition::and(self.build(left)?, self.build(right)?)),
        BinaryOp::Or => Ok(Condition::or(self.build(left)?, self.build(right)?)),
        BinaryOp::Eq => self.build_comparison(CompareOp::Eq, left, right),
        BinaryOp::Ne => self.build_comparison(CompareOp::Neq, left, right),
        BinaryOp::Lt => self.build_comparison(CompareOp::Lt, left, right),
        BinaryOp::Le => self.build_comparison(CompareOp::Lte, left, right),
        BinaryOp::Gt => self.build_comparison(CompareOp::Gt, left, right),
        BinaryOp::Ge => self.build_comparison(CompareOp::Gte, left, right),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => Err(FilterError::UnsupportedExpression(
          "arithmetic expression is not a condition".into(),
        )),
      },

      Expr::In { left, right } => self.build_in(left, right),

      Expr::Call {
        target,
        function,
        args,
      } => self.build_call(target.as_deref(), function, args),

      Expr::Unary { .. } | Expr::List(_) => Err(FilterError::UnsupportedExpression(
        "unsupported top-level expression".into(),
      )),
    }
  }

  fn build_call(&self, target: Option<&Expr>, function: &str, args: &[Expr]) -> Result<Condition> {
    match (target, function) {
      (Some(target), "contains") => self.build_string_match(StringMatchKind::Contains, target, args),
      (Some(target), "startsWith") => {
        self.build_string_match(StringMatchKind::StartsWith, target, args)
      }
      (Some(target), "endsWith") => self.build_string_match(StringMatchKind::EndsWith, target, args),
      (Some(target), "exists" | "all") => self.build_comprehension(function, target, args),
      (None, "sql") => self.build_sql_predicate(args),
      (_, other) => Err(FilterError::UnsupportedExpression(format!(
        "unsupported call expression `{other}`"
      ))),
    }
  }

  fn build_comparison(&self, op: CompareOp, left: &Expr, right: &Expr) -> Result<Condition> {
    let left = self.build_value(left)?;
    let right = self.build_value(right)?;

    // If the left side is a field, validate the per-field allow-list and
    // reject kinds that cannot be compared at all.
    if let ValueExpr::FieldRef(name) = &left {
      let field = self
        .schema
        .field(name)
        .ok_or_else(|| FilterError::UnknownIdentifier(name.clone()))?;
      if !field.allows_comparison(op) {
        return Err(FilterError::OperatorNotAllowed {
          field: name.clone(),
          op,
        });
      }
      let concrete = self
        .schema
        .resolve_alias(name)
        .ok_or_else(|| FilterError::InvalidAlias(name.clone()))?;
      if concrete.kind == FieldKind::JsonList {
        return Err(FilterError::CallNotSupported {
          field: name.clone(),
          call: "comparison",
        });
      }
    }

    Ok(Condition::Comparison { left, op, right })
  }

  fn build_in(&self, left: &Expr, right: &Expr) -> Result<Condition> {
    // `element in json_list_field` (possibly through an alias).
    if let Some(name) = right.as_ident() {
      if self.schema.field(name).is_some() {
        let concrete = self
          .schema
          .resolve_alias(name)
          .ok_or_else(|| FilterError::InvalidAlias(name.to_string()))?;
        if concrete.kind == FieldKind::JsonList {
          return Ok(Condition::ElementIn {
            element: self.build_value(left)?,
            field: name.to_string(),
          });
        }
      }
    }

    let left = self.build_value(left)?;

    if let Expr::List(items) = right {
      let values = items
        .iter()
        .map(|item| self.build_value(item))
        .collect::<Result<Vec<_>>>()?;
      return Ok(Condition::In { left, values });
    }

    // `field in some_list_param`: a one-element In holding the list.
    let right = self.build_value(right)?;
    Ok(Condition::In {
      left,
      values: vec![right],
    })
  }

  fn build_string_match(
    &self,
    kind: StringMatchKind,
    target: &Expr,
    args: &[Expr],
  ) -> Result<Condition> {
    let name = target.as_ident().ok_or_else(|| {
      FilterError::UnsupportedExpression(format!("{} requires a field target", kind.method_name()))
    })?;
    let field = self
      .schema
      .field(name)
      .ok_or_else(|| FilterError::UnknownIdentifier(name.to_string()))?;
    if !field.supports_contains {
      return Err(FilterError::CallNotSupported {
        field: name.to_string(),
        call: kind.method_name(),
      });
    }
    if args.len() != 1 {
      return Err(FilterError::UnsupportedExpression(format!(
        "{} expects exactly one argument",
        kind.method_name()
      )));
    }
    let value = self.build_value(&args[0])?;
    require_literal_or_param(&value, kind.method_name())?;

    Ok(Condition::StringMatch {
      kind,
      field: name.to_string(),
      value,
    })
  }

  fn build_comprehension(&self, function: &str, target: &Expr, args: &[Expr]) -> Result<Condition> {
    if function == "all" {
      return Err(FilterError::InvalidComprehension(
        "all() is not supported; use exists() instead".into(),
      ));
    }

    let field_name = target.as_ident().ok_or_else(|| {
      FilterError::InvalidComprehension("range must be a field identifier".into())
    })?;
    let concrete = self
      .schema
      .resolve_alias(field_name)
      .ok_or_else(|| FilterError::UnknownIdentifier(field_name.to_string()))?;
    if concrete.kind != FieldKind::JsonList {
      return Err(FilterError::InvalidComprehension(format!(
        "field `{field_name}` must be a json list"
      )));
    }

    if args.len() != 2 {
      return Err(FilterError::InvalidComprehension(
        "exists() expects an iteration variable and a predicate".into(),
      ));
    }
    let iter_var = args[0].as_ident().ok_or_else(|| {
      FilterError::InvalidComprehension("iteration variable must be an identifier".into())
    })?;

    let predicate = self.build_match_predicate(iter_var, &args[1])?;

    Ok(Condition::Comprehension {
      kind: ComprehensionKind::Exists,
      field: field_name.to_string(),
      iter_var: iter_var.to_string(),
      predicate,
    })
  }

  // Supported predicate shapes: `t.startsWith(x)`, `t.endsWith(x)`,
  // `t.contains(x)` where `t` is the iteration variable.
  fn build_match_predicate(&self, iter_var: &str, expr: &Expr) -> Result<MatchPredicate> {
    let Expr::Call {
      target: Some(target),
      function,
      args,
    } = expr
    else {
      return Err(FilterError::InvalidComprehension(
        "predicate must be a method call on the iteration variable".into(),
      ));
    };

    if target.as_ident() != Some(iter_var) {
      return Err(FilterError::InvalidComprehension(format!(
        "predicate target must be iteration variable `{iter_var}`"
      )));
    }
    if args.len() != 1 {
      return Err(FilterError::InvalidComprehension(format!(
        "predicate `{function}` expects one argument"
      )));
    }
    let arg = self.build_value(&args[0])?;
    require_literal_or_param(&arg, "comprehension predicate")?;

    match function.as_str() {
      "startsWith" => Ok(MatchPredicate::StartsWith(arg)),
      "endsWith" => Ok(MatchPredicate::EndsWith(arg)),
      "contains" => Ok(MatchPredicate::Contains(arg)),
      other => Err(FilterError::InvalidComprehension(format!(
        "unsupported predicate function `{other}`"
      ))),
    }
  }

  fn build_sql_predicate(&self, args: &[Expr]) -> Result<Condition> {
    if self.predicates.is_empty() {
      return Err(FilterError::SqlPredicatesDisabled);
    }
    if args.is_empty() || args.len() > 2 {
      return Err(FilterError::UnsupportedExpression(
        "sql() expects 1 or 2 arguments".into(),
      ));
    }

    let name = match &args[0] {
      Expr::Literal(Literal::Str(name)) if !name.is_empty() => name.clone(),
      _ => {
        return Err(FilterError::UnsupportedExpression(
          "sql() predicate name must be a non-empty string literal".into(),
        ))
      }
    };
    let pred = self
      .predicates
      .get(&name)
      .ok_or_else(|| FilterError::UnknownSqlPredicate(name.clone()))?;

    let mut values = Vec::new();
    if let Some(list) = args.get(1) {
      let Expr::List(items) = list else {
        return Err(FilterError::UnsupportedExpression(
          "sql() args must be a list literal".into(),
        ));
      };
      values.reserve(items.len());
      for item in items {
        let value = self.build_value(item)?;
        require_literal_or_param(&value, "sql() args")?;
        values.push(value);
      }
    }

    Ok(Condition::SqlPredicate {
      name,
      sql: pred.sql.clone(),
      args: values,
      eval: pred.eval.clone(),
    })
  }

  fn build_value(&self, expr: &Expr) -> Result<ValueExpr> {
    if let Some(name) = expr.as_ident() {
      if self.schema.field(name).is_some() {
        return Ok(ValueExpr::FieldRef(name.to_string()));
      }
      return Ok(ValueExpr::ParamRef(name.to_string()));
    }

    if let Expr::Literal(lit) = expr {
      return Ok(ValueExpr::Literal(match lit {
        Literal::Int(v) => IrLiteral::Int(*v),
        Literal::Float(v) => IrLiteral::Float(*v),
        Literal::Str(v) => IrLiteral::Str(v.clone()),
        Literal::Bool(v) => IrLiteral::Bool(*v),
        Literal::Null => IrLiteral::Null,
      }));
    }

    // Nested arithmetic over literals (and now()) folds to one integer.
    if let Some(value) = evaluate_numeric(expr)? {
      return Ok(ValueExpr::Literal(IrLiteral::Int(value)));
    }

    if let Expr::Call {
      target: None,
      function,
      args,
    } = expr
    {
      if function == "size" {
        if args.len() != 1 {
          return Err(FilterError::UnsupportedExpression(
            "size() expects one argument".into(),
          ));
        }
        let arg = self.build_value(&args[0])?;
        return Ok(ValueExpr::Function {
          name: "size".into(),
          args: vec![arg],
        });
      }
    }

    Err(FilterError::UnsupportedExpression(
      "unsupported value expression".into(),
    ))
  }
}

fn require_literal_or_param(value: &ValueExpr, context: &str) -> Result<()> {
  match value {
    ValueExpr::Literal(_) | ValueExpr::ParamRef(_) => Ok(()),
    _ => Err(FilterError::UnsupportedExpression(format!(
      "{context} must be a literal or param"
    ))),
  }
}

/// Fold a numeric expression tree to one integer, if it is one.
///
/// Handles literals, `now()` (unix seconds), unary negation and `+ - *`
/// over foldable operands. Returns `Ok(None)` for anything else.
fn evaluate_numeric(expr: &Expr) -> Result<Option<i64>> {
  match expr {
    Expr::Literal(Literal::Int(v)) => Ok(Some(*v)),
    Expr::Literal(Literal::Float(v)) => Ok(Some(*v as i64)),
    Expr::Unary {
      op: UnaryOp::Neg,
      expr,
    } => Ok(evaluate_numeric(expr)?.map(|v| -v)),
    Expr::Binary { op, left, right } => {
      let fold = match op {
        BinaryOp::Add => i64::wrapping_add,
        BinaryOp::Sub => i64::wrapping_sub,
        BinaryOp::Mul => i64::wrapping_mul,
        _ => return Ok(None),
      };
      let (Some(l), Some(r)) = (evaluate_numeric(left)?, evaluate_numeric(right)?) else {
        return Ok(None);
      };
      Ok(Some(fold(l, r)))
    }
    Expr::Call {
      target: None,
      function,
      args,
    } if function == "now" && args.is_empty() => Ok(Some(unix_now())),
    _ => Ok(None),
  }
}

fn unix_now() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map_or(0, |d| d.as_secs() as i64)
}
