//! Semantic checking: identifier resolution and operand typing.
//!
//! Runs after macro expansion and before IR building. Every identifier must
//! resolve to a schema field or a declared parameter; comparisons are
//! checked for operand compatibility where both sides have a known type.
//! The pass validates — it does not annotate; the IR builder re-walks the
//! tree with its own bucketing rules.

use std::collections::HashMap;

use crate::error::{FilterError, Result};
use crate::expr::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::schema::{FieldKind, FieldType, Schema};

/// Declared type of an extra expression parameter (a variable that is not
/// a schema field, bound at render/eval time).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  Int,
  String,
  Bool,
  StringList,
  IntList,
}

/// Inferred type of an expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ty {
  Int,
  Float,
  String,
  Bool,
  Null,
  StringList,
  IntList,
}

impl Ty {
  fn is_numeric(self) -> bool {
    matches!(self, Ty::Int | Ty::Float)
  }

  fn is_list(self) -> bool {
    matches!(self, Ty::StringList | Ty::IntList)
  }

  fn element(self) -> Option<Ty> {
    match self {
      Ty::StringList => Some(Ty::String),
      Ty::IntList => Some(Ty::Int),
      _ => None,
    }
  }

  fn name(self) -> &'static str {
    match self {
      Ty::Int => "int",
      Ty::Float => "float",
      Ty::String => "string",
      Ty::Bool => "bool",
      Ty::Null => "null",
      Ty::StringList => "list<string>",
      Ty::IntList => "list<int>",
    }
  }
}

fn param_ty(p: ParamType) -> Ty {
  match p {
    ParamType::Int => Ty::Int,
    ParamType::String => Ty::String,
    ParamType::Bool => Ty::Bool,
    ParamType::StringList => Ty::StringList,
    ParamType::IntList => Ty::IntList,
  }
}

fn field_ty(kind: FieldKind, ty: FieldType) -> Ty {
  if kind == FieldKind::JsonList {
    return Ty::StringList;
  }
  match ty {
    FieldType::String => Ty::String,
    FieldType::Int | FieldType::Timestamp => Ty::Int,
    FieldType::Bool => Ty::Bool,
  }
}

/// Checker state: schema fields, declared params, and comprehension
/// iteration variables currently in scope.
pub struct Checker<'a> {
  schema: &'a Schema,
  params: &'a HashMap<String, ParamType>,
  locals: Vec<(String, Ty)>,
}

impl<'a> Checker<'a> {
  pub fn new(schema: &'a Schema, params: &'a HashMap<String, ParamType>) -> Self {
    Self {
      schema,
      params,
      locals: Vec::new(),
    }
  }

  /// Validate the expression; errors carry the offending identifier or
  /// call name.
  pub fn check(mut self, expr: &Expr) -> Result<()> {
    self.infer(expr).map(|_| ())
  }

  fn lookup(&self, name: &str) -> Result<Ty> {
    if let Some((_, ty)) = self.locals.iter().rev().find(|(n, _)| n == name) {
      return Ok(*ty);
    }
    if let Some(field) = self.schema.field(name) {
      // Aliases type as their target.
      let concrete = self
        .schema
        .resolve_alias(name)
        .ok_or_else(|| FilterError::InvalidAlias(name.to_string()))?;
      // A virtual alias over a json list reads as a scalar element.
      if field.kind == FieldKind::VirtualAlias && concrete.kind == FieldKind::JsonList {
        return Ok(Ty::String);
      }
      return Ok(field_ty(concrete.kind, concrete.ty));
    }
    if let Some(p) = self.params.get(name) {
      return Ok(param_ty(*p));
    }
    Err(FilterError::UnknownIdentifier(name.to_string()))
  }

  fn infer(&mut self, expr: &Expr) -> Result<Ty> {
    match expr {
      Expr::Ident(name) => self.lookup(name),

      Expr::Literal(lit) => Ok(match lit {
        Literal::Int(_) => Ty::Int,
        Literal::Float(_) => Ty::Float,
        Literal::Str(_) => Ty::String,
        Literal::Bool(_) => Ty::Bool,
        Literal::Null => Ty::Null,
      }),

      Expr::List(items) => {
        // Element type of the first item wins; the rest must agree.
        let mut elem: Option<Ty> = None;
        for item in items {
          let ty = self.infer(item)?;
          match elem {
            None => elem = Some(ty),
            Some(prev) if compatible(prev, ty) => {}
            Some(prev) => {
              return Err(FilterError::ComparisonMismatch {
                left: prev.name(),
                op: crate::schema::CompareOp::Eq,
                right: ty.name(),
              })
            }
          }
        }
        Ok(match elem {
          Some(Ty::String) => Ty::StringList,
          _ => Ty::IntList,
        })
      }

      Expr::Unary { op, expr } => {
        let inner = self.infer(expr)?;
        match op {
          UnaryOp::Not => {
            if inner != Ty::Bool {
              return Err(FilterError::Expected {
                expected: "bool",
                got: inner.name(),
              });
            }
            Ok(Ty::Bool)
          }
          UnaryOp::Neg => {
            if !inner.is_numeric() {
              return Err(FilterError::Expected {
                expected: "numeric",
                got: inner.name(),
              });
            }
            Ok(inner)
          }
        }
      }

      Expr::Binary { op, left, right } => {
        let lt = self.infer(left)?;
        let rt = self.infer(right)?;
        match op {
          BinaryOp::And | BinaryOp::Or => {
            for ty in [lt, rt] {
              if ty != Ty::Bool {
                return Err(FilterError::Expected {
                  expected: "bool",
                  got: ty.name(),
                });
              }
            }
            Ok(Ty::Bool)
          }
          BinaryOp::Eq | BinaryOp::Ne => {
            if lt.is_list() || rt.is_list() {
              return Err(FilterError::UnsupportedExpression(
                "list values do not support comparison; use `in`".into(),
              ));
            }
            if lt != Ty::Null && rt != Ty::Null && !compatible(lt, rt) {
              return Err(FilterError::ComparisonMismatch {
                left: lt.name(),
                op: crate::schema::CompareOp::Eq,
                right: rt.name(),
              });
            }
            Ok(Ty::Bool)
          }
          BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            // Ordered comparison admits no nulls and no bools.
            if lt == Ty::Null || rt == Ty::Null {
              return Err(FilterError::NullComparison(crate::schema::CompareOp::Lt));
            }
            if lt == Ty::Bool || rt == Ty::Bool || !compatible(lt, rt) {
              return Err(FilterError::ComparisonMismatch {
                left: lt.name(),
                op: crate::schema::CompareOp::Lt,
                right: rt.name(),
              });
            }
            Ok(Ty::Bool)
          }
          BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
            if !lt.is_numeric() || !rt.is_numeric() {
              return Err(FilterError::Expected {
                expected: "numeric",
                got: if lt.is_numeric() { rt.name() } else { lt.name() },
              });
            }
            Ok(Ty::Int)
          }
        }
      }

      Expr::In { left, right } => {
        let lt = self.infer(left)?;
        let rt = self.infer(right)?;
        if !rt.is_list() {
          return Err(FilterError::Expected {
            expected: "list",
            got: rt.name(),
          });
        }
        if let Some(elem) = rt.element() {
          if !compatible(lt, elem) {
            return Err(FilterError::ComparisonMismatch {
              left: lt.name(),
              op: crate::schema::CompareOp::Eq,
              right: elem.name(),
            });
          }
        }
        Ok(Ty::Bool)
      }

      Expr::Call {
        target,
        function,
        args,
      } => self.infer_call(target.as_deref(), function, args),
    }
  }

  fn infer_call(&mut self, target: Option<&Expr>, function: &str, args: &[Expr]) -> Result<Ty> {
    match (target, function) {
      (Some(target), "contains" | "startsWith" | "endsWith") => {
        let tt = self.infer(target)?;
        if tt != Ty::String {
          return Err(FilterError::Expected {
            expected: "string",
            got: tt.name(),
          });
        }
        if args.len() != 1 {
          return Err(FilterError::UnsupportedExpression(format!(
            "{function}() expects exactly one argument"
          )));
        }
        let at = self.infer(&args[0])?;
        if at != Ty::String {
          return Err(FilterError::Expected {
            expected: "string",
            got: at.name(),
          });
        }
        Ok(Ty::Bool)
      }

      (Some(target), "exists" | "all") => {
        let tt = self.infer(target)?;
        if tt != Ty::StringList {
          return Err(FilterError::InvalidComprehension(format!(
            "range must be a string list, got {}",
            tt.name()
          )));
        }
        if args.len() != 2 {
          return Err(FilterError::InvalidComprehension(format!(
            "{function}() expects an iteration variable and a predicate"
          )));
        }
        let iter_var = args[0].as_ident().ok_or_else(|| {
          FilterError::InvalidComprehension("iteration variable must be an identifier".into())
        })?;
        self.locals.push((iter_var.to_string(), Ty::String));
        let body = self.infer(&args[1]);
        self.locals.pop();
        if body? != Ty::Bool {
          return Err(FilterError::InvalidComprehension(
            "predicate must be boolean".into(),
          ));
        }
        Ok(Ty::Bool)
      }

      (None, "size") => {
        if args.len() != 1 {
          return Err(FilterError::UnsupportedExpression(
            "size() expects one argument".into(),
          ));
        }
        let at = self.infer(&args[0])?;
        if !at.is_list() {
          return Err(FilterError::Expected {
            expected: "list",
            got: at.name(),
          });
        }
        Ok(Ty::Int)
      }

      (None, "now") => {
        if !args.is_empty() {
          return Err(FilterError::UnsupportedExpression(
            "now() takes no arguments".into(),
          ));
        }
        Ok(Ty::Int)
      }

      (None, "sql") => {
        if args.is_empty() || args.len() > 2 {
          return Err(FilterError::UnsupportedExpression(
            "sql() expects 1 or 2 arguments".into(),
          ));
        }
        if !matches!(args[0], Expr::Literal(Literal::Str(_))) {
          return Err(FilterError::UnsupportedExpression(
            "sql() predicate name must be a string literal".into(),
          ));
        }
        if let Some(list) = args.get(1) {
          match list {
            Expr::List(items) => {
              for item in items {
                self.infer(item)?;
              }
            }
            _ => {
              return Err(FilterError::UnsupportedExpression(
                "sql() args must be a list literal".into(),
              ))
            }
          }
        }
        Ok(Ty::Bool)
      }

      (_, other) => Err(FilterError::UnsupportedExpression(format!(
        "unsupported call expression `{other}`"
      ))),
    }
  }
}

/// Two known types compare cleanly if they are equal, or both numeric.
fn compatible(a: Ty, b: Ty) -> bool {
  a == b || (a.is_numeric() && b.is_numeric())
}
