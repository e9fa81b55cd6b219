//! Runtime values and bindings.
//!
//! [`Value`] is the single runtime representation flowing through both
//! pipelines: SQL rendering collects values into [`Statement`] args, and
//! in-memory evaluation reads them from a variable map.
//!
//! [`Statement`]: crate::render::Statement

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::FilterError;

/// A runtime scalar or list value.
///
/// Lists appear in two places: a list-typed binding expanded by `in`, and
/// the row value of a `json_list` field during evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  Null,
  Bool(bool),
  Int(i64),
  Uint(u64),
  Float(f64),
  Str(String),
  List(Vec<Value>),
}

/// Runtime values for expression variables which are not schema fields.
///
/// Used as the parameter source during rendering and as the variable source
/// during evaluation (where it also carries schema field values).
pub type Bindings = HashMap<String, Value>;

impl Value {
  /// Short type label used in error messages.
  pub fn type_name(&self) -> &'static str {
    match self {
      Value::Null => "null",
      Value::Bool(_) => "bool",
      Value::Int(_) => "int",
      Value::Uint(_) => "uint",
      Value::Float(_) => "float",
      Value::Str(_) => "string",
      Value::List(_) => "list",
    }
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  /// Coerce to a 64-bit signed integer.
  ///
  /// Accepts int, uint and float sources; floats are truncated. Every
  /// numeric conversion in the engine goes through here so that the
  /// renderer and the evaluator agree.
  pub fn as_i64(&self) -> Result<i64, FilterError> {
    match self {
      Value::Int(v) => Ok(*v),
      Value::Uint(v) => Ok(*v as i64),
      Value::Float(v) => Ok(*v as i64),
      other => Err(FilterError::Expected {
        expected: "integer",
        got: other.type_name(),
      }),
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Str(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  /// View a list-typed value as a slice, if it is one.
  pub fn as_list(&self) -> Option<&[Value]> {
    match self {
      Value::List(items) => Some(items),
      _ => None,
    }
  }

  /// Loose equality used by `in` membership: numerics compare through the
  /// shared int64 coercion, everything else requires matching types.
  pub fn loosely_equals(&self, other: &Value) -> bool {
    match (self, other) {
      (Value::Null, Value::Null) => true,
      (Value::Null, _) | (_, Value::Null) => false,
      (Value::Str(a), Value::Str(b)) => a == b,
      (Value::Bool(a), Value::Bool(b)) => a == b,
      (a, b) => match (a.as_i64(), b.as_i64()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
      },
    }
  }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self {
    Value::Bool(v)
  }
}

impl From<i32> for Value {
  fn from(v: i32) -> Self {
    Value::Int(v as i64)
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self {
    Value::Int(v)
  }
}

impl From<u64> for Value {
  fn from(v: u64) -> Self {
    Value::Uint(v)
  }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self {
    Value::Float(v)
  }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self {
    Value::Str(v.to_string())
  }
}

impl From<String> for Value {
  fn from(v: String) -> Self {
    Value::Str(v)
  }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
  fn from(items: Vec<T>) -> Self {
    Value::List(items.into_iter().map(Into::into).collect())
  }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self {
    match v {
      Some(v) => v.into(),
      None => Value::Null,
    }
  }
}
