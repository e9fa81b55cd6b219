//! Engine error types.

use thiserror::Error;

use crate::schema::{CompareOp, Dialect, FieldKind};

/// Broad classification of a [`FilterError`].
///
/// Each variant corresponds to one stage of the pipeline; callers that only
/// care about "where did this fail" can match on [`FilterError::kind`]
/// instead of the full variant set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Schema definition is inconsistent (bad alias target, missing JSON path…).
  Schema,
  /// The filter expression failed to lex, parse, or lower into IR.
  Compile,
  /// A parameter was referenced but absent from bindings/vars.
  Binding,
  /// A runtime value had the wrong type for the operation.
  Type,
  /// A SQL predicate template was malformed.
  Template,
  /// The operation is not defined for the requested dialect.
  Dialect,
}

/// Top-level error type for the filter engine.
///
/// Variants are grouped by pipeline stage. All errors propagate to the
/// caller immediately; no partial statements are ever returned.
#[derive(Debug, Clone, Error)]
pub enum FilterError {
  // ── Schema ─────────────────────────────────────────────────
  #[error("schema: unknown field `{0}`")]
  UnknownField(String),

  #[error("schema: alias `{0}` does not resolve to a concrete field")]
  InvalidAlias(String),

  #[error("schema: field `{field}`: {reason}")]
  InvalidField { field: String, reason: String },

  #[error("schema: duplicate field name `{0}`")]
  DuplicateField(String),

  // ── Compile ────────────────────────────────────────────────
  #[error("compile: filter expression is empty")]
  EmptyFilter,

  #[error("compile: lex error at byte {pos}: {msg}")]
  Lex { pos: usize, msg: &'static str },

  #[error("compile: parse error at token {pos}: {msg}")]
  Parse { pos: usize, msg: String },

  #[error("compile: unknown identifier `{0}`")]
  UnknownIdentifier(String),

  #[error("compile: operator {op} not allowed for field `{field}`")]
  OperatorNotAllowed { field: String, op: CompareOp },

  #[error("compile: field `{field}` does not support {call}")]
  CallNotSupported { field: String, call: &'static str },

  #[error("compile: invalid comprehension: {0}")]
  InvalidComprehension(String),

  #[error("compile: unknown sql predicate `{0}`")]
  UnknownSqlPredicate(String),

  #[error("compile: sql() is not enabled (no predicates registered)")]
  SqlPredicatesDisabled,

  #[error("compile: macro `{name}`: {reason}")]
  MacroExpansion { name: String, reason: String },

  #[error("compile: {0}")]
  UnsupportedExpression(String),

  // ── Binding ────────────────────────────────────────────────
  #[error("binding: missing value for `{0}`")]
  MissingBinding(String),

  // ── Type ───────────────────────────────────────────────────
  #[error("type: field `{field}` expects {expected} value, got {got}")]
  ValueMismatch {
    field: String,
    expected: &'static str,
    got: &'static str,
  },

  #[error("type: operator {0} not supported for null comparison")]
  NullComparison(CompareOp),

  #[error("type: comparison type mismatch: {left} {op} {right}")]
  ComparisonMismatch {
    left: &'static str,
    op: CompareOp,
    right: &'static str,
  },

  #[error("type: expected {expected}, got {got}")]
  Expected {
    expected: &'static str,
    got: &'static str,
  },

  // ── Template ───────────────────────────────────────────────
  #[error("template: unterminated {{{{...}}}} placeholder")]
  UnterminatedPlaceholder,

  #[error("template: empty {{{{...}}}} placeholder")]
  EmptyPlaceholder,

  #[error("template: unknown field `{0}` in placeholder")]
  UnknownTemplateField(String),

  #[error("template: field `{field}` (kind {kind}) not supported in placeholders")]
  PlaceholderKind { field: String, kind: FieldKind },

  #[error("template: predicate `{name}`: {reason}")]
  ArgCountMismatch { name: String, reason: String },

  #[error("template: missing SQL template for predicate `{name}` (dialect {dialect})")]
  MissingTemplate { name: String, dialect: Dialect },

  // ── Dialect ────────────────────────────────────────────────
  #[error("dialect: {op} is not defined for {dialect}")]
  Unsupported { dialect: Dialect, op: String },

  // ── Eval ───────────────────────────────────────────────────
  #[error("sql predicate `{0}` does not support in-memory evaluation")]
  PredicateNotEvaluable(String),
}

impl FilterError {
  /// Classify this error by pipeline stage.
  pub fn kind(&self) -> ErrorKind {
    use FilterError::*;
    match self {
      UnknownField(_) | InvalidAlias(_) | InvalidField { .. } | DuplicateField(_) => {
        ErrorKind::Schema
      }
      EmptyFilter
      | Lex { .. }
      | Parse { .. }
      | UnknownIdentifier(_)
      | OperatorNotAllowed { .. }
      | CallNotSupported { .. }
      | InvalidComprehension(_)
      | UnknownSqlPredicate(_)
      | SqlPredicatesDisabled
      | MacroExpansion { .. }
      | UnsupportedExpression(_) => ErrorKind::Compile,
      MissingBinding(_) => ErrorKind::Binding,
      ValueMismatch { .. }
      | NullComparison(_)
      | ComparisonMismatch { .. }
      | Expected { .. }
      | PredicateNotEvaluable(_) => ErrorKind::Type,
      UnterminatedPlaceholder
      | EmptyPlaceholder
      | UnknownTemplateField(_)
      | PlaceholderKind { .. }
      | ArgCountMismatch { .. }
      | MissingTemplate { .. } => ErrorKind::Template,
      Unsupported { .. } => ErrorKind::Dialect,
    }
  }
}

/// Shorthand result type used throughout the engine.
pub type Result<T> = std::result::Result<T, FilterError>;
