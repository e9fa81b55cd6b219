//! # rowfence-engine
//!
//! Row-level authorization filter engine: compiles a small, domain-restricted
//! boolean expression language into dialect-specific SQL fragments for WHERE
//! clauses, or evaluates the same expressions in memory against one row.
//!
//! ## Pipeline
//!
//! ```text
//! expression string
//!  └─► lexer ─► parser ─► macro expansion ─► semantic check
//!       └─► AST→IR builder ─► Condition (IR tree)
//!            └─► [compile hooks]
//!                 ├─► Renderer(dialect, bindings, options) ─► Statement{sql, args}
//!                 └─► Evaluator(vars) ─► bool
//! ```
//!
//! ## Quick start
//!
//! ```
//! use rowfence_engine::{
//!     Bindings, Column, Dialect, Engine, Field, FieldType, RenderOptions, Schema, Value,
//! };
//!
//! let schema = Schema::new("project")
//!     .with_field(Field {
//!         name: "creator_id".into(),
//!         ty: FieldType::Int,
//!         column: Column::new("t", "creator_id"),
//!         ..Field::default()
//!     });
//!
//! let engine = Engine::new(schema)?;
//! let stmt = engine.compile_to_statement(
//!     "creator_id == 123",
//!     &Bindings::new(),
//!     &RenderOptions::new(Dialect::Postgres),
//! )?;
//! assert_eq!(stmt.sql, "t.creator_id = $1");
//! assert_eq!(stmt.args, vec![Value::Int(123)]);
//! # Ok::<(), rowfence_engine::FilterError>(())
//! ```

mod compile;
pub mod engine;
pub mod error;
pub mod eval;
pub mod expr;
pub mod ir;
pub mod record;
pub mod render;
pub mod schema;
pub mod sql_predicate;
pub mod value;

pub use engine::{append_filters, render_condition, CompileHook, Engine, EngineBuilder, Program};
pub use error::{ErrorKind, FilterError};
pub use eval::{evaluate_condition, EvalOptions};
pub use expr::{Expr, Macro, ParamType};
pub use ir::{
  ComprehensionKind, Condition, IrLiteral, LogicalOp, MatchPredicate, StringMatchKind, ValueExpr,
};
pub use record::{schema_from_record, RecordDef, RecordField, RecordType};
pub use render::{RenderOptions, Statement};
pub use schema::{Column, CompareOp, Dialect, Field, FieldKind, FieldType, Schema};
pub use sql_predicate::{DialectTemplates, SqlPredicate, SqlPredicateEval};
pub use value::{Bindings, Value};
