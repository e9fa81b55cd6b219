//! Engine construction, filter compilation and the compiled [`Program`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::compile::IrBuilder;
use crate::error::{FilterError, Result};
use crate::eval::{evaluate_condition, EvalOptions};
use crate::expr::ast::Expr;
use crate::expr::macros::{expand, Macro};
use crate::expr::semantic::{Checker, ParamType};
use crate::expr::{ast, lexer};
use crate::ir::Condition;
use crate::render::{RenderOptions, Renderer, Statement};
use crate::schema::{Dialect, Schema};
use crate::sql_predicate::SqlPredicate;
use crate::value::{Bindings, Value};

/// A post-compile hook which can rewrite or replace the condition tree.
///
/// Hooks run after parsing, macro expansion, semantic checking and IR
/// building, in registration order. Each receives the schema, the original
/// filter text, the expanded AST and the current condition; returning
/// `None` keeps the condition unchanged. A hook may drop subtrees, but must
/// not introduce references to unknown fields.
pub type CompileHook =
  Arc<dyn Fn(&Schema, &str, &Expr, &Condition) -> Result<Option<Condition>> + Send + Sync>;

/// Parses filter expressions into dialect-agnostic condition trees.
///
/// An engine is immutable after construction; compiling and rendering are
/// safe to invoke concurrently.
pub struct Engine {
  schema: Arc<Schema>,
  params: HashMap<String, ParamType>,
  macros: Vec<Macro>,
  compile_hooks: Vec<CompileHook>,
  sql_predicates: HashMap<String, SqlPredicate>,
}

impl std::fmt::Debug for Engine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Engine")
      .field("schema", &self.schema)
      .field("params", &self.params)
      .field("macros", &self.macros)
      .field("compile_hooks", &self.compile_hooks.len())
      .field("sql_predicates", &self.sql_predicates)
      .finish()
  }
}

/// Builder for configuring an [`Engine`].
pub struct EngineBuilder {
  schema: Schema,
  params: HashMap<String, ParamType>,
  macros: Vec<Macro>,
  compile_hooks: Vec<CompileHook>,
  sql_predicates: HashMap<String, SqlPredicate>,
}

impl Engine {
  /// An engine over the schema with no extra declarations.
  pub fn new(schema: Schema) -> Result<Self> {
    Self::builder(schema).build()
  }

  /// Create a builder for a fully configured engine.
  pub fn builder(schema: Schema) -> EngineBuilder {
    EngineBuilder {
      schema,
      params: HashMap::new(),
      macros: Vec::new(),
      compile_hooks: Vec::new(),
      sql_predicates: HashMap::new(),
    }
  }

  pub fn schema(&self) -> &Schema {
    &self.schema
  }

  /// Parse the filter string into an executable program.
  pub fn compile(&self, filter: &str) -> Result<Program> {
    if filter.trim().is_empty() {
      return Err(FilterError::EmptyFilter);
    }

    let tokens = lexer::tokenize(filter)?;
    let expr = ast::Parser::new(&tokens).parse()?;
    let expr = expand(expr, &self.macros)?;

    Checker::new(&self.schema, &self.params).check(&expr)?;

    let mut cond = IrBuilder::new(&self.schema, &self.sql_predicates).build(&expr)?;

    for hook in &self.compile_hooks {
      if let Some(next) = hook(&self.schema, filter, &expr, &cond)? {
        cond = next;
      }
    }

    debug!(schema = %self.schema.name, filter, "compiled filter expression");

    Ok(Program {
      schema: Arc::clone(&self.schema),
      condition: cond,
    })
  }

  /// Compile and render in a single step.
  pub fn compile_to_statement(
    &self,
    filter: &str,
    bindings: &Bindings,
    opts: &RenderOptions,
  ) -> Result<Statement> {
    self.compile(filter)?.render_sql(bindings, opts)
  }

  /// Compile and evaluate in a single step.
  ///
  /// `vars` holds values for schema fields and any parameter variables.
  pub fn is_granted(&self, filter: &str, vars: &Bindings) -> Result<bool> {
    self.compile(filter)?.is_granted(vars, &EvalOptions::default())
  }
}

impl EngineBuilder {
  /// Declare an extra expression variable (a runtime binding which is not
  /// a schema field).
  pub fn declare(mut self, name: impl Into<String>, ty: ParamType) -> Self {
    self.params.insert(name.into(), ty);
    self
  }

  /// Register an expression macro.
  pub fn with_macro(mut self, mac: Macro) -> Self {
    self.macros.push(mac);
    self
  }

  /// Append a post-compile hook which can rewrite the condition tree.
  pub fn with_compile_hook<F>(mut self, hook: F) -> Self
  where
    F: Fn(&Schema, &str, &Expr, &Condition) -> Result<Option<Condition>> + Send + Sync + 'static,
  {
    self.compile_hooks.push(Arc::new(hook));
    self
  }

  /// Register a custom SQL predicate, referenced from expressions via
  /// `sql("<name>")` or `sql("<name>", [...])`.
  pub fn with_sql_predicate(mut self, name: impl Into<String>, pred: SqlPredicate) -> Self {
    let name = name.into();
    if !name.is_empty() {
      self.sql_predicates.insert(name, pred);
    }
    self
  }

  /// Validate the schema and build the engine.
  pub fn build(self) -> Result<Engine> {
    self.schema.validate()?;
    Ok(Engine {
      schema: Arc::new(self.schema),
      params: self.params,
      macros: self.macros,
      compile_hooks: self.compile_hooks,
      sql_predicates: self.sql_predicates,
    })
  }
}

/// A compiled filter: an immutable condition tree tied to its schema.
#[derive(Debug, Clone)]
pub struct Program {
  schema: Arc<Schema>,
  condition: Condition,
}

impl Program {
  /// Wrap an already-built condition tree.
  ///
  /// Useful when conditions are composed programmatically (e.g. OR across
  /// roles) but a single renderable/evaluable object is still wanted.
  pub fn from_condition(schema: impl Into<Arc<Schema>>, condition: Condition) -> Self {
    Self {
      schema: schema.into(),
      condition,
    }
  }

  pub fn schema(&self) -> &Schema {
    &self.schema
  }

  /// The underlying condition tree.
  pub fn condition(&self) -> &Condition {
    &self.condition
  }

  pub fn into_condition(self) -> Condition {
    self.condition
  }

  /// Render the program into a dialect-specific SQL fragment.
  pub fn render_sql(&self, bindings: &Bindings, opts: &RenderOptions) -> Result<Statement> {
    Renderer::new(&self.schema, opts, bindings).render(&self.condition)
  }

  /// Evaluate the condition tree against an object variable map.
  pub fn is_granted(&self, vars: &Bindings, opts: &EvalOptions) -> Result<bool> {
    evaluate_condition(&self.schema, &self.condition, vars, opts)
  }
}

/// Render a pre-built condition tree into a SQL fragment.
///
/// Useful when composing multiple compiled filters (e.g. OR across roles)
/// before rendering once.
pub fn render_condition(
  schema: &Schema,
  cond: &Condition,
  bindings: &Bindings,
  opts: &RenderOptions,
) -> Result<Statement> {
  Renderer::new(schema, opts, bindings).render(cond)
}

/// Compile each filter and append its `(fragment)` and args, threading the
/// placeholder offset so Postgres `$N` numbering stays contiguous.
pub fn append_filters<S: AsRef<str>>(
  engine: &Engine,
  filters: &[S],
  dialect: Dialect,
  where_clauses: &mut Vec<String>,
  args: &mut Vec<Value>,
) -> Result<()> {
  for filter in filters {
    let opts = RenderOptions {
      placeholder_offset: args.len(),
      ..RenderOptions::new(dialect)
    };
    let stmt = engine.compile_to_statement(filter.as_ref(), &Bindings::new(), &opts)?;
    if stmt.sql.is_empty() {
      continue;
    }
    where_clauses.push(format!("({})", stmt.sql));
    args.extend(stmt.args);
  }
  Ok(())
}
