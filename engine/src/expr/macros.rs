//! User-registered expression macros.
//!
//! A macro is a named rewrite applied to global call expressions before
//! semantic checking: `selfUser()` can expand to
//! `creator_id == current_user_id` without the caller ever seeing the
//! expansion. Macros match on name and arity.

use std::fmt;
use std::sync::Arc;

use crate::error::{FilterError, Result};
use crate::expr::ast::Expr;

const MAX_EXPANSION_DEPTH: usize = 32;

type ExpandFn = Arc<dyn Fn(&[Expr]) -> Result<Expr> + Send + Sync>;

/// A named expression rewrite.
#[derive(Clone)]
pub struct Macro {
  name: String,
  arity: usize,
  expand: ExpandFn,
}

impl Macro {
  /// A macro replacing global calls `name(arg, ...)` with the expansion.
  pub fn global<F>(name: impl Into<String>, arity: usize, expand: F) -> Self
  where
    F: Fn(&[Expr]) -> Result<Expr> + Send + Sync + 'static,
  {
    Self {
      name: name.into(),
      arity,
      expand: Arc::new(expand),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

impl fmt::Debug for Macro {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Macro")
      .field("name", &self.name)
      .field("arity", &self.arity)
      .finish()
  }
}

/// Expand all registered macros in the expression, bottom-up.
///
/// An expansion's output is itself expanded again, bounded by a fixed depth
/// so a self-referential macro fails instead of looping.
pub fn expand(expr: Expr, macros: &[Macro]) -> Result<Expr> {
  if macros.is_empty() {
    return Ok(expr);
  }
  expand_at(expr, macros, 0)
}

fn expand_at(expr: Expr, macros: &[Macro], depth: usize) -> Result<Expr> {
  if depth > MAX_EXPANSION_DEPTH {
    return Err(FilterError::MacroExpansion {
      name: "<unknown>".into(),
      reason: "expansion depth exceeded".into(),
    });
  }

  match expr {
    Expr::Unary { op, expr } => Ok(Expr::Unary {
      op,
      expr: Box::new(expand_at(*expr, macros, depth)?),
    }),
    Expr::Binary { op, left, right } => Ok(Expr::Binary {
      op,
      left: Box::new(expand_at(*left, macros, depth)?),
      right: Box::new(expand_at(*right, macros, depth)?),
    }),
    Expr::In { left, right } => Ok(Expr::In {
      left: Box::new(expand_at(*left, macros, depth)?),
      right: Box::new(expand_at(*right, macros, depth)?),
    }),
    Expr::List(items) => Ok(Expr::List(
      items
        .into_iter()
        .map(|item| expand_at(item, macros, depth))
        .collect::<Result<_>>()?,
    )),
    Expr::Call {
      target,
      function,
      args,
    } => {
      let target = match target {
        Some(t) => Some(Box::new(expand_at(*t, macros, depth)?)),
        None => None,
      };
      let args = args
        .into_iter()
        .map(|arg| expand_at(arg, macros, depth))
        .collect::<Result<Vec<_>>>()?;

      if target.is_none() {
        if let Some(mac) = macros
          .iter()
          .find(|m| m.name == function && m.arity == args.len())
        {
          let expanded = (mac.expand)(&args).map_err(|err| FilterError::MacroExpansion {
            name: mac.name.clone(),
            reason: err.to_string(),
          })?;
          // The expansion may reference other macros.
          return expand_at(expanded, macros, depth + 1);
        }
      }

      Ok(Expr::Call {
        target,
        function,
        args,
      })
    }
    leaf @ (Expr::Ident(_) | Expr::Literal(_)) => Ok(leaf),
  }
}
