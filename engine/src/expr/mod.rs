//! Expression front-end for the filter language.
//!
//! # Pipeline
//!
//! ```text
//! &str
//!  └─► lexer (zero-alloc byte scanner)
//!       └─► Token<'_> stream
//!            └─► Parser (recursive descent)
//!                 └─► Expr
//!                      └─► macro expansion (user rewrites)
//!                           └─► semantic check (idents + types)
//!                                └─► AST→IR builder (compile module)
//! ```

pub mod ast;
pub mod lexer;
pub mod macros;
pub mod semantic;

pub use ast::{parse, BinaryOp, Expr, Literal, UnaryOp};
pub use macros::Macro;
pub use semantic::ParamType;
