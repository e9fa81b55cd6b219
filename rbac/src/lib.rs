//! # rowfence-rbac
//!
//! Role/permission model and the composer that unions per-role,
//! per-permission row filters into one renderable [`Program`].
//!
//! The RBAC graph itself is a collaborator: anything implementing
//! [`RoleSource`] works. [`RoleStore`] ships as the in-memory default.
//!
//! ## Quick start
//!
//! ```
//! use std::sync::Arc;
//!
//! use rowfence_engine::{Bindings, Column, Dialect, Field, FieldType, RenderOptions, Schema};
//! use rowfence_rbac::{FilterPermission, FilterScope, Permission, RoleStore, StdPermission};
//!
//! let schema = Schema::new("doc").with_field(Field {
//!     name: "visibility".into(),
//!     ty: FieldType::String,
//!     column: Column::new("t", "visibility"),
//!     ..Field::default()
//! });
//!
//! let store: RoleStore<&str> = RoleStore::new();
//! store.assign("viewer", FilterPermission::new("read", r#"visibility == "PUBLIC""#));
//!
//! let read: Arc<dyn Permission<&str>> = Arc::new(StdPermission::new("read"));
//! let program = FilterScope::new(&store, vec!["viewer"], vec![read], schema).build()?;
//!
//! let stmt = program.render_sql(&Bindings::new(), &RenderOptions::new(Dialect::Postgres))?;
//! assert_eq!(stmt.sql, "t.visibility = $1");
//! # Ok::<(), rowfence_rbac::ComposeError>(())
//! ```
//!
//! [`Program`]: rowfence_engine::Program

pub mod compose;
pub mod permission;
pub mod role;

pub use compose::{ClosureCache, ComposeError, FilterScope};
pub use permission::{FilterPermission, Permission, StdPermission};
pub use role::{RoleRecord, RoleSource, RoleStore};
