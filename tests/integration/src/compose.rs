//! Composer scenarios across the rbac and engine crates.

use std::sync::Arc;

use rowfence_engine::{
  expr::ast::BinaryOp, Bindings, Column, CompareOp, Dialect, EvalOptions, Expr, Field, FieldType,
  Macro, ParamType, RenderOptions, Schema, Value,
};
use rowfence_rbac::{FilterPermission, FilterScope, Permission, RoleStore, StdPermission};

fn filter_schema() -> Schema {
  Schema::new("test")
    .with_field(Field {
      name: "creator_id".into(),
      ty: FieldType::Int,
      column: Column::new("t", "creator_id"),
      allowed_comparison_ops: Some([CompareOp::Eq].into()),
      ..Field::default()
    })
    .with_field(Field {
      name: "visibility".into(),
      ty: FieldType::String,
      column: Column::new("t", "visibility"),
      allowed_comparison_ops: Some([CompareOp::Eq].into()),
      ..Field::default()
    })
}

fn self_user() -> Macro {
  Macro::global("selfUser", 0, |_args| {
    Ok(Expr::binary(
      BinaryOp::Eq,
      Expr::ident("creator_id"),
      Expr::ident("current_user_id"),
    ))
  })
}

fn read() -> Arc<dyn Permission<&'static str>> {
  Arc::new(StdPermission::new("read"))
}

#[test]
fn two_roles_or_with_macro() {
  let store: RoleStore<&str> = RoleStore::new();
  store.assign("r1", FilterPermission::new("read", "selfUser()"));
  store.assign("r2", FilterPermission::new("read", r#"visibility == "PUBLIC""#));

  let program = FilterScope::new(&store, vec!["r1", "r2"], vec![read()], filter_schema())
    .configure_engine(|b| {
      b.declare("current_user_id", ParamType::Int)
        .with_macro(self_user())
    })
    .build()
    .unwrap();

  let bindings = Bindings::from([("current_user_id".to_string(), Value::Int(1))]);
  let stmt = program
    .render_sql(&bindings, &RenderOptions::new(Dialect::Postgres))
    .unwrap();

  assert_eq!(stmt.sql, "(t.creator_id = $1 OR t.visibility = $2)");
  assert_eq!(stmt.args, vec![Value::Int(1), Value::Str("PUBLIC".into())]);
}

#[test]
fn composed_program_evaluates_rows() {
  let store: RoleStore<&str> = RoleStore::new();
  store.assign("r1", FilterPermission::new("read", "selfUser()"));
  store.assign("r2", FilterPermission::new("read", r#"visibility == "PUBLIC""#));

  let program = FilterScope::new(&store, vec!["r1", "r2"], vec![read()], filter_schema())
    .configure_engine(|b| {
      b.declare("current_user_id", ParamType::Int)
        .with_macro(self_user())
    })
    .build()
    .unwrap();

  // Own row, private: visible through r1.
  let vars = Bindings::from([
    ("creator_id".to_string(), Value::Int(1)),
    ("visibility".to_string(), Value::from("PRIVATE")),
    ("current_user_id".to_string(), Value::Int(1)),
  ]);
  assert!(program.is_granted(&vars, &EvalOptions::default()).unwrap());

  // Someone else's public row: visible through r2.
  let vars = Bindings::from([
    ("creator_id".to_string(), Value::Int(2)),
    ("visibility".to_string(), Value::from("PUBLIC")),
    ("current_user_id".to_string(), Value::Int(1)),
  ]);
  assert!(program.is_granted(&vars, &EvalOptions::default()).unwrap());

  // Someone else's private row: invisible.
  let vars = Bindings::from([
    ("creator_id".to_string(), Value::Int(2)),
    ("visibility".to_string(), Value::from("PRIVATE")),
    ("current_user_id".to_string(), Value::Int(1)),
  ]);
  assert!(!program.is_granted(&vars, &EvalOptions::default()).unwrap());
}

#[test]
fn deep_inheritance_chain_contributes_variants() {
  // a ← b ← {c, d}; d also parents e. Permissions attach filters at the
  // leaves; the closure surfaces every variant.
  let store: RoleStore<&str> = RoleStore::new();
  store.assign("c", FilterPermission::new("read", r#"visibility == "PUBLIC""#));
  store.assign("d", FilterPermission::new("read", "selfUser()"));
  store.add_role("b");
  store.add_role("a");
  store.set_parent("a", "b");
  store.set_parents("b", vec!["c", "d"]);

  let program = FilterScope::new(&store, vec!["a"], vec![read()], filter_schema())
    .configure_engine(|b| {
      b.declare("current_user_id", ParamType::Int)
        .with_macro(self_user())
    })
    .build()
    .unwrap();

  let bindings = Bindings::from([("current_user_id".to_string(), Value::Int(5))]);
  let stmt = program
    .render_sql(&bindings, &RenderOptions::new(Dialect::Postgres))
    .unwrap();

  // Closure order: a, b, c, d — variants OR in that order.
  assert_eq!(stmt.sql, "(t.visibility = $1 OR t.creator_id = $2)");
  assert_eq!(stmt.args, vec![Value::Str("PUBLIC".into()), Value::Int(5)]);
}

#[test]
fn cyclic_graph_composes() {
  let store: RoleStore<&str> = RoleStore::new();
  store.assign("a", FilterPermission::new("read", r#"visibility == "PUBLIC""#));
  store.add_role("b");
  store.set_parent("a", "b");
  store.set_parent("b", "a");

  let program = FilterScope::new(&store, vec!["a"], vec![read()], filter_schema())
    .build()
    .unwrap();

  let stmt = program
    .render_sql(&Bindings::new(), &RenderOptions::new(Dialect::Postgres))
    .unwrap();
  assert_eq!(stmt.sql, "t.visibility = $1");
}

#[test]
fn compile_error_in_one_role_aborts_composition() {
  let store: RoleStore<&str> = RoleStore::new();
  store.assign("r1", FilterPermission::new("read", r#"visibility == "PUBLIC""#));
  store.assign("r2", FilterPermission::new("read", "unknown_field == 1"));

  let result = FilterScope::new(&store, vec!["r1", "r2"], vec![read()], filter_schema()).build();
  assert!(result.is_err());
}
