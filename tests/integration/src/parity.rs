//! Render/eval parity, checked against in-process SQLite.
//!
//! For each expression the sqlite-dialect fragment is executed over real
//! rows and the selected id set must equal the set predicted by
//! `Program::is_granted` over the same rows. Case-mixed needles are
//! deliberately absent: SQLite's LIKE is ASCII-case-insensitive while the
//! evaluator is case-sensitive, and Postgres diverges the other way with
//! ILIKE.

use std::collections::BTreeSet;

use anyhow::Result;
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;

use rowfence_engine::{
  Bindings, Column, Dialect, Engine, EvalOptions, Field, FieldKind, FieldType, ParamType,
  RenderOptions, Schema, Value,
};

fn schema() -> Schema {
  Schema::new("project")
    .with_field(Field {
      name: "creator_id".into(),
      ty: FieldType::Int,
      column: Column::new("t", "creator_id"),
      ..Field::default()
    })
    .with_field(Field {
      name: "visibility".into(),
      ty: FieldType::String,
      column: Column::new("t", "visibility"),
      ..Field::default()
    })
    .with_field(Field {
      name: "name".into(),
      ty: FieldType::String,
      supports_contains: true,
      column: Column::new("t", "name"),
      ..Field::default()
    })
    .with_field(Field {
      name: "tags".into(),
      kind: FieldKind::JsonList,
      ty: FieldType::String,
      column: Column::new("t", "payload"),
      json_path: vec!["tags".into()],
      ..Field::default()
    })
    .with_field(Field {
      name: "tag".into(),
      kind: FieldKind::VirtualAlias,
      alias_for: "tags".into(),
      ..Field::default()
    })
    .with_field(Field {
      name: "has_task_list".into(),
      kind: FieldKind::JsonBool,
      ty: FieldType::Bool,
      column: Column::new("t", "payload"),
      json_path: vec!["property".into(), "hasTaskList".into()],
      ..Field::default()
    })
}

struct Row {
  id: i64,
  creator_id: i64,
  visibility: &'static str,
  name: &'static str,
  tags: Option<Vec<&'static str>>,
  has_task_list: bool,
}

fn rows() -> Vec<Row> {
  vec![
    Row {
      id: 1,
      creator_id: 10,
      visibility: "PUBLIC",
      name: "infra toolkit",
      tags: Some(vec!["alpha", "beta/gamma"]),
      has_task_list: true,
    },
    Row {
      id: 2,
      creator_id: 11,
      visibility: "PRIVATE",
      name: "notes only",
      tags: Some(vec!["beta"]),
      has_task_list: false,
    },
    Row {
      id: 3,
      creator_id: 10,
      visibility: "PROTECTED",
      name: "misc",
      tags: Some(vec![]),
      has_task_list: false,
    },
    Row {
      id: 4,
      creator_id: 12,
      visibility: "PUBLIC",
      name: "toolbox",
      tags: None,
      has_task_list: false,
    },
  ]
}

fn seed(conn: &Connection) -> Result<()> {
  conn.execute_batch(
    "CREATE TABLE t (id INTEGER PRIMARY KEY, creator_id INTEGER, visibility TEXT, name TEXT, payload TEXT);
     INSERT INTO t VALUES (1, 10, 'PUBLIC', 'infra toolkit', '{\"tags\":[\"alpha\",\"beta/gamma\"],\"property\":{\"hasTaskList\":true}}');
     INSERT INTO t VALUES (2, 11, 'PRIVATE', 'notes only', '{\"tags\":[\"beta\"],\"property\":{\"hasTaskList\":false}}');
     INSERT INTO t VALUES (3, 10, 'PROTECTED', 'misc', '{\"tags\":[]}');
     INSERT INTO t VALUES (4, 12, 'PUBLIC', 'toolbox', '{}');",
  )?;
  Ok(())
}

fn to_sql_value(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Int(v) => SqlValue::Integer(*v),
    Value::Uint(v) => SqlValue::Integer(*v as i64),
    Value::Float(v) => SqlValue::Real(*v),
    Value::Str(s) => SqlValue::Text(s.clone()),
    Value::List(_) => unreachable!("sqlite dialect never binds list args"),
  }
}

fn row_vars(row: &Row, bindings: &Bindings) -> Bindings {
  let mut vars = bindings.clone();
  vars.insert("creator_id".into(), Value::Int(row.creator_id));
  vars.insert("visibility".into(), Value::from(row.visibility));
  vars.insert("name".into(), Value::from(row.name));
  vars.insert(
    "tags".into(),
    match &row.tags {
      Some(tags) => Value::List(tags.iter().map(|t| Value::from(*t)).collect()),
      None => Value::Null,
    },
  );
  vars.insert("has_task_list".into(), Value::Bool(row.has_task_list));
  vars
}

fn check_parity(engine: &Engine, expr: &str, bindings: &Bindings) -> Result<()> {
  let conn = Connection::open_in_memory()?;
  seed(&conn)?;

  let program = engine.compile(expr)?;
  let stmt = program.render_sql(bindings, &RenderOptions::new(Dialect::Sqlite))?;

  let query = if stmt.sql.is_empty() {
    "SELECT id FROM t ORDER BY id".to_string()
  } else {
    format!("SELECT id FROM t WHERE {} ORDER BY id", stmt.sql)
  };
  let mut prepared = conn.prepare(&query)?;
  let selected: BTreeSet<i64> = prepared
    .query_map(
      rusqlite::params_from_iter(stmt.args.iter().map(to_sql_value)),
      |row| row.get(0),
    )?
    .collect::<std::result::Result<_, _>>()?;

  let mut expected = BTreeSet::new();
  for row in rows() {
    let vars = row_vars(&row, bindings);
    if program.is_granted(&vars, &EvalOptions::default())? {
      expected.insert(row.id);
    }
  }

  assert_eq!(
    selected, expected,
    "render/eval divergence for `{expr}` (sql: {})",
    stmt.sql
  );
  Ok(())
}

fn engine() -> Engine {
  Engine::builder(schema())
    .declare("current_user_id", ParamType::Int)
    .declare("q", ParamType::String)
    .build()
    .unwrap()
}

#[test]
fn scalar_comparisons_agree() -> Result<()> {
  let engine = engine();
  check_parity(&engine, "creator_id == 10", &Bindings::new())?;
  check_parity(&engine, "creator_id != 10", &Bindings::new())?;
  check_parity(&engine, "creator_id > 10", &Bindings::new())?;
  Ok(())
}

#[test]
fn membership_agrees() -> Result<()> {
  let engine = engine();
  check_parity(
    &engine,
    r#"visibility in ["PUBLIC","PROTECTED"]"#,
    &Bindings::new(),
  )?;
  Ok(())
}

#[test]
fn string_matches_agree() -> Result<()> {
  let engine = engine();
  check_parity(&engine, r#"name.contains("tool")"#, &Bindings::new())?;
  check_parity(&engine, r#"name.startsWith("infra")"#, &Bindings::new())?;
  check_parity(&engine, r#"name.endsWith("box")"#, &Bindings::new())?;
  Ok(())
}

#[test]
fn json_membership_agrees() -> Result<()> {
  let engine = engine();
  check_parity(&engine, r#""alpha" in tags"#, &Bindings::new())?;
  check_parity(&engine, r#""missing" in tags"#, &Bindings::new())?;
  Ok(())
}

#[test]
fn comprehensions_agree() -> Result<()> {
  let engine = engine();
  let bindings = Bindings::from([("q".to_string(), Value::from("beta"))]);
  check_parity(&engine, "tags.exists(t, t.startsWith(q))", &bindings)?;
  check_parity(&engine, "tags.exists(t, t.contains(q))", &bindings)?;
  let bindings = Bindings::from([("q".to_string(), Value::from("gamma"))]);
  check_parity(&engine, "tags.exists(t, t.endsWith(q))", &bindings)?;
  Ok(())
}

#[test]
fn size_agrees() -> Result<()> {
  let engine = engine();
  check_parity(&engine, "size(tags) > 1", &Bindings::new())?;
  check_parity(&engine, "size(tags) == 0", &Bindings::new())?;
  Ok(())
}

#[test]
fn json_bool_agrees() -> Result<()> {
  let engine = engine();
  check_parity(&engine, "has_task_list", &Bindings::new())?;
  check_parity(
    &engine,
    "!has_task_list || creator_id == 10",
    &Bindings::new(),
  )?;
  Ok(())
}

#[test]
fn hierarchical_tags_agree() -> Result<()> {
  let engine = engine();
  check_parity(&engine, r#"tag in ["beta"]"#, &Bindings::new())?;
  check_parity(&engine, r#"tag in ["alpha"]"#, &Bindings::new())?;
  check_parity(&engine, r#"tag in ["gamma"]"#, &Bindings::new())?;
  Ok(())
}

#[test]
fn bound_params_agree() -> Result<()> {
  let engine = engine();
  let bindings = Bindings::from([("current_user_id".to_string(), Value::Int(10))]);
  check_parity(&engine, "creator_id == current_user_id", &bindings)?;
  check_parity(
    &engine,
    r#"creator_id == current_user_id && visibility == "PUBLIC""#,
    &bindings,
  )?;
  Ok(())
}
