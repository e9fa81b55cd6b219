//! Golden SQL expectations per dialect.
//!
//! These pin the exact output contract: placeholder spelling, argument
//! order, quoting, JSON accessor shapes and null guards.

use rowfence_engine::{
  Bindings, Column, CompareOp, Dialect, DialectTemplates, Engine, EvalOptions, Field, FieldKind,
  FieldType, RenderOptions, Schema, SqlPredicate, SqlPredicateEval, Value,
};

fn test_schema() -> Schema {
  Schema::new("test")
    .with_field(Field {
      name: "creator_id".into(),
      ty: FieldType::Int,
      column: Column::new("t", "creator_id"),
      allowed_comparison_ops: Some([CompareOp::Eq, CompareOp::Neq].into()),
      ..Field::default()
    })
    .with_field(Field {
      name: "visibility".into(),
      ty: FieldType::String,
      column: Column::new("t", "visibility"),
      allowed_comparison_ops: Some([CompareOp::Eq, CompareOp::Neq].into()),
      ..Field::default()
    })
}

fn json_schema() -> Schema {
  Schema::new("json")
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
      allowed_comparison_ops: Some([CompareOp::Eq, CompareOp::Neq].into()),
      ..Field::default()
    })
}

fn string_match_schema() -> Schema {
  Schema::new("string_match").with_field(Field {
    name: "name".into(),
    ty: FieldType::String,
    supports_contains: true,
    column: Column::new("t", "name"),
    ..Field::default()
  })
}

fn opts(dialect: Dialect) -> RenderOptions {
  RenderOptions::new(dialect)
}

#[test]
fn basic_and_with_list_in_postgres() {
  let engine = Engine::new(test_schema()).unwrap();
  let stmt = engine
    .compile_to_statement(
      r#"creator_id == 123 && visibility in ["PUBLIC","PROTECTED"]"#,
      &Bindings::new(),
      &opts(Dialect::Postgres),
    )
    .unwrap();

  assert_eq!(stmt.sql, "(t.creator_id = $1 AND t.visibility IN ($2,$3))");
  assert_eq!(
    stmt.args,
    vec![
      Value::Int(123),
      Value::Str("PUBLIC".into()),
      Value::Str("PROTECTED".into()),
    ]
  );
}

#[test]
fn or_chains_flatten_postgres() {
  let engine = Engine::new(test_schema()).unwrap();

  let stmt = engine
    .compile_to_statement(
      "creator_id == 1 || creator_id == 2 || creator_id == 3",
      &Bindings::new(),
      &opts(Dialect::Postgres),
    )
    .unwrap();
  assert_eq!(
    stmt.sql,
    "(t.creator_id = $1 OR t.creator_id = $2 OR t.creator_id = $3)"
  );
  assert_eq!(stmt.args, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);

  let stmt = engine
    .compile_to_statement(
      r#"creator_id == 1 && visibility == "PUBLIC" && visibility != "PRIVATE""#,
      &Bindings::new(),
      &opts(Dialect::Postgres),
    )
    .unwrap();
  assert_eq!(
    stmt.sql,
    "(t.creator_id = $1 AND t.visibility = $2 AND t.visibility != $3)"
  );
}

#[test]
fn trivial_filter_clears_args() {
  let engine = Engine::new(test_schema()).unwrap();
  let stmt = engine
    .compile_to_statement(
      "true || creator_id == 1",
      &Bindings::new(),
      &opts(Dialect::Postgres),
    )
    .unwrap();
  assert_eq!(stmt.sql, "");
  assert!(stmt.args.is_empty());
}

#[test]
fn unsatisfiable_filter_clears_args() {
  let engine = Engine::new(test_schema()).unwrap();
  let stmt = engine
    .compile_to_statement(
      "false && creator_id == 1",
      &Bindings::new(),
      &opts(Dialect::Postgres),
    )
    .unwrap();
  assert_eq!(stmt.sql, "1 = 0");
  assert!(stmt.args.is_empty());
}

#[test]
fn string_matches_all_dialects() {
  let engine = Engine::builder(string_match_schema())
    .declare("query", rowfence_engine::ParamType::String)
    .build()
    .unwrap();
  let bindings = Bindings::from([("query".to_string(), Value::from("foo"))]);

  let cases = [
    ("name.contains(query)", "%foo%"),
    ("name.startsWith(query)", "foo%"),
    ("name.endsWith(query)", "%foo"),
  ];

  for (expr, pattern) in cases {
    let stmt = engine
      .compile_to_statement(expr, &bindings, &opts(Dialect::Sqlite))
      .unwrap();
    assert_eq!(stmt.sql, "`t`.`name` LIKE ?", "{expr}");
    assert_eq!(stmt.args, vec![Value::Str(pattern.into())]);

    let stmt = engine
      .compile_to_statement(expr, &bindings, &opts(Dialect::Mysql))
      .unwrap();
    assert_eq!(stmt.sql, "`t`.`name` LIKE ?", "{expr}");

    // Postgres matches case-insensitively (dialect-only divergence).
    let stmt = engine
      .compile_to_statement(expr, &bindings, &opts(Dialect::Postgres))
      .unwrap();
    assert_eq!(stmt.sql, "t.name ILIKE $1", "{expr}");
    assert_eq!(stmt.args, vec![Value::Str(pattern.into())]);
  }
}

#[test]
fn empty_needle_is_trivial() {
  let engine = Engine::builder(string_match_schema())
    .declare("query", rowfence_engine::ParamType::String)
    .build()
    .unwrap();
  let bindings = Bindings::from([("query".to_string(), Value::from(""))]);
  let stmt = engine
    .compile_to_statement("name.contains(query)", &bindings, &opts(Dialect::Postgres))
    .unwrap();
  assert_eq!(stmt.sql, "");
}

#[test]
fn element_in_json_list_postgres() {
  let engine = Engine::new(json_schema()).unwrap();
  let stmt = engine
    .compile_to_statement(r#""foo" in tags"#, &Bindings::new(), &opts(Dialect::Postgres))
    .unwrap();
  assert_eq!(stmt.sql, "t.payload->'tags' @> jsonb_build_array($1::json)");
  assert_eq!(stmt.args, vec![Value::Str("\"foo\"".into())]);
}

#[test]
fn comprehension_starts_with_postgres() {
  let engine = Engine::builder(json_schema())
    .declare("q", rowfence_engine::ParamType::String)
    .build()
    .unwrap();
  let bindings = Bindings::from([("q".to_string(), Value::from("foo"))]);
  let stmt = engine
    .compile_to_statement(
      "tags.exists(t, t.startsWith(q))",
      &bindings,
      &opts(Dialect::Postgres),
    )
    .unwrap();
  assert_eq!(
    stmt.sql,
    "((t.payload->'tags' @> jsonb_build_array($1::json) OR (t.payload->'tags')::text LIKE $2) AND t.payload->'tags' IS NOT NULL AND jsonb_array_length(t.payload->'tags') > 0)"
  );
  assert_eq!(
    stmt.args,
    vec![Value::Str("\"foo\"".into()), Value::Str("%\"foo%".into())]
  );
}

#[test]
fn comprehension_contains_all_dialects() {
  let engine = Engine::builder(json_schema())
    .declare("q", rowfence_engine::ParamType::String)
    .build()
    .unwrap();
  let bindings = Bindings::from([("q".to_string(), Value::from("foo"))]);

  let stmt = engine
    .compile_to_statement(
      "tags.exists(t, t.contains(q))",
      &bindings,
      &opts(Dialect::Sqlite),
    )
    .unwrap();
  assert_eq!(
    stmt.sql,
    "(JSON_EXTRACT(`t`.`payload`, '$.tags') LIKE ? AND JSON_EXTRACT(`t`.`payload`, '$.tags') IS NOT NULL AND JSON_EXTRACT(`t`.`payload`, '$.tags') != '[]')"
  );
  assert_eq!(stmt.args, vec![Value::Str("%foo%".into())]);

  let stmt = engine
    .compile_to_statement(
      "tags.exists(t, t.contains(q))",
      &bindings,
      &opts(Dialect::Mysql),
    )
    .unwrap();
  assert_eq!(
    stmt.sql,
    "(JSON_EXTRACT(`t`.`payload`, '$.tags') LIKE ? AND JSON_EXTRACT(`t`.`payload`, '$.tags') IS NOT NULL AND JSON_LENGTH(JSON_EXTRACT(`t`.`payload`, '$.tags')) > 0)"
  );

  let stmt = engine
    .compile_to_statement(
      "tags.exists(t, t.contains(q))",
      &bindings,
      &opts(Dialect::Postgres),
    )
    .unwrap();
  assert_eq!(
    stmt.sql,
    "((t.payload->'tags')::text LIKE $1 AND t.payload->'tags' IS NOT NULL AND jsonb_array_length(t.payload->'tags') > 0)"
  );
}

#[test]
fn hierarchical_tag_alias_postgres() {
  let engine = Engine::new(json_schema()).unwrap();
  let stmt = engine
    .compile_to_statement(r#"tag in ["foo"]"#, &Bindings::new(), &opts(Dialect::Postgres))
    .unwrap();
  assert_eq!(
    stmt.sql,
    "(t.payload->'tags' @> jsonb_build_array($1::json) OR (t.payload->'tags')::text LIKE $2)"
  );
  assert_eq!(
    stmt.args,
    vec![Value::Str("\"foo\"".into()), Value::Str("%\"foo/%".into())]
  );
}

#[test]
fn size_comparison_symmetric_operand_order() {
  let engine = Engine::new(json_schema()).unwrap();

  let stmt = engine
    .compile_to_statement("size(tags) > 0", &Bindings::new(), &opts(Dialect::Postgres))
    .unwrap();
  assert_eq!(
    stmt.sql,
    "jsonb_array_length(COALESCE(t.payload->'tags', '[]'::jsonb)) > $1"
  );
  assert_eq!(stmt.args, vec![Value::Int(0)]);

  // `0 < size(tags)` swaps sides by inverting the operator.
  let stmt = engine
    .compile_to_statement("0 < size(tags)", &Bindings::new(), &opts(Dialect::Postgres))
    .unwrap();
  assert_eq!(
    stmt.sql,
    "jsonb_array_length(COALESCE(t.payload->'tags', '[]'::jsonb)) > $1"
  );
}

#[test]
fn null_comparison_renders_is_null() {
  let schema = Schema::new("nulls").with_field(Field {
    name: "visibility".into(),
    ty: FieldType::String,
    column: Column::new("t", "visibility"),
    ..Field::default()
  });
  let engine = Engine::new(schema).unwrap();

  let stmt = engine
    .compile_to_statement("visibility == null", &Bindings::new(), &opts(Dialect::Postgres))
    .unwrap();
  assert_eq!(stmt.sql, "t.visibility IS NULL");
  assert!(stmt.args.is_empty());

  let stmt = engine
    .compile_to_statement("visibility != null", &Bindings::new(), &opts(Dialect::Postgres))
    .unwrap();
  assert_eq!(stmt.sql, "t.visibility IS NOT NULL");
}

#[test]
fn list_binding_expands_in_positional_dialects() {
  let engine = Engine::builder(test_schema())
    .declare("allowed", rowfence_engine::ParamType::StringList)
    .build()
    .unwrap();
  let bindings = Bindings::from([(
    "allowed".to_string(),
    Value::from(vec!["PUBLIC", "PROTECTED"]),
  )]);

  let stmt = engine
    .compile_to_statement("visibility in allowed", &bindings, &opts(Dialect::Postgres))
    .unwrap();
  assert_eq!(stmt.sql, "t.visibility IN ($1,$2)");
  assert_eq!(
    stmt.args,
    vec![Value::Str("PUBLIC".into()), Value::Str("PROTECTED".into())]
  );

  // An empty bound list is unsatisfiable.
  let bindings = Bindings::from([("allowed".to_string(), Value::List(vec![]))]);
  let stmt = engine
    .compile_to_statement("visibility in allowed", &bindings, &opts(Dialect::Postgres))
    .unwrap();
  assert_eq!(stmt.sql, "1 = 0");
  assert!(stmt.args.is_empty());
}

#[test]
fn postgres_named_args() {
  let engine = Engine::new(test_schema()).unwrap();
  let stmt = engine
    .compile_to_statement(
      r#"creator_id == 123 && visibility in ["PUBLIC","PROTECTED"]"#,
      &Bindings::new(),
      &opts(Dialect::PostgresNamed),
    )
    .unwrap();

  assert_eq!(stmt.sql, "(t.creator_id = @p1 AND t.visibility = ANY(@p2))");
  assert!(stmt.args.is_empty());
  assert_eq!(stmt.named_args.get("p1"), Some(&Value::Int(123)));
  assert_eq!(
    stmt.named_args.get("p2"),
    Some(&Value::List(vec![
      Value::Str("PUBLIC".into()),
      Value::Str("PROTECTED".into()),
    ]))
  );
}

#[test]
fn table_aliases_and_omitted_qualifier() {
  let engine = Engine::new(test_schema()).unwrap();

  let stmt = engine
    .compile_to_statement(
      r#"creator_id == 1 && visibility == "PUBLIC""#,
      &Bindings::new(),
      &RenderOptions {
        table_aliases: [("t".to_string(), "p".to_string())].into(),
        ..opts(Dialect::Postgres)
      },
    )
    .unwrap();
  assert_eq!(stmt.sql, "(p.creator_id = $1 AND p.visibility = $2)");

  let stmt = engine
    .compile_to_statement(
      r#"creator_id == 1 && visibility == "PUBLIC""#,
      &Bindings::new(),
      &RenderOptions {
        omit_table_qualifier: true,
        ..opts(Dialect::Postgres)
      },
    )
    .unwrap();
  assert_eq!(stmt.sql, "(creator_id = $1 AND visibility = $2)");
}

#[test]
fn sql_predicate_all_dialects() {
  let schema = Schema::new("sql_predicate").with_field(Field {
    name: "creator_id".into(),
    ty: FieldType::Int,
    column: Column::new("t", "creator_id"),
    allowed_comparison_ops: Some([CompareOp::Eq].into()),
    ..Field::default()
  });

  let engine = Engine::builder(schema)
    .declare("current_user_id", rowfence_engine::ParamType::Int)
    .with_sql_predicate(
      "is_creator",
      SqlPredicate {
        sql: DialectTemplates::default_only("EXISTS (SELECT 1 WHERE {{creator_id}} = ?)"),
        eval: Some(SqlPredicateEval::new(|_schema, vars, args, _opts| {
          let creator = vars.get("creator_id").and_then(|v| v.as_i64().ok());
          let current = args.first().and_then(|v| v.as_i64().ok());
          Ok(creator.is_some() && creator == current)
        })),
      },
    )
    .build()
    .unwrap();

  let bindings = Bindings::from([("current_user_id".to_string(), Value::Int(123))]);
  let expr = r#"sql("is_creator", [current_user_id])"#;

  let stmt = engine
    .compile_to_statement(expr, &bindings, &opts(Dialect::Sqlite))
    .unwrap();
  assert_eq!(stmt.sql, "EXISTS (SELECT 1 WHERE `t`.`creator_id` = ?)");
  assert_eq!(stmt.args, vec![Value::Int(123)]);

  let stmt = engine
    .compile_to_statement(expr, &bindings, &opts(Dialect::Postgres))
    .unwrap();
  assert_eq!(stmt.sql, "EXISTS (SELECT 1 WHERE t.creator_id = $1)");

  // In-memory evaluation goes through the registered callback.
  let program = engine.compile(expr).unwrap();
  let vars = Bindings::from([
    ("creator_id".to_string(), Value::Int(123)),
    ("current_user_id".to_string(), Value::Int(123)),
  ]);
  assert!(program.is_granted(&vars, &EvalOptions::default()).unwrap());
}

#[test]
fn sql_predicate_subquery_keeps_numbering_postgres() {
  let schema = Schema::new("sql_predicate_subquery")
    .with_field(Field {
      name: "project_id".into(),
      ty: FieldType::Int,
      column: Column::new("p", "id"),
      ..Field::default()
    })
    .with_field(Field {
      name: "creator_id".into(),
      ty: FieldType::Int,
      column: Column::new("p", "creator_id"),
      allowed_comparison_ops: Some([CompareOp::Eq].into()),
      ..Field::default()
    });

  let engine = Engine::builder(schema)
    .declare("current_user_id", rowfence_engine::ParamType::Int)
    .with_sql_predicate(
      "project_member",
      SqlPredicate {
        sql: DialectTemplates {
          postgres: "EXISTS (SELECT 1 FROM project_member pm WHERE pm.project_id = {{project_id}} AND pm.user_id = ?::bigint AND pm.status = 'ACTIVE')".into(),
          ..DialectTemplates::default()
        },
        eval: None,
      },
    )
    .build()
    .unwrap();

  let bindings = Bindings::from([("current_user_id".to_string(), Value::Int(1001))]);
  let expr = r#"creator_id == current_user_id || sql("project_member", [current_user_id])"#;

  let stmt = engine
    .compile_to_statement(expr, &bindings, &opts(Dialect::Postgres))
    .unwrap();
  assert_eq!(
    stmt.sql,
    "(p.creator_id = $1 OR EXISTS (SELECT 1 FROM project_member pm WHERE pm.project_id = p.id AND pm.user_id = $2::bigint AND pm.status = 'ACTIVE'))"
  );
  assert_eq!(stmt.args, vec![Value::Int(1001), Value::Int(1001)]);

  // Named-args variant of the same statement.
  let stmt = engine
    .compile_to_statement(expr, &bindings, &opts(Dialect::PostgresNamed))
    .unwrap();
  assert_eq!(
    stmt.sql,
    "(p.creator_id = @p1 OR EXISTS (SELECT 1 FROM project_member pm WHERE pm.project_id = p.id AND pm.user_id = @p2::bigint AND pm.status = 'ACTIVE'))"
  );
  assert!(stmt.args.is_empty());
  assert_eq!(stmt.named_args.get("p1"), Some(&Value::Int(1001)));
  assert_eq!(stmt.named_args.get("p2"), Some(&Value::Int(1001)));
}

#[test]
fn compose_offset_law() {
  let engine = Engine::new(test_schema()).unwrap();
  let c1 = engine.compile("creator_id == 1").unwrap();
  let c2 = engine
    .compile(r#"visibility in ["PUBLIC","PROTECTED"]"#)
    .unwrap();

  let first = c1
    .render_sql(&Bindings::new(), &opts(Dialect::Postgres))
    .unwrap();
  let second = c2
    .render_sql(
      &Bindings::new(),
      &RenderOptions {
        placeholder_offset: first.args.len(),
        ..opts(Dialect::Postgres)
      },
    )
    .unwrap();

  assert_eq!(first.sql, "t.creator_id = $1");
  assert_eq!(second.sql, "t.visibility IN ($2,$3)");
}

#[test]
fn timestamp_expression_override_wraps_column() {
  let schema = Schema::new("ts").with_field(Field {
    name: "created_at".into(),
    ty: FieldType::Timestamp,
    column: Column::new("t", "created_at"),
    expressions: [(
      Dialect::Postgres,
      "EXTRACT(EPOCH FROM %s)::bigint".to_string(),
    )]
    .into(),
    ..Field::default()
  });
  let engine = Engine::new(schema).unwrap();

  let stmt = engine
    .compile_to_statement(
      "created_at < now() - 86400 * 7",
      &Bindings::new(),
      &opts(Dialect::Postgres),
    )
    .unwrap();
  assert_eq!(
    stmt.sql,
    "EXTRACT(EPOCH FROM t.created_at)::bigint < $1"
  );
  assert_eq!(stmt.args.len(), 1);
}
