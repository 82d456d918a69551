//! Integration tests for statement compilation.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use warden_core::catalog::{CollectionDef, FieldDef, FieldType, SchemaSnapshot};
use warden_core::query::{validate_tree, QueryPlanner};
use warden_core::security::{AccessMap, Annotator};
use warden_core::sql::{CompiledQuery, Dialect, SqlCompiler};
use warden_core::Result;
use uuid::Uuid;
use warden_proto::{Action, Filter, Operator, Permission, Query, Value};

fn schema() -> SchemaSnapshot {
    SchemaSnapshot::new(1)
        .with_collection(
            CollectionDef::new("items", "id")
                .with_field(FieldDef::new("id", FieldType::Uuid))
                .with_field(FieldDef::new("label", FieldType::String))
                .with_field(FieldDef::new("count", FieldType::Integer))
                .with_field(FieldDef::new("code", FieldType::BigInteger))
                .with_field(FieldDef::new("ratio", FieldType::Float)),
        )
        .with_collection(
            CollectionDef::new("counters", "id")
                .with_field(FieldDef::new("id", FieldType::Uuid))
                .with_field(FieldDef::new("count", FieldType::Integer)),
        )
        .with_collection(
            CollectionDef::new("notes", "id")
                .with_field(FieldDef::new("id", FieldType::Integer))
                .with_field(FieldDef::new("title", FieldType::String))
                .with_field(FieldDef::new("secret", FieldType::String).concealed())
                .with_field(FieldDef::new("slug", FieldType::String).no_search()),
        )
}

fn compile_as(access: &AccessMap, collection: &str, query: &Query) -> Result<CompiledQuery> {
    let schema = schema();
    let mut tree = QueryPlanner::new(&schema).plan(collection, query)?;
    validate_tree(&schema, &tree)?;
    Annotator::new(&schema, access).annotate(&mut tree)?;
    SqlCompiler::new(&schema, access, Dialect::Postgres).compile(&tree.root)
}

fn compile(collection: &str, query: &Query) -> Result<CompiledQuery> {
    compile_as(&AccessMap::admin(), collection, query)
}

fn ints(values: &[i64]) -> Value {
    Value::List(values.iter().copied().map(Value::Int).collect())
}

#[test]
fn test_parameters_dedup_per_type() {
    let filter = Filter::and(vec![
        Filter::condition("count", Operator::In, ints(&[1, 1, 1])),
        Filter::condition("code", Operator::In, ints(&[100, 5, 100])),
    ]);
    let compiled = compile("items", &Query::new().with_fields(["id"]).with_filter(filter)).unwrap();

    assert_eq!(
        compiled.sql,
        "SELECT \"items\".\"id\" AS \"id\" FROM \"items\" \
         WHERE \"items\".\"count\" IN ($1, $1, $1) AND \"items\".\"code\" IN ($2, $3, $2)"
    );
    assert_eq!(
        compiled.parameters,
        vec![Value::Int(1), Value::Int(100), Value::Int(5)]
    );
}

#[test]
fn test_equal_values_on_different_types_stay_apart() {
    let filter = Filter::and(vec![
        Filter::condition("count", Operator::Eq, 5),
        Filter::condition("ratio", Operator::Eq, 5),
        Filter::condition("count", Operator::Neq, 5),
    ]);
    let compiled = compile("items", &Query::new().with_fields(["id"]).with_filter(filter)).unwrap();

    assert!(compiled.sql.ends_with(
        "WHERE \"items\".\"count\" = $1 AND \"items\".\"ratio\" = $2 AND \"items\".\"count\" <> $1"
    ));
    assert_eq!(compiled.parameters.len(), 2);
}

#[test]
fn test_search_routes_by_column_type() {
    let compiled = compile("items", &Query::new().with_fields(["id"]).with_search("42")).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT \"items\".\"id\" AS \"id\" FROM \"items\" \
         WHERE LOWER(\"items\".\"label\") LIKE $1 OR \"items\".\"count\" = $2 \
         OR \"items\".\"code\" = $3 OR \"items\".\"ratio\" = $4"
    );
    assert_eq!(compiled.parameters[0], Value::from("%42%"));
    assert_eq!(compiled.parameters[1], Value::Int(42));
}

#[test]
fn test_search_without_qualifying_column_matches_nothing() {
    let compiled = compile("counters", &Query::new().with_fields(["id"]).with_search("abc")).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT \"counters\".\"id\" AS \"id\" FROM \"counters\" WHERE 1 = 0"
    );
    assert!(compiled.parameters.is_empty());
}

#[test]
fn test_search_respects_field_access() {
    let access = AccessMap::from_permissions(
        &[Permission::new("items", Action::Read).with_fields(["id", "count"])],
        Action::Read,
    );
    let compiled = compile_as(&access, "items", &Query::new().with_fields(["id"]).with_search("7")).unwrap();
    assert!(compiled.sql.ends_with("WHERE \"items\".\"count\" = $1"));
}

#[test]
fn test_search_is_gated_by_field_cases() {
    let access = AccessMap::from_permissions(
        &[
            Permission::new("items", Action::Read)
                .with_fields(["id", "label"])
                .with_filter(Filter::eq("code", 5)),
            Permission::new("items", Action::Read)
                .with_fields(["id", "count"])
                .with_filter(Filter::eq("code", 6)),
        ],
        Action::Read,
    );
    let compiled = compile_as(&access, "items", &Query::new().with_fields(["id"]).with_search("7")).unwrap();

    assert!(compiled.sql.ends_with(
        " AND ((\"items\".\"code\" = $1 AND LOWER(\"items\".\"label\") LIKE $3) \
         OR (\"items\".\"code\" = $2 AND \"items\".\"count\" = $4))"
    ));
    assert_eq!(
        compiled.parameters,
        vec![Value::Int(5), Value::Int(6), Value::from("%7%"), Value::Int(7)]
    );
}

#[test]
fn test_search_matches_uuid_columns() {
    let term = "A0EEBC999C0B4EF8BB6D6BB9BD380A11";
    let compiled = compile("items", &Query::new().with_fields(["id"]).with_search(term)).unwrap();

    assert!(compiled.sql.ends_with(
        "WHERE \"items\".\"id\" = $1 OR LOWER(\"items\".\"label\") LIKE $2"
    ));
    assert_eq!(
        compiled.parameters,
        vec![
            Value::Uuid(Uuid::parse_str("a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11").unwrap()),
            Value::from("%a0eebc999c0b4ef8bb6d6bb9bd380a11%"),
        ]
    );
}

#[test]
fn test_search_skips_concealed_and_unsearchable_fields() {
    let compiled = compile("notes", &Query::new().with_fields(["id"]).with_search("x")).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT \"notes\".\"id\" AS \"id\" FROM \"notes\" WHERE LOWER(\"notes\".\"title\") LIKE $1"
    );
    assert_eq!(compiled.parameters, vec![Value::from("%x%")]);
}

#[test]
fn test_limit_zero() {
    let compiled = compile("items", &Query::new().with_fields(["id"]).with_limit(0u64)).unwrap();
    assert!(compiled.sql.ends_with(" LIMIT 0"));
}

#[test]
fn test_every_dialect_compiles() {
    let schema = schema();
    let access = AccessMap::admin();
    let query = Query::new()
        .with_fields(["id", "label"])
        .with_filter(Filter::condition("label", Operator::Icontains, "Ab"))
        .with_sort(["-count"])
        .with_limit(10u64)
        .with_offset(20u64);
    let tree = QueryPlanner::new(&schema).plan("items", &query).unwrap();

    let sqlite = SqlCompiler::new(&schema, &access, Dialect::Sqlite)
        .compile(&tree.root)
        .unwrap();
    assert!(sqlite.sql.contains("LOWER(\"items\".\"label\") LIKE ?1"));
    assert!(sqlite.sql.ends_with("LIMIT 10 OFFSET 20"));

    let mysql = SqlCompiler::new(&schema, &access, Dialect::Mysql)
        .compile(&tree.root)
        .unwrap();
    assert!(mysql.sql.contains("LOWER(`items`.`label`) LIKE ?"));
    assert_eq!(mysql.parameters, vec![Value::from("%ab%")]);

    let mssql = SqlCompiler::new(&schema, &access, Dialect::Mssql)
        .compile(&tree.root)
        .unwrap();
    assert!(mssql.sql.contains("LIKE @p1"));
    assert!(mssql.sql.ends_with("OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"));
}

fn leaf() -> impl Strategy<Value = Filter> {
    prop_oneof![
        (0i64..50).prop_map(|n| Filter::condition("count", Operator::Gt, n)),
        (0i64..50).prop_map(|n| Filter::condition("count", Operator::Eq, n)),
        proptest::collection::vec(0i64..10, 1..4)
            .prop_map(|ns| Filter::condition("code", Operator::Nin, ints(&ns))),
        "[a-z]{0,6}".prop_map(|s| Filter::condition("label", Operator::Contains, s)),
        Just(Filter::condition("label", Operator::Null, true)),
        Just(Filter::Empty),
    ]
}

fn filter_tree() -> impl Strategy<Value = Filter> {
    leaf().prop_recursive(4, 24, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 1..4).prop_map(Filter::and),
            proptest::collection::vec(inner.clone(), 1..4).prop_map(Filter::or),
            inner.prop_map(Filter::negate),
        ]
    })
}

proptest! {
    #[test]
    fn prop_double_negation_is_identity(filter in filter_tree()) {
        let plain = compile("items", &Query::new().with_fields(["id"]).with_filter(filter.clone()));
        let doubled = compile(
            "items",
            &Query::new()
                .with_fields(["id"])
                .with_filter(Filter::negate(Filter::negate(filter))),
        );
        prop_assert_eq!(plain.unwrap(), doubled.unwrap());
    }

    #[test]
    fn prop_clean_limits_are_honored(limit in 0u64..1_000_000) {
        let numeric = compile("items", &Query::new().with_fields(["id"]).with_limit(limit)).unwrap();
        let expected = format!(" LIMIT {limit}");
        prop_assert!(numeric.sql.ends_with(&expected));

        let text = limit.to_string();
        let digits = compile("items", &Query::new().with_fields(["id"]).with_limit(text.as_str())).unwrap();
        prop_assert_eq!(numeric, digits);
    }

    #[test]
    fn prop_unclean_limits_are_ignored(text in "[0-9]{0,3}[a-z .+-][0-9a-z]{0,3}") {
        let compiled = compile("items", &Query::new().with_fields(["id"]).with_limit(text.as_str())).unwrap();
        prop_assert!(!compiled.sql.contains("LIMIT"));
        prop_assert!(compiled.parameters.is_empty());
    }

    #[test]
    fn prop_page_becomes_offset(limit in 1u64..500, page in 1u64..50) {
        let compiled = compile(
            "items",
            &Query::new().with_fields(["id"]).with_limit(limit).with_page(page),
        )
        .unwrap();
        let offset = limit * (page - 1);
        let expected = if offset == 0 {
            format!(" LIMIT {limit}")
        } else {
            format!(" LIMIT {limit} OFFSET {offset}")
        };
        prop_assert!(compiled.sql.ends_with(&expected));
    }

    #[test]
    fn prop_oversized_limits_are_clamped(limit in (i64::MAX as u64 + 1)..=u64::MAX) {
        let numeric = compile("items", &Query::new().with_fields(["id"]).with_limit(limit)).unwrap();
        let expected = format!(" LIMIT {}", i64::MAX);
        prop_assert!(numeric.sql.ends_with(&expected));

        let text = limit.to_string();
        let digits = compile("items", &Query::new().with_fields(["id"]).with_limit(text.as_str())).unwrap();
        prop_assert_eq!(numeric, digits);
    }

    #[test]
    fn prop_oversized_offsets_are_clamped(digits in "[1-9][0-9]{19,30}", page in 2u64..1_000) {
        let offset = compile("items", &Query::new().with_fields(["id"]).with_offset(digits.as_str())).unwrap();
        let expected = format!(" OFFSET {}", i64::MAX);
        prop_assert!(offset.sql.ends_with(&expected));

        let paged = compile(
            "items",
            &Query::new().with_fields(["id"]).with_limit(digits.as_str()).with_page(page),
        )
        .unwrap();
        let expected = format!(" LIMIT {max} OFFSET {max}", max = i64::MAX);
        prop_assert!(paged.sql.ends_with(&expected));
    }
}
