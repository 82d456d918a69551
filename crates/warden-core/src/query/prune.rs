//! Field pruning.
//!
//! Executed items still carry the helper columns the compiler added for
//! joins, keys, and visibility. Pruning rebuilds each item from the tree so
//! only requested keys remain, in request order.

use warden_proto::{Item, Value};

use crate::catalog::{FieldType, SchemaSnapshot};
use crate::sql::{column_key, AGGREGATE_SEPARATOR};

use super::ast::{Level, Node};

/// Strip helper columns and reshape aggregate outputs.
///
/// - one-to-many children requested without sub-fields become lists of
///   primary keys, any-to-one children the bare primary key
/// - `sum->price` becomes `{"sum": {"price": ...}}`
/// - integers read from boolean columns become booleans
pub fn prune(schema: &SchemaSnapshot, level: &Level, items: Vec<Item>) -> Vec<Item> {
    if level.query.is_aggregate() {
        return items
            .into_iter()
            .map(|item| prune_aggregate(schema, level, item))
            .collect();
    }
    items
        .into_iter()
        .map(|item| prune_item(schema, level, item))
        .collect()
}

fn prune_item(schema: &SchemaSnapshot, level: &Level, mut item: Item) -> Item {
    let mut pruned = Item::with_capacity(level.children.len());
    for child in &level.children {
        let key = child.field_key();
        let value = item.swap_remove(key).unwrap_or(Value::Null);
        let value = match child {
            Node::Field(node) => coerce_boolean(schema, &level.collection, &node.name, value),
            Node::Function(_) => value,
            Node::M2O(node) => match value {
                Value::Object(nested) => Value::Object(prune_item(schema, &node.level, nested)),
                other => other,
            },
            Node::O2M(node) => match value {
                Value::List(rows) => Value::List(
                    rows.into_iter()
                        .map(|row| match row {
                            Value::Object(row) => prune_related(schema, &node.level, row),
                            other => other,
                        })
                        .collect(),
                ),
                other => other,
            },
            Node::A2O(node) => match value {
                Value::Object(row) => {
                    let target = node
                        .relation
                        .one_collection_field
                        .as_deref()
                        .and_then(|field| item.get(&column_key(field)))
                        .and_then(Value::as_str);
                    match target.and_then(|target| node.levels.get(target)) {
                        Some(target_level) => prune_related(schema, target_level, row),
                        None => Value::Null,
                    }
                }
                other => other,
            },
        };
        pruned.insert(key.to_string(), value);
    }
    pruned
}

/// A related row: its primary key when no sub-fields were requested.
fn prune_related(schema: &SchemaSnapshot, level: &Level, row: Item) -> Value {
    if level.children.is_empty() {
        let primary = schema
            .collection(&level.collection)
            .map(|collection| column_key(&collection.primary));
        return primary
            .and_then(|key| row.get(&key).cloned())
            .unwrap_or(Value::Null);
    }
    Value::Object(prune_item(schema, level, row))
}

fn prune_aggregate(schema: &SchemaSnapshot, level: &Level, item: Item) -> Item {
    let mut pruned = Item::with_capacity(item.len());
    for (key, value) in item {
        if key.starts_with('$') {
            continue;
        }
        match key.split_once(AGGREGATE_SEPARATOR) {
            Some((function, field)) => {
                let entry = pruned
                    .entry(function.to_string())
                    .or_insert_with(|| Value::Object(Item::new()));
                if let Some(fields) = entry.as_object_mut() {
                    fields.insert(field.to_string(), value);
                }
            }
            None => {
                let value = match level.child(&key) {
                    Some(Node::Field(node)) => {
                        coerce_boolean(schema, &level.collection, &node.name, value)
                    }
                    _ => value,
                };
                pruned.insert(key, value);
            }
        }
    }
    pruned
}

fn coerce_boolean(schema: &SchemaSnapshot, collection: &str, field: &str, value: Value) -> Value {
    let boolean = schema
        .collection(collection)
        .and_then(|c| c.field(field))
        .is_some_and(|f| f.field_type == FieldType::Boolean);
    match value {
        Value::Int(flag) if boolean => Value::Bool(flag != 0),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CollectionDef, FieldDef, RelationDef};
    use crate::query::QueryPlanner;
    use pretty_assertions::assert_eq;
    use warden_proto::{AggregateFunction, Query};

    fn schema() -> SchemaSnapshot {
        SchemaSnapshot::new(1)
            .with_collection(
                CollectionDef::new("articles", "id")
                    .with_field(FieldDef::new("id", FieldType::Integer))
                    .with_field(FieldDef::new("title", FieldType::String))
                    .with_field(FieldDef::new("featured", FieldType::Boolean))
                    .with_field(FieldDef::alias("comments")),
            )
            .with_collection(
                CollectionDef::new("comments", "id")
                    .with_field(FieldDef::new("id", FieldType::Integer))
                    .with_field(FieldDef::new("article", FieldType::Integer)),
            )
            .with_relation(
                RelationDef::many_to_one("comments", "article", "articles").with_one_field("comments"),
            )
    }

    fn item(pairs: Vec<(&str, Value)>) -> Item {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_prune_helpers_and_order() {
        let schema = schema();
        let tree = QueryPlanner::new(&schema)
            .plan("articles", &Query::new().with_fields(["title", "featured", "comments"]))
            .unwrap();

        let executed = item(vec![
            ("$col:id", Value::Int(1)),
            ("featured", Value::Int(1)),
            ("title", "Hello".into()),
            (
                "comments",
                Value::List(vec![
                    Value::Object(item(vec![("$col:article", Value::Int(1)), ("$col:id", Value::Int(10))])),
                    Value::Object(item(vec![("$col:article", Value::Int(1)), ("$col:id", Value::Int(11))])),
                ]),
            ),
        ]);

        let pruned = prune(&schema, &tree.root, vec![executed]);
        assert_eq!(
            pruned,
            vec![item(vec![
                ("title", "Hello".into()),
                ("featured", Value::Bool(true)),
                ("comments", Value::List(vec![Value::Int(10), Value::Int(11)])),
            ])]
        );
        assert_eq!(
            pruned[0].keys().collect::<Vec<_>>(),
            vec!["title", "featured", "comments"]
        );
    }

    #[test]
    fn test_prune_aggregate_nesting() {
        let schema = schema();
        let query = Query::new()
            .with_group(["featured"])
            .with_aggregate(AggregateFunction::Count, "id")
            .with_aggregate(AggregateFunction::Max, "id")
            .with_aggregate(AggregateFunction::CountAll, "*");
        let tree = QueryPlanner::new(&schema).plan("articles", &query).unwrap();

        let executed = item(vec![
            ("featured", Value::Int(0)),
            ("count->id", Value::Int(3)),
            ("max->id", Value::Int(9)),
            ("countAll", Value::Int(3)),
        ]);
        let pruned = prune(&schema, &tree.root, vec![executed]);

        let expected = item(vec![
            ("featured", Value::Bool(false)),
            ("count", Value::Object(item(vec![("id", Value::Int(3))]))),
            ("max", Value::Object(item(vec![("id", Value::Int(9))]))),
            ("countAll", Value::Int(3)),
        ]);
        assert_eq!(pruned, vec![expected]);
    }
}
