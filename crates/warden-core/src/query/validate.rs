//! Validation of filters, sorts, and aggregations before compilation.

use warden_proto::{AggregateFunction, Condition, Filter, Operator, Value};

use crate::catalog::{FieldType, RelationKind, SchemaSnapshot};
use crate::error::{Error, Result};

use crate::sql::aggregate_key;

use super::ast::{Level, Node, QueryTree};
use super::path::{resolve_path, ResolvedPath};

/// What a `having` condition refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HavingTarget {
    /// A group-by column.
    Group(String),
    /// An aggregate over a field, `*` for row counts.
    Aggregate(AggregateFunction, String),
}

/// Validate every level of a tree.
pub fn validate_tree(schema: &SchemaSnapshot, tree: &QueryTree) -> Result<()> {
    validate_level(schema, &tree.root)
}

fn validate_level(schema: &SchemaSnapshot, level: &Level) -> Result<()> {
    if let Some(filter) = &level.query.filter {
        validate_filter(schema, &level.collection, filter)?;
    }
    for entry in level.query.sort.iter().flatten() {
        if !is_aggregate_output(level, entry) {
            resolve_sort(schema, &level.collection, entry)?;
        }
    }
    if level.query.is_aggregate() {
        validate_aggregate(schema, level)?;
    } else if level.query.having.as_ref().is_some_and(|h| !h.is_empty()) {
        return Err(Error::AggregateValidation(
            "having requires an aggregation".into(),
        ));
    }

    for child in &level.children {
        match child {
            Node::M2O(node) | Node::O2M(node) => validate_level(schema, &node.level)?,
            Node::A2O(node) => {
                for nested in node.levels.values() {
                    validate_level(schema, nested)?;
                }
            }
            Node::Field(_) | Node::Function(_) => {}
        }
    }
    Ok(())
}

/// Validate every condition of a filter on `collection`.
pub fn validate_filter(schema: &SchemaSnapshot, collection: &str, filter: &Filter) -> Result<()> {
    let mut result = Ok(());
    filter.for_each_condition(&mut |condition| {
        if result.is_ok() {
            result = validate_condition(schema, collection, condition);
        }
    });
    result
}

fn validate_condition(schema: &SchemaSnapshot, collection: &str, condition: &Condition) -> Result<()> {
    let resolved = resolve_path(schema, collection, &condition.path)?;
    check_operator(&resolved, condition)
}

/// Check that the operator applies to the target type and operand shape.
fn check_operator(resolved: &ResolvedPath<'_>, condition: &Condition) -> Result<()> {
    let op = condition.operator;
    let ty = &resolved.value_type;
    let invalid = |message: String| {
        Err(Error::InvalidFilter(format!(
            "{} on '{}': {message}",
            op,
            condition.dotted_path()
        )))
    };

    if op.is_pattern() && !accepts_patterns(ty) {
        return invalid(format!("pattern operators need a text column, got {}", ty.kind()));
    }
    if op.is_ordering() && matches!(ty, FieldType::Boolean | FieldType::Json) {
        return invalid(format!("{} columns cannot be ordered", ty.kind()));
    }
    if matches!(op, Operator::Empty | Operator::Nempty) && !accepts_patterns(ty) {
        return invalid(format!("emptiness needs a text column, got {}", ty.kind()));
    }

    match (&condition.value, op.takes_list()) {
        (Value::List(_), true) => Ok(()),
        (_, true) => invalid("expected a list operand".into()),
        (Value::List(_) | Value::Object(_), false) if !op.is_unary() => {
            invalid(format!("unexpected {} operand", condition.value.type_name()))
        }
        _ => Ok(()),
    }
}

fn accepts_patterns(ty: &FieldType) -> bool {
    ty.is_textual() || matches!(ty, FieldType::Json | FieldType::Hash | FieldType::Unknown)
}

/// Resolve one sort entry, `-` prefixed for descending.
///
/// Sorting may follow many-to-one relations but never fans out.
pub fn resolve_sort<'a>(
    schema: &'a SchemaSnapshot,
    collection: &str,
    entry: &str,
) -> Result<(ResolvedPath<'a>, bool)> {
    let (descending, field) = match entry.strip_prefix('-') {
        Some(field) => (true, field),
        None => (false, entry),
    };
    let path: Vec<String> = field.split('.').map(str::to_string).collect();
    let resolved = resolve_path(schema, collection, &path).map_err(|err| match err {
        Error::InvalidFilter(message) => Error::InvalidQuery(message),
        other => other,
    })?;
    if let Some(hop) = resolved.hops.iter().find(|hop| hop.relation.kind != RelationKind::M2O) {
        return Err(Error::InvalidQuery(format!(
            "cannot sort by '{field}': '{}' is not a many-to-one field",
            hop.field
        )));
    }
    Ok((resolved, descending))
}

/// Whether a sort entry names a group field or aggregate of an aggregate level.
pub fn is_aggregate_output(level: &Level, entry: &str) -> bool {
    if !level.query.is_aggregate() {
        return false;
    }
    let name = entry.strip_prefix('-').unwrap_or(entry);
    if level.query.group.iter().flatten().any(|g| g == name) {
        return true;
    }
    level.query.aggregate.iter().flatten().any(|(function, fields)| {
        if *function == AggregateFunction::CountAll {
            return name == function.as_str();
        }
        fields.iter().any(|field| match field.as_str() {
            "*" => name == function.as_str(),
            field => name == aggregate_key(*function, field),
        })
    })
}

fn validate_aggregate(schema: &SchemaSnapshot, level: &Level) -> Result<()> {
    let collection = level.collection.as_str();
    let def = schema.require_collection(collection)?;

    for (function, fields) in level.query.aggregate.iter().flatten() {
        if *function == AggregateFunction::CountAll {
            continue;
        }
        if fields.is_empty() {
            return Err(Error::AggregateValidation(format!(
                "{function} needs at least one field"
            )));
        }
        for field in fields {
            if field == "*" {
                if *function != AggregateFunction::Count {
                    return Err(Error::AggregateValidation(format!(
                        "{function} cannot be applied to '*'"
                    )));
                }
                continue;
            }
            let Some(def) = def.field(field) else {
                return Err(Error::AggregateValidation(format!(
                    "unknown field '{field}' in {function} on '{collection}'"
                )));
            };
            if def.is_alias() {
                return Err(Error::AggregateValidation(format!(
                    "{function} cannot be applied to alias field '{field}'"
                )));
            }
            if function.is_numeric() && !def.field_type.is_numeric() {
                return Err(Error::AggregateValidation(format!(
                    "{function} needs a numeric field, '{field}' is {}",
                    def.field_type.kind()
                )));
            }
        }
    }

    if let Some(having) = &level.query.having {
        let mut result = Ok(());
        having.for_each_condition(&mut |condition| {
            if result.is_ok() {
                result = resolve_having(level, &condition.path).map(|_| ());
            }
        });
        result?;
    }
    Ok(())
}

/// Resolve the target of a `having` condition path.
///
/// `["author"]` names a group-by column, `["count", "id"]` the aggregate
/// `count` over `id`, and `["countAll"]` or `["count"]` a row count.
pub fn resolve_having(level: &Level, path: &[String]) -> Result<HavingTarget> {
    let aggregate = level.query.aggregate.as_ref();
    let requested = |function: AggregateFunction, field: &str| {
        aggregate
            .and_then(|a| a.get(&function))
            .is_some_and(|fields| function == AggregateFunction::CountAll || fields.iter().any(|f| f == field))
    };
    let unknown = || {
        Err(Error::AggregateValidation(format!(
            "having refers to '{}', which is neither grouped nor aggregated",
            path.join(".")
        )))
    };

    match path {
        [single] => {
            let grouped = level.query.group.iter().flatten().any(|g| g == single);
            if grouped {
                return Ok(HavingTarget::Group(single.clone()));
            }
            match parse_aggregate(single) {
                Some(function) if requested(function, "*") => {
                    Ok(HavingTarget::Aggregate(function, "*".to_string()))
                }
                _ => unknown(),
            }
        }
        [function, field] => match parse_aggregate(function) {
            Some(function) if requested(function, field) => {
                Ok(HavingTarget::Aggregate(function, field.clone()))
            }
            _ => unknown(),
        },
        _ => unknown(),
    }
}

fn parse_aggregate(name: &str) -> Option<AggregateFunction> {
    serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
}
