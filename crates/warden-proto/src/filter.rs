//! Filter trees and their JSON syntax.
//!
//! A filter is a tree of conditions (target path, operator, operand),
//! logical combinations, and negations. The JSON syntax nests field names
//! down to an operator object:
//!
//! ```json
//! {"_and": [
//!   {"status": {"_eq": "published"}},
//!   {"author": {"name": {"_starts_with": "A"}}},
//!   {"comments": {"_none": {"flagged": {"_eq": true}}}}
//! ]}
//! ```
//!
//! The empty object `{}` is the filter that matches every row.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::value::Value;

/// Comparison operator of a filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    Nin,
    Null,
    Nnull,
    Contains,
    Ncontains,
    Icontains,
    StartsWith,
    NstartsWith,
    IstartsWith,
    EndsWith,
    NendsWith,
    IendsWith,
    Between,
    Nbetween,
    Empty,
    Nempty,
}

impl Operator {
    /// All operators, in declaration order.
    pub const ALL: [Operator; 23] = [
        Operator::Eq,
        Operator::Neq,
        Operator::Lt,
        Operator::Lte,
        Operator::Gt,
        Operator::Gte,
        Operator::In,
        Operator::Nin,
        Operator::Null,
        Operator::Nnull,
        Operator::Contains,
        Operator::Ncontains,
        Operator::Icontains,
        Operator::StartsWith,
        Operator::NstartsWith,
        Operator::IstartsWith,
        Operator::EndsWith,
        Operator::NendsWith,
        Operator::IendsWith,
        Operator::Between,
        Operator::Nbetween,
        Operator::Empty,
        Operator::Nempty,
    ];

    /// The JSON key of this operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "_eq",
            Operator::Neq => "_neq",
            Operator::Lt => "_lt",
            Operator::Lte => "_lte",
            Operator::Gt => "_gt",
            Operator::Gte => "_gte",
            Operator::In => "_in",
            Operator::Nin => "_nin",
            Operator::Null => "_null",
            Operator::Nnull => "_nnull",
            Operator::Contains => "_contains",
            Operator::Ncontains => "_ncontains",
            Operator::Icontains => "_icontains",
            Operator::StartsWith => "_starts_with",
            Operator::NstartsWith => "_nstarts_with",
            Operator::IstartsWith => "_istarts_with",
            Operator::EndsWith => "_ends_with",
            Operator::NendsWith => "_nends_with",
            Operator::IendsWith => "_iends_with",
            Operator::Between => "_between",
            Operator::Nbetween => "_nbetween",
            Operator::Empty => "_empty",
            Operator::Nempty => "_nempty",
        }
    }

    /// Parse an operator from its JSON key.
    pub fn parse(key: &str) -> Result<Self> {
        Operator::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == key)
            .ok_or_else(|| Error::UnknownOperator(key.to_string()))
    }

    /// Whether the operand must be a list.
    pub fn takes_list(&self) -> bool {
        matches!(
            self,
            Operator::In | Operator::Nin | Operator::Between | Operator::Nbetween
        )
    }

    /// Whether the operator ignores its operand.
    pub fn is_unary(&self) -> bool {
        matches!(
            self,
            Operator::Null | Operator::Nnull | Operator::Empty | Operator::Nempty
        )
    }

    /// Whether the operator is a string pattern match.
    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            Operator::Contains
                | Operator::Ncontains
                | Operator::Icontains
                | Operator::StartsWith
                | Operator::NstartsWith
                | Operator::IstartsWith
                | Operator::EndsWith
                | Operator::NendsWith
                | Operator::IendsWith
        )
    }

    /// Whether the operator is an ordering comparison.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Operator::Lt
                | Operator::Lte
                | Operator::Gt
                | Operator::Gte
                | Operator::Between
                | Operator::Nbetween
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical combinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    /// The JSON key of this combinator.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalOp::And => "_and",
            LogicalOp::Or => "_or",
        }
    }
}

/// A single comparison against a target path.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Field path from the filtered collection, one segment per relation hop.
    ///
    /// The last segment may be function-wrapped, e.g. `year(date_created)`.
    pub path: Vec<String>,
    /// Comparison operator.
    pub operator: Operator,
    /// Operand.
    pub value: Value,
}

impl Condition {
    /// Create a new condition.
    pub fn new(path: Vec<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            path,
            operator,
            value: value.into(),
        }
    }

    /// The dotted form of the target path.
    pub fn dotted_path(&self) -> String {
        self.path.join(".")
    }
}

/// A filter tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    /// `{}`, matches every row.
    #[default]
    Empty,
    /// A single comparison.
    Condition(Condition),
    /// Conjunction or disjunction of children.
    Logical { op: LogicalOp, children: Vec<Filter> },
    /// Negation of a subtree.
    Negate(Box<Filter>),
}

impl Filter {
    /// Condition on a dotted field path.
    pub fn condition(path: &str, operator: Operator, value: impl Into<Value>) -> Self {
        Filter::Condition(Condition::new(
            path.split('.').map(str::to_string).collect(),
            operator,
            value,
        ))
    }

    /// Equality condition on a dotted field path.
    pub fn eq(path: &str, value: impl Into<Value>) -> Self {
        Self::condition(path, Operator::Eq, value)
    }

    /// Conjunction.
    pub fn and(children: Vec<Filter>) -> Self {
        Filter::Logical {
            op: LogicalOp::And,
            children,
        }
    }

    /// Disjunction.
    pub fn or(children: Vec<Filter>) -> Self {
        Filter::Logical {
            op: LogicalOp::Or,
            children,
        }
    }

    /// Negation.
    pub fn negate(filter: Filter) -> Self {
        Filter::Negate(Box::new(filter))
    }

    /// Whether this is the match-all filter.
    pub fn is_empty(&self) -> bool {
        matches!(self, Filter::Empty)
    }

    /// Visit every condition in the tree.
    pub fn for_each_condition<'a>(&'a self, f: &mut impl FnMut(&'a Condition)) {
        match self {
            Filter::Empty => {}
            Filter::Condition(c) => f(c),
            Filter::Logical { children, .. } => {
                for child in children {
                    child.for_each_condition(f);
                }
            }
            Filter::Negate(inner) => inner.for_each_condition(f),
        }
    }

    /// Rewrite every condition in place.
    pub fn map_conditions(&mut self, f: &mut impl FnMut(&mut Condition)) {
        match self {
            Filter::Empty => {}
            Filter::Condition(c) => f(c),
            Filter::Logical { children, .. } => {
                for child in children {
                    child.map_conditions(f);
                }
            }
            Filter::Negate(inner) => inner.map_conditions(f),
        }
    }

    /// Prepend `prefix` to every condition path.
    pub fn prefixed(mut self, prefix: &[String]) -> Self {
        self.map_conditions(&mut |c| {
            let mut path = prefix.to_vec();
            path.append(&mut c.path);
            c.path = path;
        });
        self
    }

    /// Parse a filter from its JSON syntax.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        parse_node(&[], json)
    }

    /// Render the filter back into its JSON syntax.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Filter::Empty => serde_json::Value::Object(Default::default()),
            Filter::Condition(c) => {
                let mut node = serde_json::json!({ c.operator.as_str(): c.value.to_json() });
                for segment in c.path.iter().rev() {
                    node = serde_json::json!({ segment.as_str(): node });
                }
                node
            }
            Filter::Logical { op, children } => serde_json::json!({
                op.as_str(): children.iter().map(Filter::to_json).collect::<Vec<_>>()
            }),
            Filter::Negate(inner) => serde_json::json!({ "_not": inner.to_json() }),
        }
    }
}

fn path_label(prefix: &[String]) -> String {
    if prefix.is_empty() {
        "<root>".to_string()
    } else {
        prefix.join(".")
    }
}

fn parse_node(prefix: &[String], json: &serde_json::Value) -> Result<Filter> {
    let map = json
        .as_object()
        .ok_or_else(|| Error::invalid_filter(path_label(prefix), "expected an object"))?;

    if map.is_empty() {
        if prefix.is_empty() {
            return Ok(Filter::Empty);
        }
        return Err(Error::invalid_filter(
            path_label(prefix),
            "field has no operator",
        ));
    }

    let mut parts = Vec::with_capacity(map.len());
    for (key, value) in map {
        parts.push(parse_entry(prefix, key, value)?);
    }

    if parts.len() == 1 {
        Ok(parts.remove(0))
    } else {
        Ok(Filter::and(parts))
    }
}

fn parse_entry(prefix: &[String], key: &str, value: &serde_json::Value) -> Result<Filter> {
    match key {
        "_and" | "_or" => {
            let items = value.as_array().ok_or_else(|| {
                Error::invalid_filter(path_label(prefix), format!("{key} expects an array"))
            })?;
            let children = items
                .iter()
                .map(|item| parse_node(prefix, item))
                .collect::<Result<Vec<_>>>()?;
            Ok(if key == "_and" {
                Filter::and(children)
            } else {
                Filter::or(children)
            })
        }
        "_not" => Ok(Filter::negate(parse_node(prefix, value)?)),
        "_some" | "_none" => {
            if prefix.is_empty() {
                return Err(Error::invalid_filter(
                    "<root>",
                    format!("{key} must follow a relational field"),
                ));
            }
            let inner = parse_nested(prefix, value)?;
            Ok(if key == "_some" {
                inner
            } else {
                Filter::negate(inner)
            })
        }
        _ if key.starts_with('_') => {
            if prefix.is_empty() {
                return Err(Error::invalid_filter(
                    "<root>",
                    format!("operator {key} must follow a field"),
                ));
            }
            let operator = Operator::parse(key)?;
            Ok(Filter::Condition(Condition {
                path: prefix.to_vec(),
                operator,
                value: operand(prefix, operator, value)?,
            }))
        }
        _ => {
            let mut path = prefix.to_vec();
            path.push(key.to_string());
            parse_node(&path, value)
        }
    }
}

/// Parse the body of `_some` / `_none`, which must hold at least one condition.
fn parse_nested(prefix: &[String], value: &serde_json::Value) -> Result<Filter> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::invalid_filter(path_label(prefix), "expected an object"))?;
    if map.is_empty() {
        return Err(Error::invalid_filter(
            path_label(prefix),
            "relational quantifier needs a condition",
        ));
    }
    parse_node(prefix, value)
}

fn operand(prefix: &[String], operator: Operator, json: &serde_json::Value) -> Result<Value> {
    let value = Value::from_json(json.clone());
    if !operator.takes_list() {
        return Ok(value);
    }

    let list = match value {
        Value::List(items) => items,
        // Comma-separated strings are accepted for list operators.
        Value::String(s) => s.split(',').map(|part| Value::String(part.to_string())).collect(),
        other => vec![other],
    };

    if matches!(operator, Operator::Between | Operator::Nbetween) && list.len() != 2 {
        return Err(Error::invalid_filter(
            path_label(prefix),
            format!("{operator} expects exactly two values"),
        ));
    }
    Ok(Value::List(list))
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Filter::from_json(&json).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_simple_condition() {
        let filter = Filter::from_json(&json!({"title": {"_eq": "hello"}})).unwrap();
        assert_eq!(filter, Filter::eq("title", "hello"));
    }

    #[test]
    fn test_parse_relational_path() {
        let filter = Filter::from_json(&json!({"author": {"name": {"_eq": "Ada"}}})).unwrap();
        match filter {
            Filter::Condition(c) => {
                assert_eq!(c.path, vec!["author".to_string(), "name".to_string()]);
                assert_eq!(c.dotted_path(), "author.name");
            }
            other => panic!("expected condition, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(Filter::from_json(&json!({})).unwrap(), Filter::Empty);
        let merged = Filter::from_json(&json!({"_and": [{}, {"a": {"_eq": 1}}]})).unwrap();
        assert_eq!(merged, Filter::and(vec![Filter::Empty, Filter::eq("a", 1)]));
    }

    #[test]
    fn test_parse_multiple_keys_is_conjunction() {
        let filter =
            Filter::from_json(&json!({"a": {"_eq": 1}, "b": {"_gt": 2, "_lt": 5}})).unwrap();
        assert_eq!(
            filter,
            Filter::and(vec![
                Filter::eq("a", 1),
                Filter::and(vec![
                    Filter::condition("b", Operator::Gt, 2),
                    Filter::condition("b", Operator::Lt, 5),
                ]),
            ])
        );
    }

    #[test]
    fn test_parse_quantifiers() {
        let some =
            Filter::from_json(&json!({"comments": {"_some": {"body": {"_eq": "x"}}}})).unwrap();
        assert_eq!(some, Filter::eq("comments.body", "x"));

        let none =
            Filter::from_json(&json!({"comments": {"_none": {"body": {"_eq": "x"}}}})).unwrap();
        assert_eq!(none, Filter::negate(Filter::eq("comments.body", "x")));
    }

    #[test]
    fn test_list_operands() {
        let filter = Filter::from_json(&json!({"id": {"_in": "1,2,3"}})).unwrap();
        match filter {
            Filter::Condition(c) => assert_eq!(c.value.as_list().unwrap().len(), 3),
            other => panic!("expected condition, got {other:?}"),
        }

        let err = Filter::from_json(&json!({"n": {"_between": [1]}})).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter { .. }));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(
            Filter::from_json(&json!({"a": {"_bogus": 1}})),
            Err(Error::UnknownOperator(_))
        ));
        assert!(Filter::from_json(&json!({"_eq": 1})).is_err());
        assert!(Filter::from_json(&json!({"a": {}})).is_err());
        assert!(Filter::from_json(&json!({"_and": {}})).is_err());
        assert!(Filter::from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_json_roundtrip_shape() {
        let source = json!({"_or": [
            {"status": {"_eq": "published"}},
            {"_not": {"author": {"name": {"_null": true}}}}
        ]});
        let filter = Filter::from_json(&source).unwrap();
        assert_eq!(filter.to_json(), source);
    }

    #[test]
    fn test_prefixed() {
        let filter = Filter::eq("status", "published").prefixed(&["comments".to_string()]);
        assert_eq!(filter, Filter::eq("comments.status", "published"));
    }

    #[test]
    fn test_serde_impl() {
        let filter: Filter = serde_json::from_value(json!({"views": {"_gte": 10}})).unwrap();
        assert_eq!(filter, Filter::condition("views", Operator::Gte, 10));
        assert_eq!(
            serde_json::to_value(&filter).unwrap(),
            json!({"views": {"_gte": 10}})
        );
    }
}
