//! Query tree - the per-request representation of a read.
//!
//! A tree is built from a [`Query`] and the schema, annotated in place with
//! permission `cases` and `when_case` markers, and then only read by the
//! compiler and executor.

use indexmap::IndexMap;
use serde::Serialize;
use warden_proto::{Filter, Query};

use crate::catalog::RelationDef;

use super::function::FunctionKind;

/// One level of the tree: a collection read with its own modifiers.
#[derive(Debug, Clone, Serialize)]
pub struct Level {
    /// Collection read at this level.
    pub collection: String,
    /// Modifiers for this level (the root query, or a `deep` entry).
    pub query: Query,
    /// Selected fields and nested relations, in request order.
    pub children: Vec<Node>,
    /// Row filters that field visibility depends on.
    pub cases: Vec<Filter>,
    /// Whether some permission grants this collection without a row filter.
    ///
    /// Otherwise rows are restricted to the disjunction of `cases`.
    pub rows_unrestricted: bool,
    /// Ordering used when the query sets none.
    pub default_sort: Vec<String>,
}

impl Level {
    /// Create an unannotated level.
    pub fn new(collection: impl Into<String>, query: Query) -> Self {
        Self {
            collection: collection.into(),
            query,
            children: Vec::new(),
            cases: Vec::new(),
            rows_unrestricted: true,
            default_sort: Vec::new(),
        }
    }

    /// Sort entries in effect: the query's own, or the default ordering.
    pub fn sort(&self) -> &[String] {
        self.query.sort.as_deref().unwrap_or(&self.default_sort)
    }

    /// Find a child by output key.
    pub fn child(&self, field_key: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.field_key() == field_key)
    }

    /// Row filter implied by the cases, `None` when rows are unrestricted.
    pub fn row_filter(&self) -> Option<Filter> {
        if self.rows_unrestricted {
            None
        } else {
            Some(Filter::or(self.cases.clone()))
        }
    }
}

/// A primitive field.
#[derive(Debug, Clone, Serialize)]
pub struct FieldNode {
    /// Column name.
    pub name: String,
    /// Output key (differs from `name` when aliased).
    pub field_key: String,
    /// Case indices whose disjunction must hold for the value to be visible.
    pub when_case: Vec<usize>,
    /// Whether the field came from a `*` wildcard.
    pub from_wildcard: bool,
}

/// A function-wrapped field.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionNode {
    /// The full request string, `year(date_created)`.
    pub name: String,
    /// Output key.
    pub field_key: String,
    /// Function applied.
    pub function: FunctionKind,
    /// Wrapped field; a one-to-many alias field for `count`.
    pub target: String,
    /// Case indices gating visibility.
    pub when_case: Vec<usize>,
}

/// A many-to-one or one-to-many child.
#[derive(Debug, Clone, Serialize)]
pub struct NestedNode {
    /// Relational field on the parent.
    pub field: String,
    /// Output key.
    pub field_key: String,
    /// The traversed relation.
    pub relation: RelationDef,
    /// The related collection's level.
    pub level: Level,
    /// Case indices of the parent gating visibility.
    pub when_case: Vec<usize>,
    /// Whether the node came from a `*` wildcard.
    pub from_wildcard: bool,
}

/// An any-to-one child, with one level per target collection.
#[derive(Debug, Clone, Serialize)]
pub struct AnyNode {
    /// Relational field on the parent.
    pub field: String,
    /// Output key.
    pub field_key: String,
    /// The traversed relation.
    pub relation: RelationDef,
    /// Levels keyed by target collection.
    pub levels: IndexMap<String, Level>,
    /// Collections the caller explicitly scoped fields to.
    pub scoped: Vec<String>,
    /// Case indices of the parent gating visibility.
    pub when_case: Vec<usize>,
}

/// A node of the query tree.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    Field(FieldNode),
    Function(FunctionNode),
    M2O(NestedNode),
    O2M(NestedNode),
    A2O(AnyNode),
}

impl Node {
    /// Output key of the node.
    pub fn field_key(&self) -> &str {
        match self {
            Node::Field(n) => &n.field_key,
            Node::Function(n) => &n.field_key,
            Node::M2O(n) | Node::O2M(n) => &n.field_key,
            Node::A2O(n) => &n.field_key,
        }
    }

    /// Field on the owning collection the node reads.
    pub fn source_field(&self) -> &str {
        match self {
            Node::Field(n) => &n.name,
            Node::Function(n) => &n.target,
            Node::M2O(n) | Node::O2M(n) => &n.field,
            Node::A2O(n) => &n.field,
        }
    }

    /// Visibility case indices.
    pub fn when_case(&self) -> &[usize] {
        match self {
            Node::Field(n) => &n.when_case,
            Node::Function(n) => &n.when_case,
            Node::M2O(n) | Node::O2M(n) => &n.when_case,
            Node::A2O(n) => &n.when_case,
        }
    }

    /// Replace the visibility case indices.
    pub fn set_when_case(&mut self, when_case: Vec<usize>) {
        match self {
            Node::Field(n) => n.when_case = when_case,
            Node::Function(n) => n.when_case = when_case,
            Node::M2O(n) | Node::O2M(n) => n.when_case = when_case,
            Node::A2O(n) => n.when_case = when_case,
        }
    }

    /// Whether the node came from a wildcard rather than an explicit request.
    pub fn from_wildcard(&self) -> bool {
        match self {
            Node::Field(n) => n.from_wildcard,
            Node::M2O(n) | Node::O2M(n) => n.from_wildcard,
            Node::Function(_) | Node::A2O(_) => false,
        }
    }

    /// Whether the node is resolved by a separate keyed sub-query.
    pub fn needs_subquery(&self) -> bool {
        matches!(self, Node::O2M(_) | Node::A2O(_))
    }
}

/// The query tree of one request.
#[derive(Debug, Clone, Serialize)]
pub struct QueryTree {
    /// Root level.
    pub root: Level,
}

impl QueryTree {
    /// Collection the request reads.
    pub fn collection(&self) -> &str {
        &self.root.collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_row_filter() {
        let mut level = Level::new("articles", Query::new());
        assert!(level.row_filter().is_none());

        level.rows_unrestricted = false;
        level.cases = vec![Filter::eq("status", "published")];
        assert_eq!(
            level.row_filter(),
            Some(Filter::or(vec![Filter::eq("status", "published")]))
        );
    }

    #[test]
    fn test_node_accessors() {
        let mut node = Node::Field(FieldNode {
            name: "title".into(),
            field_key: "headline".into(),
            when_case: vec![],
            from_wildcard: true,
        });
        assert_eq!(node.field_key(), "headline");
        assert_eq!(node.source_field(), "title");
        assert!(node.from_wildcard());
        assert!(!node.needs_subquery());

        node.set_when_case(vec![0, 1]);
        assert_eq!(node.when_case(), &[0, 1]);
    }

    #[test]
    fn test_tree_serializes_for_explain() {
        let tree = QueryTree {
            root: Level::new("articles", Query::new()),
        };
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["root"]["collection"], "articles");
        assert_eq!(json["root"]["rows_unrestricted"], true);
    }
}
