//! Permission annotation of query trees.
//!
//! The annotator walks a planned tree and, per level, copies the collection's
//! permission cases into the level and marks every child with the case
//! indices its visibility depends on. Requested fields no record covers are
//! rejected, unless they only came from a wildcard, in which case they are
//! dropped from the tree.

use indexmap::IndexMap;
use tracing::trace;
use warden_proto::{Action, AggregateFunction, Filter};

use crate::catalog::SchemaSnapshot;
use crate::error::{Error, Result};
use crate::query::ast::{Level, Node, QueryTree};
use crate::query::function::FunctionKind;
use crate::query::path::resolve_path;
use crate::query::validate::{is_aggregate_output, resolve_sort};

use super::access::AccessMap;

/// Injects permission cases and visibility markers into a query tree.
pub struct Annotator<'a> {
    schema: &'a SchemaSnapshot,
    access: &'a AccessMap,
}

impl<'a> Annotator<'a> {
    /// Create an annotator for one request's access.
    pub fn new(schema: &'a SchemaSnapshot, access: &'a AccessMap) -> Self {
        Self { schema, access }
    }

    /// Annotate a tree in place. Admin access leaves the tree untouched.
    pub fn annotate(&self, tree: &mut QueryTree) -> Result<()> {
        if self.access.is_admin() {
            return Ok(());
        }
        self.annotate_level(&mut tree.root)
    }

    fn annotate_level(&self, level: &mut Level) -> Result<()> {
        let access = self.access.require(&level.collection)?;
        level.cases = access.cases.clone();
        level.rows_unrestricted = access.rows_unrestricted();

        let children = std::mem::take(&mut level.children);
        let mut kept = Vec::with_capacity(children.len());

        for mut child in children {
            let Some(when_case) = access.field_access(child.source_field()) else {
                if child.from_wildcard() {
                    trace!(
                        collection = %level.collection,
                        field = child.source_field(),
                        "dropping unreadable wildcard field"
                    );
                    continue;
                }
                return Err(Error::forbidden(&level.collection, child.source_field()));
            };
            child.set_when_case(when_case);

            match &mut child {
                Node::M2O(node) | Node::O2M(node) => {
                    if !self.access.can_read(&node.level.collection) {
                        if node.from_wildcard {
                            continue;
                        }
                        return Err(denied(&node.level.collection));
                    }
                    self.annotate_level(&mut node.level)?;
                }
                Node::A2O(node) => {
                    let mut levels = IndexMap::with_capacity(node.levels.len());
                    for (target, mut nested) in std::mem::take(&mut node.levels) {
                        if !self.access.can_read(&target) {
                            if node.scoped.contains(&target) {
                                return Err(denied(&target));
                            }
                            continue;
                        }
                        self.annotate_level(&mut nested)?;
                        levels.insert(target, nested);
                    }
                    node.levels = levels;
                }
                Node::Function(node) if node.function == FunctionKind::Count => {
                    let target = self
                        .schema
                        .relation(&level.collection, &node.target)
                        .and_then(|rel| rel.target())
                        .ok_or_else(|| {
                            Error::schema(format!(
                                "no relation for '{}.{}'",
                                level.collection, node.target
                            ))
                        })?;
                    self.access.require(target)?;
                }
                Node::Function(_) | Node::Field(_) => {}
            }
            kept.push(child);
        }

        level.children = kept;
        self.check_modifiers(level)
    }

    /// Filter, sort, and aggregate targets must be readable.
    fn check_modifiers(&self, level: &Level) -> Result<()> {
        let collection = level.collection.as_str();

        if let Some(filter) = &level.query.filter {
            self.check_filter(collection, filter)?;
        }

        for entry in level.query.sort.iter().flatten() {
            if is_aggregate_output(level, entry) {
                continue;
            }
            let (resolved, _) = resolve_sort(self.schema, collection, entry)?;
            for hop in &resolved.hops {
                self.require_field(&hop.collection, &hop.field)?;
                self.access.require(&hop.target)?;
            }
            self.require_field(&resolved.collection, &resolved.field)?;
        }

        for (function, fields) in level.query.aggregate.iter().flatten() {
            if *function == AggregateFunction::CountAll {
                continue;
            }
            for field in fields.iter().filter(|f| f.as_str() != "*") {
                self.require_field(collection, field)?;
            }
        }

        Ok(())
    }

    /// Every hop and the leaf of every condition path must be readable.
    pub fn check_filter(&self, collection: &str, filter: &Filter) -> Result<()> {
        let mut result = Ok(());
        filter.for_each_condition(&mut |condition| {
            if result.is_err() {
                return;
            }
            result = resolve_path(self.schema, collection, &condition.path).and_then(|resolved| {
                for hop in &resolved.hops {
                    self.require_field(&hop.collection, &hop.field)?;
                    self.access.require(&hop.target)?;
                }
                self.require_field(&resolved.collection, &resolved.field)?;
                if resolved.function == Some(FunctionKind::Count) {
                    if let Some(target) = self
                        .schema
                        .relation(&resolved.collection, &resolved.field)
                        .and_then(|rel| rel.target())
                    {
                        self.access.require(target)?;
                    }
                }
                Ok(())
            });
        });
        result
    }

    fn require_field(&self, collection: &str, field: &str) -> Result<()> {
        match self.access.field_access(collection, field) {
            Some(_) => Ok(()),
            None if self.access.can_read(collection) => Err(Error::forbidden(collection, field)),
            None => Err(denied(collection)),
        }
    }
}

fn denied(collection: &str) -> Error {
    Error::PermissionDenied {
        collection: collection.to_string(),
        action: Action::Read.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CollectionDef, FieldDef, FieldType, RelationDef};
    use crate::query::QueryPlanner;
    use warden_proto::{Permission, Query};

    fn schema() -> SchemaSnapshot {
        SchemaSnapshot::new(1)
            .with_collection(
                CollectionDef::new("articles", "id")
                    .with_field(FieldDef::new("id", FieldType::Integer))
                    .with_field(FieldDef::new("title", FieldType::String))
                    .with_field(FieldDef::new("body", FieldType::Text))
                    .with_field(FieldDef::new("status", FieldType::String))
                    .with_field(FieldDef::new("author", FieldType::Integer))
                    .with_field(FieldDef::alias("comments")),
            )
            .with_collection(
                CollectionDef::new("comments", "id")
                    .with_field(FieldDef::new("id", FieldType::Integer))
                    .with_field(FieldDef::new("body", FieldType::Text))
                    .with_field(FieldDef::new("article_id", FieldType::Integer)),
            )
            .with_collection(
                CollectionDef::new("users", "id")
                    .with_field(FieldDef::new("id", FieldType::Integer))
                    .with_field(FieldDef::new("name", FieldType::String)),
            )
            .with_relation(RelationDef::many_to_one("articles", "author", "users"))
            .with_relation(
                RelationDef::many_to_one("comments", "article_id", "articles")
                    .with_one_field("comments"),
            )
    }

    fn annotate(records: &[Permission], query: Query) -> Result<QueryTree> {
        let schema = schema();
        let access = AccessMap::from_permissions(records, Action::Read);
        let mut tree = QueryPlanner::new(&schema).plan("articles", &query)?;
        Annotator::new(&schema, &access).annotate(&mut tree)?;
        Ok(tree)
    }

    fn read(collection: &str, fields: &[&str], filter: Option<Filter>) -> Permission {
        let mut record = Permission::new(collection, Action::Read).with_fields(fields.iter().copied());
        record.permissions = filter;
        record
    }

    #[test]
    fn test_cases_and_when_case() {
        let published = Filter::eq("status", "published");
        let draft = Filter::eq("status", "draft");
        let tree = annotate(
            &[
                read("articles", &["title", "body"], Some(published.clone())),
                read("articles", &["body", "status"], Some(draft.clone())),
            ],
            Query::new().with_fields(["title", "body", "status"]),
        )
        .unwrap();

        let root = &tree.root;
        assert_eq!(root.cases, vec![published, draft]);
        assert!(!root.rows_unrestricted);
        assert_eq!(root.child("title").unwrap().when_case(), &[0]);
        assert_eq!(root.child("body").unwrap().when_case(), &[0, 1]);
        assert_eq!(root.child("status").unwrap().when_case(), &[1]);
    }

    #[test]
    fn test_explicit_field_forbidden_wildcard_dropped() {
        let records = [read("articles", &["id", "title"], None)];

        let err = annotate(&records, Query::new().with_fields(["title", "body"])).unwrap_err();
        assert!(matches!(err, Error::ForbiddenField { ref field, .. } if field == "body"));

        let tree = annotate(&records, Query::new().with_fields(["*"])).unwrap();
        let keys: Vec<&str> = tree.root.children.iter().map(Node::field_key).collect();
        assert_eq!(keys, vec!["id", "title"]);
        assert!(tree.root.rows_unrestricted);
    }

    #[test]
    fn test_nested_collections() {
        let records = [read("articles", &["*"], None)];

        let err = annotate(&records, Query::new().with_fields(["title", "author.name"])).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { ref collection, .. } if collection == "users"));

        // `comments` comes from the wildcard and its collection is unreadable.
        let tree = annotate(&records, Query::new()).unwrap();
        assert!(tree.root.child("comments").is_none());
        assert!(tree.root.child("title").is_some());

        let records = [
            read("articles", &["*"], None),
            read("comments", &["body", "article_id"], Some(Filter::eq("body", "ok"))),
        ];
        let tree = annotate(&records, Query::new().with_fields(["comments.body"])).unwrap();
        let Some(Node::O2M(comments)) = tree.root.child("comments") else {
            panic!("expected a one-to-many child");
        };
        assert!(!comments.level.rows_unrestricted);
        assert_eq!(comments.level.child("body").unwrap().when_case(), &[0]);
    }

    #[test]
    fn test_no_record_for_root() {
        let err = annotate(&[read("users", &["*"], None)], Query::new()).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
    }

    #[test]
    fn test_filter_and_sort_targets() {
        let records = [
            read("articles", &["id", "title"], None),
            read("users", &["id"], None),
        ];

        let err = annotate(
            &records,
            Query::new()
                .with_fields(["title"])
                .with_filter(Filter::eq("status", "draft")),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ForbiddenField { ref field, .. } if field == "status"));

        let err = annotate(&records, Query::new().with_fields(["title"]).with_sort(["author.name"]))
            .unwrap_err();
        assert!(matches!(err, Error::ForbiddenField { ref field, .. } if field == "author"));
    }

    #[test]
    fn test_admin_is_untouched() {
        let schema = schema();
        let access = AccessMap::admin();
        let mut tree = QueryPlanner::new(&schema).plan("articles", &Query::new()).unwrap();
        Annotator::new(&schema, &access).annotate(&mut tree).unwrap();
        assert!(tree.root.cases.is_empty());
        assert!(tree.root.child("comments").is_some());
    }
}
