//! Query planner: builds the query tree from a [`Query`] and the schema.
//!
//! Field lists are parsed the same way at every level:
//!
//! - `*` expands to every field of the collection, one-to-many alias fields
//!   included; `*.field` expands across every relational field
//! - `rel.field` and `rel.*` select through a relation
//! - `item:headings.title` scopes fields of an any-to-one relation to one of
//!   its target collections
//! - `year(date_created)` and `count(comments)` are function fields
//!
//! A many-to-one or any-to-one field named without sub-fields is a plain
//! foreign key column; a one-to-many field named without sub-fields resolves
//! to the list of related primary keys.

use indexmap::IndexMap;
use tracing::trace;
use warden_proto::Query;

use crate::catalog::{CollectionDef, RelationKind, SchemaSnapshot};
use crate::config::DEFAULT_MAX_RELATIONAL_DEPTH;
use crate::error::{Error, Result};

use super::ast::{AnyNode, FieldNode, FunctionNode, Level, NestedNode, Node, QueryTree};
use super::function::{parse_function, FunctionKind};
use super::path::split_scope;

/// A field entry after alias and wildcard expansion.
#[derive(Debug, Clone)]
struct Requested {
    /// Output key of the first segment.
    key: String,
    /// Remaining dotted segments, if any.
    rest: Option<String>,
    /// Collection scope of the first segment.
    scope: Option<String>,
    from_wildcard: bool,
}

/// Sub-fields collected for one relational field.
#[derive(Debug, Default)]
struct RelationalGroup {
    unscoped: Vec<String>,
    scoped: IndexMap<String, Vec<String>>,
    from_wildcard: bool,
}

enum Slot {
    Node(Node),
    Relational(String),
}

/// Planner that turns a [`Query`] into a [`QueryTree`].
pub struct QueryPlanner<'a> {
    schema: &'a SchemaSnapshot,
    max_depth: usize,
}

impl<'a> QueryPlanner<'a> {
    /// Create a new planner over a schema snapshot.
    pub fn new(schema: &'a SchemaSnapshot) -> Self {
        Self {
            schema,
            max_depth: DEFAULT_MAX_RELATIONAL_DEPTH,
        }
    }

    /// Limit the number of nested relation levels.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Build the tree for a read of `collection`.
    pub fn plan(&self, collection: &str, query: &Query) -> Result<QueryTree> {
        let fields = query
            .fields
            .clone()
            .unwrap_or_else(|| vec!["*".to_string()]);
        let root = self.build_level(collection, query.clone(), fields, 0)?;
        trace!(collection, children = root.children.len(), "planned query tree");
        Ok(QueryTree { root })
    }

    fn build_level(
        &self,
        collection: &str,
        query: Query,
        fields: Vec<String>,
        depth: usize,
    ) -> Result<Level> {
        if depth > self.max_depth {
            return Err(Error::InvalidQuery(format!(
                "relational depth exceeds the maximum of {}",
                self.max_depth
            )));
        }
        let def = self.schema.require_collection(collection)?;

        if query.is_aggregate() {
            if depth > 0 {
                return Err(Error::AggregateValidation(format!(
                    "aggregation is only supported on the root collection, not '{collection}'"
                )));
            }
            let group = query.group.clone().unwrap_or_default();
            let mut level = Level::new(collection, query);
            for entry in &group {
                level.children.push(self.primitive(def, entry, entry, false)?);
            }
            return Ok(level);
        }

        let aliases = query.alias.clone().unwrap_or_default();
        let requested = self.expand(def, &fields);

        let mut slots = Vec::with_capacity(requested.len());
        let mut groups: IndexMap<String, RelationalGroup> = IndexMap::new();

        for entry in requested {
            let name = aliases.get(&entry.key).cloned().unwrap_or_else(|| entry.key.clone());
            let relation = self.schema.relation(collection, &name);

            let is_relational = entry.rest.is_some()
                || entry.scope.is_some()
                || relation.is_some_and(|rel| rel.kind == RelationKind::O2M);

            if !is_relational {
                if let Some(node) = self.leaf(def, &name, &entry)? {
                    slots.push(Slot::Node(node));
                }
                continue;
            }

            if relation.is_none() {
                self.schema.require_field(collection, &name)?;
                return Err(Error::InvalidQuery(format!(
                    "field '{name}' of '{collection}' is not relational"
                )));
            }

            if !groups.contains_key(&entry.key) {
                slots.push(Slot::Relational(entry.key.clone()));
            }
            let group = groups.entry(entry.key.clone()).or_insert_with(|| RelationalGroup {
                from_wildcard: true,
                ..RelationalGroup::default()
            });
            group.from_wildcard &= entry.from_wildcard;
            match (&entry.scope, entry.rest) {
                (Some(scope), rest) => {
                    let scoped = group.scoped.entry(scope.clone()).or_default();
                    scoped.extend(rest);
                }
                (None, Some(rest)) => group.unscoped.push(rest),
                (None, None) => {}
            }
        }

        let mut level = Level::new(collection, query);
        let mut relational = Vec::new();
        for slot in slots {
            match slot {
                Slot::Node(node) => level.children.push(node),
                Slot::Relational(key) => {
                    let Some(group) = groups.swap_remove(&key) else {
                        continue;
                    };
                    let name = aliases.get(&key).cloned().unwrap_or_else(|| key.clone());
                    let node = self.relational(&level, &key, &name, group, depth)?;
                    relational.push(key);
                    level.children.push(node);
                }
            }
        }

        // `author` together with `author.name` selects the relation only once.
        level.children.retain(|child| {
            !matches!(child, Node::Field(field) if relational.contains(&field.field_key))
        });

        Ok(level)
    }

    /// Expand `*` and `*.rest` entries and split off scopes and sub-paths.
    fn expand(&self, def: &CollectionDef, fields: &[String]) -> Vec<Requested> {
        let mut out: Vec<Requested> = Vec::with_capacity(fields.len());

        let push = |out: &mut Vec<Requested>, entry: Requested| {
            let existing = out.iter_mut().find(|r| {
                r.key == entry.key && r.rest == entry.rest && r.scope == entry.scope
            });
            match existing {
                Some(existing) => existing.from_wildcard &= entry.from_wildcard,
                None => out.push(entry),
            }
        };

        for raw in fields {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }

            if raw == "*" {
                for field in def.fields.values() {
                    let has_column = !field.is_alias();
                    let is_o2m = self
                        .schema
                        .relation(&def.name, &field.name)
                        .is_some_and(|rel| rel.kind == RelationKind::O2M);
                    if has_column || is_o2m {
                        push(&mut out, Requested {
                            key: field.name.clone(),
                            rest: None,
                            scope: None,
                            from_wildcard: true,
                        });
                    }
                }
                continue;
            }

            if let Some(rest) = raw.strip_prefix("*.") {
                for field in def.fields.values() {
                    if self.schema.relation(&def.name, &field.name).is_some() {
                        push(&mut out, Requested {
                            key: field.name.clone(),
                            rest: Some(rest.to_string()),
                            scope: None,
                            from_wildcard: true,
                        });
                    }
                }
                continue;
            }

            // Function calls never traverse relations.
            let (head, rest) = if raw.contains('(') {
                (raw, None)
            } else {
                match raw.split_once('.') {
                    Some((head, rest)) => (head, Some(rest.to_string())),
                    None => (raw, None),
                }
            };
            let (key, scope) = split_scope(head);
            push(&mut out, Requested {
                key: key.to_string(),
                rest,
                scope: scope.map(str::to_string),
                from_wildcard: false,
            });
        }

        out
    }

    /// A non-relational entry: a column, a foreign key, or a function field.
    fn leaf(&self, def: &CollectionDef, name: &str, entry: &Requested) -> Result<Option<Node>> {
        if parse_function(name)?.is_none() {
            let field = self.schema.require_field(&def.name, name)?;
            if field.is_alias() && self.schema.relation(&def.name, name).is_none() {
                trace!(collection = %def.name, field = name, "skipping alias field without column");
                return Ok(None);
            }
        }
        self.primitive(def, name, &entry.key, entry.from_wildcard).map(Some)
    }

    fn primitive(
        &self,
        def: &CollectionDef,
        name: &str,
        field_key: &str,
        from_wildcard: bool,
    ) -> Result<Node> {
        let Some((function, target)) = parse_function(name)? else {
            self.schema.require_field(&def.name, name)?;
            return Ok(Node::Field(FieldNode {
                name: name.to_string(),
                field_key: field_key.to_string(),
                when_case: Vec::new(),
                from_wildcard,
            }));
        };

        let field = self.schema.require_field(&def.name, &target)?;
        function.check_target(&target, &field.field_type)?;
        if function == FunctionKind::Count {
            let is_o2m = self
                .schema
                .relation(&def.name, &target)
                .is_some_and(|rel| rel.kind == RelationKind::O2M);
            if !is_o2m {
                return Err(Error::InvalidFilter(format!(
                    "count() needs a one-to-many field, '{target}' is not one"
                )));
            }
        }

        Ok(Node::Function(FunctionNode {
            name: name.to_string(),
            field_key: field_key.to_string(),
            function,
            target,
            when_case: Vec::new(),
        }))
    }

    fn relational(
        &self,
        parent: &Level,
        key: &str,
        name: &str,
        group: RelationalGroup,
        depth: usize,
    ) -> Result<Node> {
        let collection = parent.collection.as_str();
        let relation = self
            .schema
            .relation(collection, name)
            .ok_or_else(|| Error::schema(format!("no relation for '{collection}.{name}'")))?;
        let deep = parent.query.deep.as_ref();

        if relation.kind == RelationKind::A2O {
            let allowed = &relation.def.one_allowed_collections;
            if let Some(scope) = group.scoped.keys().find(|s| !allowed.contains(s)) {
                return Err(Error::InvalidQuery(format!(
                    "collection '{scope}' is not allowed for '{collection}.{name}'"
                )));
            }

            let mut levels = IndexMap::with_capacity(allowed.len());
            for target in allowed {
                let mut fields = group.unscoped.clone();
                if let Some(scoped) = group.scoped.get(target) {
                    fields.extend(scoped.iter().cloned());
                }
                let query = deep
                    .and_then(|d| d.get(&format!("{key}:{target}")))
                    .cloned()
                    .unwrap_or_default();
                let level = self.build_level(target, query, fields, depth + 1)?;
                levels.insert(target.clone(), level);
            }

            return Ok(Node::A2O(AnyNode {
                field: name.to_string(),
                field_key: key.to_string(),
                relation: relation.def.clone(),
                levels,
                scoped: group.scoped.keys().cloned().collect(),
                when_case: Vec::new(),
            }));
        }

        if !group.scoped.is_empty() {
            return Err(Error::InvalidQuery(format!(
                "collection scope is only valid on any-to-one fields, got '{key}'"
            )));
        }

        let target = relation
            .target()
            .ok_or_else(|| Error::schema(format!("relation '{collection}.{name}' has no target")))?;
        let query = deep.and_then(|d| d.get(key)).cloned().unwrap_or_default();
        let mut level = self.build_level(target, query, group.unscoped, depth + 1)?;

        if relation.kind == RelationKind::O2M {
            let sort = match &relation.def.sort_field {
                Some(sort_field) => sort_field.clone(),
                None => self.schema.require_collection(target)?.primary.clone(),
            };
            level.default_sort = vec![sort];
        }

        let node = NestedNode {
            field: name.to_string(),
            field_key: key.to_string(),
            relation: relation.def.clone(),
            level,
            when_case: Vec::new(),
            from_wildcard: group.from_wildcard,
        };

        Ok(match relation.kind {
            RelationKind::O2M => Node::O2M(node),
            _ => Node::M2O(node),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldDef, FieldType, RelationDef};
    use warden_proto::AggregateFunction;

    fn schema() -> SchemaSnapshot {
        SchemaSnapshot::new(1)
            .with_collection(
                CollectionDef::new("articles", "id")
                    .with_field(FieldDef::new("id", FieldType::Integer))
                    .with_field(FieldDef::new("title", FieldType::String))
                    .with_field(FieldDef::new("date_created", FieldType::Timestamp))
                    .with_field(FieldDef::new("author", FieldType::Integer).nullable())
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
                    .with_field(FieldDef::new("name", FieldType::String))
                    .with_field(FieldDef::new("manager", FieldType::Integer).nullable()),
            )
            .with_collection(
                CollectionDef::new("blocks", "id")
                    .with_field(FieldDef::new("id", FieldType::Integer))
                    .with_field(FieldDef::new("item", FieldType::String))
                    .with_field(FieldDef::new("collection", FieldType::String)),
            )
            .with_collection(
                CollectionDef::new("headings", "id")
                    .with_field(FieldDef::new("id", FieldType::Integer))
                    .with_field(FieldDef::new("title", FieldType::String)),
            )
            .with_collection(
                CollectionDef::new("texts", "id")
                    .with_field(FieldDef::new("id", FieldType::Integer))
                    .with_field(FieldDef::new("body", FieldType::Text)),
            )
            .with_relation(RelationDef::many_to_one("articles", "author", "users"))
            .with_relation(RelationDef::many_to_one("users", "manager", "users"))
            .with_relation(
                RelationDef::many_to_one("comments", "article_id", "articles")
                    .with_one_field("comments"),
            )
            .with_relation(RelationDef::any_to_one(
                "blocks",
                "item",
                "collection",
                ["headings", "texts"],
            ))
    }

    fn keys(level: &Level) -> Vec<&str> {
        level.children.iter().map(Node::field_key).collect()
    }

    #[test]
    fn test_wildcard_expansion() {
        let schema = schema();
        let tree = QueryPlanner::new(&schema)
            .plan("articles", &Query::new())
            .unwrap();

        assert_eq!(
            keys(&tree.root),
            vec!["id", "title", "date_created", "author", "comments"]
        );
        assert!(tree.root.children.iter().all(Node::from_wildcard));
        // m2o without sub-fields stays a plain column
        assert!(matches!(tree.root.child("author"), Some(Node::Field(_))));
        match tree.root.child("comments") {
            Some(Node::O2M(node)) => assert!(node.level.children.is_empty()),
            other => panic!("expected o2m node, got {other:?}"),
        }
    }

    #[test]
    fn test_relational_fields_and_dedup() {
        let schema = schema();
        let query = Query::new().with_fields(["title", "author", "author.name", "comments.body"]);
        let tree = QueryPlanner::new(&schema).plan("articles", &query).unwrap();

        assert_eq!(keys(&tree.root), vec!["title", "author", "comments"]);
        match tree.root.child("author") {
            Some(Node::M2O(node)) => {
                assert_eq!(keys(&node.level), vec!["name"]);
                assert!(!node.from_wildcard);
            }
            other => panic!("expected m2o node, got {other:?}"),
        }
        match tree.root.child("comments") {
            Some(Node::O2M(node)) => {
                assert_eq!(node.level.query.sort, None);
                assert_eq!(node.level.sort(), &["id".to_string()]);
            }
            other => panic!("expected o2m node, got {other:?}"),
        }
    }

    #[test]
    fn test_alias_and_deep() {
        let schema = schema();
        let query = Query::new()
            .with_fields(["headline", "writer.name", "comments.*"])
            .with_alias("headline", "title")
            .with_alias("writer", "author")
            .with_deep("comments", Query::new().with_limit(2u64).with_sort(["-id"]));
        let tree = QueryPlanner::new(&schema).plan("articles", &query).unwrap();

        match tree.root.child("headline") {
            Some(Node::Field(node)) => assert_eq!(node.name, "title"),
            other => panic!("expected field node, got {other:?}"),
        }
        match tree.root.child("writer") {
            Some(Node::M2O(node)) => assert_eq!(node.field, "author"),
            other => panic!("expected m2o node, got {other:?}"),
        }
        match tree.root.child("comments") {
            Some(Node::O2M(node)) => {
                assert_eq!(node.level.sort(), &["-id".to_string()]);
                assert_eq!(keys(&node.level), vec!["id", "body", "article_id"]);
            }
            other => panic!("expected o2m node, got {other:?}"),
        }
    }

    #[test]
    fn test_function_fields() {
        let schema = schema();
        let query = Query::new().with_fields(["year(date_created)", "count(comments)"]);
        let tree = QueryPlanner::new(&schema).plan("articles", &query).unwrap();
        assert!(matches!(
            tree.root.child("year(date_created)"),
            Some(Node::Function(FunctionNode { function: FunctionKind::Year, .. }))
        ));

        let bad = Query::new().with_fields(["year(title)"]);
        assert!(matches!(
            QueryPlanner::new(&schema).plan("articles", &bad),
            Err(Error::InvalidFilter(_))
        ));

        let unknown = Query::new().with_fields(["md5(title)"]);
        assert!(matches!(
            QueryPlanner::new(&schema).plan("articles", &unknown),
            Err(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_any_to_one_scopes() {
        let schema = schema();
        let query = Query::new().with_fields(["id", "item:headings.title", "item.id"]);
        let tree = QueryPlanner::new(&schema).plan("blocks", &query).unwrap();

        match tree.root.child("item") {
            Some(Node::A2O(node)) => {
                assert_eq!(node.scoped, vec!["headings".to_string()]);
                assert_eq!(keys(&node.levels["headings"]), vec!["id", "title"]);
                assert_eq!(keys(&node.levels["texts"]), vec!["id"]);
            }
            other => panic!("expected a2o node, got {other:?}"),
        }

        let bad = Query::new().with_fields(["item:users.name"]);
        assert!(QueryPlanner::new(&schema).plan("blocks", &bad).is_err());
    }

    #[test]
    fn test_errors() {
        let schema = schema();
        let planner = QueryPlanner::new(&schema);

        assert!(matches!(
            planner.plan("nope", &Query::new()),
            Err(Error::SchemaResolution(_))
        ));
        assert!(matches!(
            planner.plan("articles", &Query::new().with_fields(["missing"])),
            Err(Error::SchemaResolution(_))
        ));
        assert!(matches!(
            planner.plan("articles", &Query::new().with_fields(["title.length"])),
            Err(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_max_depth_guard() {
        let schema = schema();
        let query = Query::new().with_fields(["manager.manager.manager.name"]);

        assert!(QueryPlanner::new(&schema)
            .with_max_depth(3)
            .plan("users", &query)
            .is_ok());
        assert!(matches!(
            QueryPlanner::new(&schema).with_max_depth(2).plan("users", &query),
            Err(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_aggregate_level_uses_group_fields() {
        let schema = schema();
        let query = Query::new()
            .with_fields(["title"])
            .with_group(["author"])
            .with_aggregate(AggregateFunction::Count, "id");
        let tree = QueryPlanner::new(&schema).plan("articles", &query).unwrap();
        assert_eq!(keys(&tree.root), vec!["author"]);

        let nested = Query::new()
            .with_fields(["comments.id"])
            .with_deep("comments", Query::new().with_aggregate(AggregateFunction::Count, "*"));
        assert!(matches!(
            QueryPlanner::new(&schema).plan("articles", &nested),
            Err(Error::AggregateValidation(_))
        ));
    }
}
