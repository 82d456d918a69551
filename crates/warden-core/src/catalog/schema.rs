//! Schema snapshot - versioned, read-only view of collections and relations.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{CollectionDef, FieldDef, RelationDef, RelationKind};
use crate::error::{Error, Result};

/// A relation resolved from one end.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedRelation<'a> {
    /// Kind of the relation seen from the field that was looked up.
    pub kind: RelationKind,
    /// The stored relation.
    pub def: &'a RelationDef,
}

impl<'a> ResolvedRelation<'a> {
    /// Collection rows are fetched from, `None` for any-to-one.
    pub fn target(&self) -> Option<&'a str> {
        match self.kind {
            RelationKind::M2O => self.def.related_collection.as_deref(),
            RelationKind::O2M => Some(&self.def.collection),
            RelationKind::A2O => None,
        }
    }
}

#[derive(Deserialize)]
struct SchemaDocument {
    #[serde(default)]
    version: u64,
    collections: Vec<CollectionDef>,
    #[serde(default)]
    relations: Vec<RelationDef>,
}

impl From<SchemaDocument> for SchemaSnapshot {
    fn from(doc: SchemaDocument) -> Self {
        let mut schema = SchemaSnapshot::new(doc.version);
        for collection in doc.collections {
            schema = schema.with_collection(collection);
        }
        for relation in doc.relations {
            schema = schema.with_relation(relation);
        }
        schema
    }
}

/// A versioned snapshot of collections and the relation graph.
///
/// Relations are kept as an adjacency list keyed by `(collection, field)`;
/// collection definitions never hold references to each other, so cyclic and
/// self-referential graphs need no special handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SchemaDocument")]
pub struct SchemaSnapshot {
    /// Schema version.
    pub version: u64,
    #[serde(serialize_with = "collections_as_list")]
    collections: IndexMap<String, CollectionDef>,
    relations: Vec<RelationDef>,
    #[serde(skip)]
    edges: HashMap<(String, String), (RelationKind, usize)>,
}

fn collections_as_list<S: serde::Serializer>(
    collections: &IndexMap<String, CollectionDef>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(collections.values())
}

impl SchemaSnapshot {
    /// Create an empty snapshot.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            collections: IndexMap::new(),
            relations: Vec::new(),
            edges: HashMap::new(),
        }
    }

    /// Add a collection.
    pub fn with_collection(mut self, collection: CollectionDef) -> Self {
        self.collections.insert(collection.name.clone(), collection);
        self
    }

    /// Add a relation and index both of its ends.
    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        let index = self.relations.len();
        let kind = if relation.is_any() {
            RelationKind::A2O
        } else {
            RelationKind::M2O
        };
        self.edges.insert(
            (relation.collection.clone(), relation.field.clone()),
            (kind, index),
        );
        if let (Some(related), Some(one_field)) = (&relation.related_collection, &relation.one_field) {
            self.edges
                .insert((related.clone(), one_field.clone()), (RelationKind::O2M, index));
        }
        self.relations.push(relation);
        self
    }

    /// Get a collection by name.
    pub fn collection(&self, name: &str) -> Option<&CollectionDef> {
        self.collections.get(name)
    }

    /// Get a collection or fail with a resolution error.
    pub fn require_collection(&self, name: &str) -> Result<&CollectionDef> {
        self.collection(name)
            .ok_or_else(|| Error::schema(format!("unknown collection '{name}'")))
    }

    /// Get a field or fail with a resolution error.
    pub fn require_field(&self, collection: &str, field: &str) -> Result<&FieldDef> {
        self.require_collection(collection)?
            .field(field)
            .ok_or_else(|| Error::schema(format!("unknown field '{field}' in collection '{collection}'")))
    }

    /// Look up the relation addressed through `collection.field`.
    pub fn relation(&self, collection: &str, field: &str) -> Option<ResolvedRelation<'_>> {
        self.edges
            .get(&(collection.to_string(), field.to_string()))
            .map(|(kind, index)| ResolvedRelation {
                kind: *kind,
                def: &self.relations[*index],
            })
    }

    /// All collections in declaration order.
    pub fn collections(&self) -> impl Iterator<Item = &CollectionDef> {
        self.collections.values()
    }

    /// All relations.
    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    /// Primary key columns of a collection.
    pub fn primary_key(&self, collection: &str) -> Result<Vec<String>> {
        Ok(vec![self.require_collection(collection)?.primary.clone()])
    }

    /// Columns on `target` referenced by a relation's foreign key.
    pub fn referenced_columns(&self, relation: &RelationDef, target: &str) -> Result<Vec<String>> {
        if !relation.related_columns.is_empty()
            && relation.related_collection.as_deref() == Some(target)
        {
            Ok(relation.related_columns.clone())
        } else {
            self.primary_key(target)
        }
    }

    /// Local and remote key columns of a relation traversed from its `kind` end.
    ///
    /// For an any-to-one relation `target` names the collection selected by
    /// the discriminator.
    pub fn join_columns(
        &self,
        relation: ResolvedRelation<'_>,
        target: &str,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let def = relation.def;
        let (local, remote) = match relation.kind {
            RelationKind::M2O | RelationKind::A2O => {
                (def.fk_columns(), self.referenced_columns(def, target)?)
            }
            RelationKind::O2M => {
                let parent = def.related_collection.as_deref().ok_or_else(|| {
                    Error::schema(format!(
                        "relation {}.{} has no related collection",
                        def.collection, def.field
                    ))
                })?;
                (self.referenced_columns(def, parent)?, def.fk_columns())
            }
        };
        if local.len() != remote.len() {
            return Err(Error::schema(format!(
                "relation {}.{} has {} local and {} remote key columns",
                def.collection,
                def.field,
                local.len(),
                remote.len()
            )));
        }
        Ok((local, remote))
    }

    /// Check that every relation points at known collections and fields.
    pub fn validate(&self) -> Result<()> {
        for relation in &self.relations {
            for column in relation.fk_columns() {
                self.require_field(&relation.collection, &column)?;
            }
            if let Some(related) = &relation.related_collection {
                self.require_collection(related)?;
            }
            for allowed in &relation.one_allowed_collections {
                self.require_collection(allowed)?;
            }
        }
        Ok(())
    }
}

impl Default for SchemaSnapshot {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldType;

    fn blog() -> SchemaSnapshot {
        SchemaSnapshot::new(1)
            .with_collection(
                CollectionDef::new("articles", "id")
                    .with_field(FieldDef::new("id", FieldType::Integer))
                    .with_field(FieldDef::new("title", FieldType::String))
                    .with_field(FieldDef::new("author", FieldType::Integer).nullable())
                    .with_field(FieldDef::alias("comments")),
            )
            .with_collection(
                CollectionDef::new("comments", "id")
                    .with_field(FieldDef::new("id", FieldType::Integer))
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

    #[test]
    fn test_relation_lookup_both_ends() {
        let schema = blog();

        let author = schema.relation("articles", "author").unwrap();
        assert_eq!(author.kind, RelationKind::M2O);
        assert_eq!(author.target(), Some("users"));

        let comments = schema.relation("articles", "comments").unwrap();
        assert_eq!(comments.kind, RelationKind::O2M);
        assert_eq!(comments.target(), Some("comments"));

        assert!(schema.relation("articles", "title").is_none());
    }

    #[test]
    fn test_join_columns() {
        let schema = blog();
        let comments = schema.relation("articles", "comments").unwrap();
        let (local, remote) = schema.join_columns(comments, "comments").unwrap();
        assert_eq!(local, vec!["id".to_string()]);
        assert_eq!(remote, vec!["article_id".to_string()]);
    }

    #[test]
    fn test_require_errors() {
        let schema = blog();
        assert!(schema.require_collection("nope").is_err());
        assert!(schema.require_field("articles", "nope").is_err());
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn test_json_roundtrip_rebuilds_edges() {
        let schema = blog();
        let json = serde_json::to_value(&schema).unwrap();
        let restored: SchemaSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(restored.version, 1);
        assert!(restored.relation("articles", "comments").is_some());
    }
}
