//! Resolution of dotted field paths against the schema.

use crate::catalog::{FieldType, RelationKind, ResolvedRelation, SchemaSnapshot};
use crate::error::{Error, Result};

use super::function::{parse_function, FunctionKind};

/// One relation hop of a path.
#[derive(Debug, Clone)]
pub struct Hop<'a> {
    /// Collection the hop starts from.
    pub collection: String,
    /// Relational field on `collection`.
    pub field: String,
    /// The traversed relation.
    pub relation: ResolvedRelation<'a>,
    /// Collection the hop lands on.
    pub target: String,
}

/// A path resolved down to a concrete field.
#[derive(Debug, Clone)]
pub struct ResolvedPath<'a> {
    /// Relation hops, outermost first.
    pub hops: Vec<Hop<'a>>,
    /// Collection holding the leaf field.
    pub collection: String,
    /// Leaf field name.
    pub field: String,
    /// Function wrapped around the leaf, if any.
    pub function: Option<FunctionKind>,
    /// Type of the leaf value after the function is applied.
    pub value_type: FieldType,
}

impl ResolvedPath<'_> {
    /// Whether any hop fans out to many rows.
    pub fn first_many_hop(&self) -> Option<usize> {
        self.hops.iter().position(|hop| hop.relation.kind.is_many())
    }
}

/// Split `field:collection` into its field and optional collection scope.
pub fn split_scope(segment: &str) -> (&str, Option<&str>) {
    match segment.split_once(':') {
        Some((field, scope)) => (field, Some(scope)),
        None => (segment, None),
    }
}

/// Resolve `path` starting at `collection`.
///
/// Every segment but the last must be relational, and the last must name a
/// field with a backing column (optionally function-wrapped). Any-to-one hops
/// need a collection scope, `item:headings.title`.
pub fn resolve_path<'a>(
    schema: &'a SchemaSnapshot,
    collection: &str,
    path: &[String],
) -> Result<ResolvedPath<'a>> {
    let Some((leaf, hops_part)) = path.split_last() else {
        return Err(Error::InvalidFilter("empty field path".into()));
    };

    let mut current = collection.to_string();
    let mut hops = Vec::with_capacity(hops_part.len());

    for segment in hops_part {
        let (field, scope) = split_scope(segment);
        schema.require_field(&current, field)?;

        let relation = schema.relation(&current, field).ok_or_else(|| {
            Error::InvalidFilter(format!(
                "field '{field}' of '{current}' is not relational and cannot be traversed"
            ))
        })?;

        let target = match (relation.kind, scope) {
            (RelationKind::A2O, Some(scope)) => {
                if !relation.def.one_allowed_collections.iter().any(|c| c == scope) {
                    return Err(Error::InvalidFilter(format!(
                        "collection '{scope}' is not allowed for '{current}.{field}'"
                    )));
                }
                scope.to_string()
            }
            (RelationKind::A2O, None) => {
                return Err(Error::InvalidFilter(format!(
                    "any-to-one field '{current}.{field}' needs a collection scope"
                )))
            }
            (_, Some(_)) => {
                return Err(Error::InvalidFilter(format!(
                    "collection scope is only valid on any-to-one fields, got '{segment}'"
                )))
            }
            (_, None) => relation
                .target()
                .ok_or_else(|| Error::schema(format!("relation '{current}.{field}' has no target")))?
                .to_string(),
        };
        schema.require_collection(&target)?;

        hops.push(Hop {
            collection: current.clone(),
            field: field.to_string(),
            relation,
            target: target.clone(),
        });
        current = target;
    }

    let (function, field) = match parse_function(leaf) {
        Ok(Some((kind, field))) => (Some(kind), field),
        Ok(None) => (None, leaf.clone()),
        Err(err) => return Err(Error::InvalidFilter(err.to_string())),
    };

    let def = schema.require_field(&current, &field)?;

    let value_type = match function {
        Some(kind) => {
            kind.check_target(&field, &def.field_type)?;
            if kind == FunctionKind::Count {
                match schema.relation(&current, &field) {
                    Some(rel) if rel.kind == RelationKind::O2M => {}
                    _ => {
                        return Err(Error::InvalidFilter(format!(
                            "count() needs a one-to-many field, '{field}' is not one"
                        )))
                    }
                }
                FieldType::BigInteger
            } else {
                FieldType::Integer
            }
        }
        None => {
            if def.is_alias() {
                return Err(Error::InvalidFilter(format!(
                    "path '{}' does not end in a concrete field",
                    path.join(".")
                )));
            }
            def.field_type.clone()
        }
    };

    Ok(ResolvedPath {
        hops,
        collection: current,
        field,
        function,
        value_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CollectionDef, FieldDef, RelationDef};

    fn schema() -> SchemaSnapshot {
        SchemaSnapshot::new(1)
            .with_collection(
                CollectionDef::new("articles", "id")
                    .with_field(FieldDef::new("id", FieldType::Integer))
                    .with_field(FieldDef::new("title", FieldType::String))
                    .with_field(FieldDef::new("date_created", FieldType::Timestamp))
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

    fn path(s: &str) -> Vec<String> {
        s.split('.').map(str::to_string).collect()
    }

    #[test]
    fn test_plain_and_relational_paths() {
        let schema = schema();

        let plain = resolve_path(&schema, "articles", &path("title")).unwrap();
        assert!(plain.hops.is_empty());
        assert_eq!(plain.value_type, FieldType::String);

        let nested = resolve_path(&schema, "articles", &path("author.name")).unwrap();
        assert_eq!(nested.hops.len(), 1);
        assert_eq!(nested.collection, "users");
        assert_eq!(nested.first_many_hop(), None);

        let many = resolve_path(&schema, "articles", &path("comments.body")).unwrap();
        assert_eq!(many.first_many_hop(), Some(0));
    }

    #[test]
    fn test_functions() {
        let schema = schema();
        let year = resolve_path(&schema, "articles", &path("year(date_created)")).unwrap();
        assert_eq!(year.function, Some(FunctionKind::Year));

        let count = resolve_path(&schema, "articles", &path("count(comments)")).unwrap();
        assert_eq!(count.value_type, FieldType::BigInteger);

        assert!(matches!(
            resolve_path(&schema, "articles", &path("year(title)")),
            Err(Error::InvalidFilter(_))
        ));
        assert!(matches!(
            resolve_path(&schema, "articles", &path("bogus(title)")),
            Err(Error::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_rejects_bad_paths() {
        let schema = schema();
        assert!(matches!(
            resolve_path(&schema, "articles", &path("nope")),
            Err(Error::SchemaResolution(_))
        ));
        assert!(matches!(
            resolve_path(&schema, "articles", &path("title.length")),
            Err(Error::InvalidFilter(_))
        ));
        assert!(matches!(
            resolve_path(&schema, "articles", &path("comments")),
            Err(Error::InvalidFilter(_))
        ));
    }
}
