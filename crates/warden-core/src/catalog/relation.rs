//! Relation definitions between collections.
//!
//! A relation is stored once, from the point of view of the collection that
//! holds the foreign key (the "many" side). The same record is reachable from
//! both ends: through `field` on `collection` as a many-to-one (or any-to-one
//! when there is no fixed related collection), and through `one_field` on
//! `related_collection` as a one-to-many.

use serde::{Deserialize, Deserializer, Serialize};

/// Kind of a relational field as seen from the collection that declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// Foreign key to one row of a fixed collection.
    M2O,
    /// Inverse of a many-to-one, exposed through an alias field.
    O2M,
    /// Foreign key plus discriminator naming the target collection.
    A2O,
}

impl RelationKind {
    /// Whether the field resolves to a list of rows.
    pub fn is_many(&self) -> bool {
        matches!(self, RelationKind::O2M)
    }
}

/// A relation definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Collection holding the foreign key.
    pub collection: String,
    /// Field through which the relation is addressed on `collection`.
    pub field: String,
    /// Foreign key columns on `collection`. Empty means `[field]`.
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    /// Referenced collection. `None` for any-to-one relations.
    #[serde(default)]
    pub related_collection: Option<String>,
    /// Referenced columns. Empty means the related primary key.
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub related_columns: Vec<String>,
    /// Alias field on `related_collection` exposing the one-to-many side.
    #[serde(default)]
    pub one_field: Option<String>,
    /// Discriminator column of an any-to-one relation.
    #[serde(default)]
    pub one_collection_field: Option<String>,
    /// Collections an any-to-one relation may point at.
    #[serde(default)]
    pub one_allowed_collections: Vec<String>,
    /// Other half of a junction (many-to-many and any-to-many).
    #[serde(default)]
    pub junction_field: Option<String>,
    /// Manual sort column on `collection` for the one-to-many side.
    #[serde(default)]
    pub sort_field: Option<String>,
}

impl RelationDef {
    /// Create a many-to-one relation from `collection.field` to `related_collection`.
    pub fn many_to_one(
        collection: impl Into<String>,
        field: impl Into<String>,
        related_collection: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
            columns: Vec::new(),
            related_collection: Some(related_collection.into()),
            related_columns: Vec::new(),
            one_field: None,
            one_collection_field: None,
            one_allowed_collections: Vec::new(),
            junction_field: None,
            sort_field: None,
        }
    }

    /// Create an any-to-one relation.
    pub fn any_to_one<I, S>(
        collection: impl Into<String>,
        field: impl Into<String>,
        one_collection_field: impl Into<String>,
        allowed: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            collection: collection.into(),
            field: field.into(),
            columns: Vec::new(),
            related_collection: None,
            related_columns: Vec::new(),
            one_field: None,
            one_collection_field: Some(one_collection_field.into()),
            one_allowed_collections: allowed.into_iter().map(Into::into).collect(),
            junction_field: None,
            sort_field: None,
        }
    }

    /// Expose the one-to-many side through `one_field`.
    pub fn with_one_field(mut self, one_field: impl Into<String>) -> Self {
        self.one_field = Some(one_field.into());
        self
    }

    /// Use composite key columns.
    pub fn with_columns<I, S>(mut self, columns: I, related_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self.related_columns = related_columns.into_iter().map(Into::into).collect();
        self
    }

    /// Record the other half of a junction.
    pub fn with_junction_field(mut self, field: impl Into<String>) -> Self {
        self.junction_field = Some(field.into());
        self
    }

    /// Set the manual sort column for the one-to-many side.
    pub fn with_sort_field(mut self, field: impl Into<String>) -> Self {
        self.sort_field = Some(field.into());
        self
    }

    /// Foreign key columns on `collection`.
    pub fn fk_columns(&self) -> Vec<String> {
        if self.columns.is_empty() {
            vec![self.field.clone()]
        } else {
            self.columns.clone()
        }
    }

    /// Whether this is an any-to-one relation.
    pub fn is_any(&self) -> bool {
        self.related_collection.is_none() && self.one_collection_field.is_some()
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::One(s)) => vec![s],
        Some(Raw::Many(v)) => v,
        None => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_many_to_one() {
        let rel = RelationDef::many_to_one("articles", "author", "users").with_one_field("articles");

        assert_eq!(rel.fk_columns(), vec!["author".to_string()]);
        assert_eq!(rel.related_collection.as_deref(), Some("users"));
        assert!(!rel.is_any());
    }

    #[test]
    fn test_composite_columns() {
        let rel = RelationDef::many_to_one("lines", "order", "orders")
            .with_columns(["order_region", "order_no"], ["region", "no"]);
        assert_eq!(rel.fk_columns().len(), 2);
        assert_eq!(rel.related_columns, vec!["region".to_string(), "no".to_string()]);
    }

    #[test]
    fn test_any_to_one() {
        let rel = RelationDef::any_to_one("blocks", "item", "collection", ["headings", "texts"]);
        assert!(rel.is_any());
        assert_eq!(rel.one_allowed_collections.len(), 2);
    }

    #[test]
    fn test_deserialize() {
        let rel: RelationDef = serde_json::from_value(serde_json::json!({
            "collection": "comments",
            "field": "article_id",
            "related_collection": "articles",
            "one_field": "comments",
            "related_columns": "id"
        }))
        .unwrap();
        assert_eq!(rel.one_field.as_deref(), Some("comments"));
        assert_eq!(rel.related_columns, vec!["id".to_string()]);
    }
}
