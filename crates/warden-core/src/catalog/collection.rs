//! Collection definitions.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::field::FieldDef;

/// A collection (table) definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDef {
    /// Collection name, equal to the table name.
    pub name: String,
    /// Primary key field.
    pub primary: String,
    /// Field used for manual ordering, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_field: Option<String>,
    /// Field definitions in declaration order.
    #[serde(serialize_with = "fields_as_list", deserialize_with = "fields_from_list")]
    pub fields: IndexMap<String, FieldDef>,
}

impl CollectionDef {
    /// Create a new collection definition.
    pub fn new(name: impl Into<String>, primary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary: primary.into(),
            sort_field: None,
            fields: IndexMap::new(),
        }
    }

    /// Add a field.
    pub fn with_field(mut self, mut field: FieldDef) -> Self {
        if field.name == self.primary {
            field.tags.primary = true;
        }
        self.fields.insert(field.name.clone(), field);
        self
    }

    /// Set the manual sort field.
    pub fn with_sort_field(mut self, field: impl Into<String>) -> Self {
        self.sort_field = Some(field.into());
        self
    }

    /// Get a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    /// The primary key field definition.
    pub fn primary_field(&self) -> Option<&FieldDef> {
        self.fields.get(&self.primary)
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

fn fields_as_list<S: Serializer>(
    fields: &IndexMap<String, FieldDef>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(fields.values())
}

fn fields_from_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<IndexMap<String, FieldDef>, D::Error> {
    let list = Vec::<FieldDef>::deserialize(deserializer)?;
    Ok(list.into_iter().map(|f| (f.name.clone(), f)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldType;

    #[test]
    fn test_collection_builder() {
        let articles = CollectionDef::new("articles", "id")
            .with_field(FieldDef::new("id", FieldType::Integer))
            .with_field(FieldDef::new("title", FieldType::String))
            .with_field(FieldDef::alias("comments"));

        assert_eq!(articles.fields.len(), 3);
        assert!(articles.primary_field().unwrap().tags.primary);
        assert_eq!(
            articles.field_names().collect::<Vec<_>>(),
            vec!["id", "title", "comments"]
        );
    }

    #[test]
    fn test_json_preserves_order() {
        let json = serde_json::json!({
            "name": "tags",
            "primary": "id",
            "fields": [
                {"name": "id", "type": "uuid"},
                {"name": "label", "type": "string"}
            ]
        });
        let tags: CollectionDef = serde_json::from_value(json).unwrap();
        assert_eq!(tags.field_names().collect::<Vec<_>>(), vec!["id", "label"]);
        assert_eq!(tags.field("id").unwrap().field_type, FieldType::Uuid);
    }
}
