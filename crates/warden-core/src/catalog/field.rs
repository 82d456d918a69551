//! Field definitions for collections.

use serde::{Deserialize, Serialize};

use super::types::FieldType;

/// Behavioral tags of a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldTags {
    /// Virtual field without a column.
    pub alias: bool,
    /// Value must never be returned or searched.
    pub concealed: bool,
    /// Part of the primary key.
    pub primary: bool,
    /// Excluded from free-text search.
    pub no_search: bool,
}

/// A field definition within a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name, equal to the column name.
    pub name: String,
    /// Storage type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the column accepts nulls.
    #[serde(default)]
    pub nullable: bool,
    /// Whether the database generates the value.
    #[serde(default)]
    pub generated: bool,
    /// Behavioral tags.
    #[serde(default)]
    pub tags: FieldTags,
}

impl FieldDef {
    /// Create a new non-nullable field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let alias = field_type.is_alias();
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            generated: false,
            tags: FieldTags {
                alias,
                ..FieldTags::default()
            },
        }
    }

    /// Create an alias field, such as the one side of a relation.
    pub fn alias(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Alias)
    }

    /// Mark as nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Mark as database-generated.
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    /// Mark as concealed.
    pub fn concealed(mut self) -> Self {
        self.tags.concealed = true;
        self
    }

    /// Exclude from search.
    pub fn no_search(mut self) -> Self {
        self.tags.no_search = true;
        self
    }

    /// Whether the field has no backing column.
    pub fn is_alias(&self) -> bool {
        self.tags.alias || self.field_type.is_alias()
    }

    /// Whether free-text search may consider this field.
    pub fn is_searchable(&self) -> bool {
        !self.is_alias() && !self.tags.concealed && !self.tags.no_search
    }
}
