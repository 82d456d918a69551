//! Schema catalog for Warden.
//!
//! The catalog describes collections, their fields, and the relation graph
//! the query compiler walks.

mod collection;
mod field;
mod relation;
mod schema;
mod types;

pub use collection::CollectionDef;
pub use field::{FieldDef, FieldTags};
pub use relation::{RelationDef, RelationKind};
pub use schema::{ResolvedRelation, SchemaSnapshot};
pub use types::FieldType;
