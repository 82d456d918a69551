//! Warden Core - permission-aware query compilation and nested result execution.
//!
//! This crate turns a read request into parameterized SQL that enforces the
//! caller's field and row permissions, runs it through a [`RelationalDriver`],
//! and assembles the nested result.

pub mod cache;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod query;
pub mod security;
pub mod sql;

pub use cache::{cache_key, CachePort, CacheStats, MemoryCache};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use catalog::{
    CollectionDef, FieldDef, FieldTags, FieldType, RelationDef, RelationKind, ResolvedRelation,
    SchemaSnapshot,
};
pub use config::EngineConfig;
pub use driver::{row_stream, RelationalDriver, RowStream};
pub use engine::{Engine, Explain};
pub use error::{DriverError, Error, Result};
pub use query::{prune, Level, Node, QueryExecutor, QueryPlanner, QueryTree};

// Security exports
pub use security::{
    merge_permissions, resolve_access, AccessMap, Annotator, CollectionAccess, DynamicContext,
    MemoryPermissionStore, MergeStrategy, PermissionStore, ResolvedAccess,
};

// SQL exports
pub use sql::{CompiledQuery, Dialect, SqlCompiler};

/// Re-export protocol types.
pub use warden_proto as proto;
