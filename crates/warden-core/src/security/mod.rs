//! Permission enforcement for reads.
//!
//! Permissions reach the engine as flat records from a [`PermissionStore`].
//! Per request they are resolved against the caller ([`DynamicContext`]),
//! reduced to per-collection field and row access ([`AccessMap`]), and then
//! woven into the query tree by the [`Annotator`]:
//!
//! - each level gets its collection's conditional row filters (`cases`)
//! - each child gets the indices of the cases it is visible under
//!   (`when_case`), empty when some record grants it unconditionally
//! - explicitly requested fields no record covers fail with
//!   [`Error::ForbiddenField`](crate::Error::ForbiddenField)
//!
//! Admin callers bypass annotation entirely.

pub mod access;
pub mod annotate;
pub mod context;
pub mod merge;
pub mod policy;

pub use access::{AccessMap, CollectionAccess};
pub use annotate::Annotator;
pub use context::{needs_records, DynamicContext};
pub use merge::{merge_permissions, MergeStrategy};
pub use policy::{resolve_access, MemoryPermissionStore, PermissionStore, ResolvedAccess};
