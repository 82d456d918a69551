//! Warden query model types.
//!
//! This crate defines the data handed to the Warden engine: read queries,
//! filter trees with their JSON syntax, permission records, and the
//! accountability of the caller. It is pure data; interpretation against a
//! schema happens in `warden-core`.
//!
//! # Modules
//!
//! - [`value`] - Runtime values for operands, parameters, and results
//! - [`filter`] - Filter trees and the `{"field": {"_op": value}}` syntax
//! - [`query`] - Read query parameters (fields, sort, pagination, aggregation)
//! - [`permission`] - Permission records and accountability
//! - [`error`] - Errors for malformed input
//!
//! # Example
//!
//! ```
//! use warden_proto::{Filter, Query};
//!
//! let query = Query::new()
//!     .with_fields(["title", "comments.body"])
//!     .with_filter(Filter::eq("status", "published"))
//!     .with_limit(10u64);
//!
//! assert!(query.filter.is_some());
//! ```

pub mod error;
pub mod filter;
pub mod permission;
pub mod query;
pub mod value;

pub use error::{Error, Result};

// Re-export commonly used types at crate root
pub use filter::{Condition, Filter, LogicalOp, Operator};
pub use permission::{Accountability, Action, FieldSet, Permission};
pub use query::{Aggregate, AggregateFunction, PageArg, Query};
pub use value::{Item, Value, MAX_SAFE_INTEGER};
