//! Query tree construction and execution.
//!
//! A request goes through these stages:
//!
//! ```text
//! Query ──plan──▶ QueryTree ──validate──▶ ──annotate──▶ ──compile──▶ ──execute──▶ ──prune──▶ items
//! ```
//!
//! Annotation lives in [`crate::security`] and compilation in [`crate::sql`];
//! this module owns the tree, its validation, nested-result execution, and
//! the final field pruning.

pub mod ast;
pub mod executor;
pub mod function;
pub mod path;
pub mod planner;
pub mod prune;
pub mod validate;

pub use ast::{AnyNode, FieldNode, FunctionNode, Level, NestedNode, Node, QueryTree};
pub use executor::QueryExecutor;
pub use function::FunctionKind;
pub use path::{resolve_path, ResolvedPath};
pub use planner::QueryPlanner;
pub use prune::prune;
pub use validate::{validate_filter, validate_tree};
