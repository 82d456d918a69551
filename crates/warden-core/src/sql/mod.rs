//! SQL compilation.
//!
//! Annotated query levels are lowered into a small statement tree ([`ir`])
//! and rendered for one of the supported dialects. Values never appear in the
//! statement text: every operand is a bound parameter, deduplicated per
//! statement by value and column type.
//!
//! ```text
//! Level ──compile──▶ Select ──render(dialect)──▶ CompiledQuery { sql, parameters }
//! ```

mod aggregate;
pub mod alias;
mod compiler;
pub mod dialect;
mod filter;
pub mod ir;
pub mod params;
pub mod render;

pub use alias::{AliasMap, AliasScope};
pub use compiler::{
    aggregate_key, column_key, pagination, visible_key, KeySet, SqlCompiler, AGGREGATE_SEPARATOR,
    COLUMN_PREFIX, ROW_KEY, VISIBLE_PREFIX,
};
pub use dialect::Dialect;
pub use params::ParamSet;
pub use render::{render, CompiledQuery};
