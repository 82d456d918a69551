//! Relational driver port.
//!
//! The engine never opens connections. It hands every compiled statement to a
//! [`RelationalDriver`] and consumes the rows it streams back. Rows are keyed
//! by the column aliases of the statement, so a driver only has to decode
//! column values into [`Value`](warden_proto::Value)s.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use warden_proto::Item;

use crate::error::DriverError;
use crate::sql::{CompiledQuery, Dialect};

/// Stream of result rows.
pub type RowStream = Pin<Box<dyn Stream<Item = Result<Item, DriverError>> + Send>>;

/// Executes compiled statements against a relational database.
///
/// Dropping a returned stream must release the statement; the engine drops
/// in-flight streams when a request is cancelled or times out.
#[async_trait]
pub trait RelationalDriver: Send + Sync {
    /// Dialect statements must be compiled for.
    fn dialect(&self) -> Dialect;

    /// Run a statement and stream its rows.
    async fn execute(&self, query: &CompiledQuery) -> Result<RowStream, DriverError>;
}

/// Wrap already-materialized rows as a [`RowStream`].
pub fn row_stream(rows: Vec<Item>) -> RowStream {
    Box::pin(stream::iter(rows.into_iter().map(Ok)))
}
