//! SQLite driver for the Warden query engine.
//!
//! Statements run on tokio's blocking pool against a single shared
//! [`rusqlite::Connection`]. Rows are decoded as they are stepped and pushed
//! through a bounded channel, so a slow consumer holds the producer back and
//! dropping the stream stops the statement at the next row.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use tokio::sync::mpsc;
use tracing::trace;
use warden_core::driver::{RelationalDriver, RowStream};
use warden_core::sql::{CompiledQuery, Dialect};
use warden_core::DriverError;
use warden_proto::{Item, Value, MAX_SAFE_INTEGER};

/// Default number of decoded rows buffered between the statement and its reader.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

type RowSender = mpsc::Sender<Result<Item, DriverError>>;

/// Relational driver over an SQLite database.
#[derive(Clone)]
pub struct SqliteDriver {
    conn: Arc<Mutex<Connection>>,
    channel_capacity: usize,
}

impl SqliteDriver {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let conn = Connection::open(path).map_err(DriverError::from_source)?;
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, DriverError> {
        let conn = Connection::open_in_memory().map_err(DriverError::from_source)?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Set the row buffer size.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Run one or more setup statements synchronously.
    pub fn execute_batch(&self, sql: &str) -> Result<(), DriverError> {
        self.conn
            .lock()
            .execute_batch(sql)
            .map_err(DriverError::from_source)
    }
}

#[async_trait]
impl RelationalDriver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute(&self, query: &CompiledQuery) -> Result<RowStream, DriverError> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let conn = Arc::clone(&self.conn);
        let sql = query.sql.clone();
        let params: Vec<SqlValue> = query.parameters.iter().map(to_sql).collect();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            if let Err(err) = stream_rows(&conn, &sql, params, &tx) {
                // The reader may already be gone.
                let _ = tx.blocking_send(Err(DriverError::from_source(err)));
            }
        });

        let rows = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|row| (row, rx))
        });
        Ok(rows.boxed())
    }
}

/// Step `sql` and send each decoded row until the reader hangs up.
fn stream_rows(
    conn: &Connection,
    sql: &str,
    params: Vec<SqlValue>,
    tx: &RowSender,
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare_cached(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(params))?;

    let mut count = 0usize;
    while let Some(row) = rows.next()? {
        let mut item = Item::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            item.insert(column.clone(), from_sql(row.get_ref(index)?));
        }
        if tx.blocking_send(Ok(item)).is_err() {
            trace!(rows = count, "reader dropped, statement abandoned");
            return Ok(());
        }
        count += 1;
    }
    trace!(rows = count, "statement finished");
    Ok(())
}

/// Bind a parameter.
fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::BigInt(text) => SqlValue::Text(text.clone()),
        Value::Float(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Uuid(u) => SqlValue::Text(u.hyphenated().to_string()),
        Value::List(_) | Value::Object(_) => SqlValue::Text(value.to_json().to_string()),
    }
}

/// Decode a column value. Integers a double cannot hold exactly stay opaque.
fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) if i.unsigned_abs() > MAX_SAFE_INTEGER.unsigned_abs() => {
            Value::BigInt(i.to_string())
        }
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
