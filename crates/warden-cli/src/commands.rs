//! Command execution.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use warden_core::driver::{RelationalDriver, RowStream};
use warden_core::sql::{CompiledQuery, Dialect};
use warden_core::{DriverError, Engine, EngineConfig, MemoryPermissionStore, SchemaSnapshot};
use warden_proto::{Accountability, Query};
use warden_sqlite::SqliteDriver;

use crate::formatter::Formatter;
use crate::{Command, RequestArgs};

/// CLI errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {what}: {source}")]
    Json {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("[{code}] {0}", code = .0.code())]
    Engine(#[from] warden_core::Error),

    #[error("database error: {0}")]
    Driver(#[from] DriverError),
}

/// Driver for commands that only compile; it has a dialect but no database.
struct OfflineDriver(Dialect);

#[async_trait]
impl RelationalDriver for OfflineDriver {
    fn dialect(&self) -> Dialect {
        self.0
    }

    async fn execute(&self, _query: &CompiledQuery) -> Result<RowStream, DriverError> {
        Err(DriverError::new("no database attached; use `warden query --database`"))
    }
}

/// A loaded request: schema, query, caller, and engine settings.
struct Request {
    collection: String,
    schema: SchemaSnapshot,
    query: Query,
    accountability: Accountability,
    permissions: MemoryPermissionStore,
    config: EngineConfig,
}

impl Request {
    fn load(args: RequestArgs) -> Result<Self, CliError> {
        let schema: SchemaSnapshot = parse("schema", &read(&args.schema)?)?;
        schema.validate()?;

        let query = match (&args.query, &args.query_file) {
            (Some(inline), _) => parse("query", inline)?,
            (None, Some(path)) => parse("query", &read(path)?)?,
            (None, None) => Query::new(),
        };

        let permissions = match &args.permissions {
            Some(path) => MemoryPermissionStore::from_json(&read(path)?)?,
            None => MemoryPermissionStore::new(),
        };

        let accountability = accountability(&args);
        Ok(Self {
            collection: args.collection,
            schema,
            query,
            accountability,
            permissions,
            config: args.engine.into_config(),
        })
    }

    fn engine(self, driver: Arc<dyn RelationalDriver>) -> (Engine, Prepared) {
        let engine = Engine::new(driver, Arc::new(self.permissions)).with_config(self.config);
        let prepared = Prepared {
            collection: self.collection,
            schema: self.schema,
            query: self.query,
            accountability: self.accountability,
        };
        (engine, prepared)
    }
}

/// The parts of a request the engine reads per call.
struct Prepared {
    collection: String,
    schema: SchemaSnapshot,
    query: Query,
    accountability: Accountability,
}

/// Run a command and render its output.
pub async fn run(command: Command, formatter: &dyn Formatter) -> Result<String, CliError> {
    match command {
        Command::Compile { request, dialect } => {
            let (engine, req) = Request::load(request)?.engine(Arc::new(OfflineDriver(dialect)));
            let compiled = engine
                .compile(&req.schema, &req.collection, &req.query, &req.accountability)
                .await?;
            Ok(formatter.format_compiled(&compiled))
        }
        Command::Explain { request, dialect } => {
            let (engine, req) = Request::load(request)?.engine(Arc::new(OfflineDriver(dialect)));
            let explain = engine
                .explain(&req.schema, &req.collection, &req.query, &req.accountability)
                .await?;
            Ok(formatter.format_explain(&explain))
        }
        Command::Query { request, database } => {
            let request = Request::load(request)?;
            let driver = SqliteDriver::open(&database)?;
            let (engine, req) = request.engine(Arc::new(driver));

            let started = Instant::now();
            let items = engine
                .compile_and_execute(&req.schema, &req.collection, &req.query, &req.accountability)
                .await?;
            info!(
                collection = %req.collection,
                rows = items.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "query finished"
            );
            Ok(formatter.format_items(&items))
        }
    }
}

fn accountability(args: &RequestArgs) -> Accountability {
    if args.admin {
        return Accountability::admin();
    }
    Accountability {
        user: args.user.clone(),
        role: args.role.clone(),
        roles: args.role.iter().cloned().collect(),
        ..Accountability::public()
    }
    .with_policies(args.policies.iter().cloned())
}

fn read(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse<T: serde::de::DeserializeOwned>(what: &'static str, json: &str) -> Result<T, CliError> {
    serde_json::from_str(json).map_err(|source| CliError::Json { what, source })
}
