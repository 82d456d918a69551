//! Engine facade.
//!
//! Ties the pipeline together for one read:
//!
//! 1. resolve the caller's permission records and dynamic variables
//! 2. build and validate the query tree
//! 3. annotate it with permission cases
//! 4. compile the root statement
//! 5. execute, resolving nested relations with keyed sub-queries
//! 6. prune helper columns
//!
//! Steps 1 to 4 fail before any statement reaches the driver.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};
use warden_proto::{Accountability, Action, Item, Query};

use crate::cache::{CachePort, MemoryCache};
use crate::cancel::CancelSignal;
use crate::catalog::SchemaSnapshot;
use crate::config::EngineConfig;
use crate::driver::RelationalDriver;
use crate::error::{Error, Result};
use crate::query::{prune, validate_tree, QueryExecutor, QueryPlanner, QueryTree};
use crate::security::{resolve_access, AccessMap, Annotator, DynamicContext, PermissionStore};
use crate::sql::{CompiledQuery, SqlCompiler};

/// Annotated tree and root statement of a read, without executing it.
#[derive(Debug, Clone, Serialize)]
pub struct Explain {
    /// The query tree with `cases` and `when_case` filled in.
    pub tree: QueryTree,
    /// The root statement.
    pub sql: CompiledQuery,
}

/// Tree and access of a request that passed every check.
struct Prepared {
    tree: QueryTree,
    access: AccessMap,
}

/// Permission-aware read engine.
pub struct Engine {
    driver: Arc<dyn RelationalDriver>,
    permissions: Arc<dyn PermissionStore>,
    cache: Arc<dyn CachePort>,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine with the default configuration and an in-process cache.
    pub fn new(driver: Arc<dyn RelationalDriver>, permissions: Arc<dyn PermissionStore>) -> Self {
        Self {
            driver,
            permissions,
            cache: Arc::new(MemoryCache::new()),
            config: EngineConfig::new(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the cache used for dynamic-variable lookups.
    pub fn with_cache(mut self, cache: Arc<dyn CachePort>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compile the root statement of a read without executing it.
    pub async fn compile(
        &self,
        schema: &SchemaSnapshot,
        collection: &str,
        query: &Query,
        accountability: &Accountability,
    ) -> Result<CompiledQuery> {
        let Prepared { tree, access } = self.prepare(schema, collection, query, accountability).await?;
        self.compiler(schema, &access).compile(&tree.root)
    }

    /// Annotated tree and root statement of a read.
    pub async fn explain(
        &self,
        schema: &SchemaSnapshot,
        collection: &str,
        query: &Query,
        accountability: &Accountability,
    ) -> Result<Explain> {
        let Prepared { tree, access } = self.prepare(schema, collection, query, accountability).await?;
        let sql = self.compiler(schema, &access).compile(&tree.root)?;
        Ok(Explain { tree, sql })
    }

    /// Run a read and return its nested result.
    pub async fn compile_and_execute(
        &self,
        schema: &SchemaSnapshot,
        collection: &str,
        query: &Query,
        accountability: &Accountability,
    ) -> Result<Vec<Item>> {
        self.compile_and_execute_cancellable(schema, collection, query, accountability, CancelSignal::never())
            .await
    }

    /// Run a read that stops with [`Error::Cancelled`] once `cancel` fires.
    ///
    /// Cancellation and the configured timeout drop every in-flight
    /// statement; no partial result is returned.
    pub async fn compile_and_execute_cancellable(
        &self,
        schema: &SchemaSnapshot,
        collection: &str,
        query: &Query,
        accountability: &Accountability,
        mut cancel: CancelSignal,
    ) -> Result<Vec<Item>> {
        let started = Instant::now();
        let work = self.run(schema, collection, query, accountability);
        let bounded = async {
            match self.config.query_timeout {
                Some(budget) => tokio::time::timeout(budget, work)
                    .await
                    .map_err(|_| Error::Timeout(budget))?,
                None => work.await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = bounded => result,
        };

        match &result {
            Ok(items) => debug!(
                collection,
                rows = items.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "read completed"
            ),
            Err(err) => warn!(collection, code = err.code(), error = %err, "read failed"),
        }
        result
    }

    async fn run(
        &self,
        schema: &SchemaSnapshot,
        collection: &str,
        query: &Query,
        accountability: &Accountability,
    ) -> Result<Vec<Item>> {
        let Prepared { tree, access } = self.prepare(schema, collection, query, accountability).await?;
        let compiler = self.compiler(schema, &access);
        let root = compiler.compile(&tree.root)?;
        let executor = QueryExecutor::new(self.driver.as_ref(), compiler, schema, &self.config);
        let items = executor.execute(&tree, &root).await?;
        Ok(prune(schema, &tree.root, items))
    }

    async fn prepare(
        &self,
        schema: &SchemaSnapshot,
        collection: &str,
        query: &Query,
        accountability: &Accountability,
    ) -> Result<Prepared> {
        let resolved = resolve_access(
            self.permissions.as_ref(),
            self.cache.as_ref(),
            self.config.dynamic_cache_ttl,
            accountability,
            Action::Read,
        )
        .await?;

        let mut query = query.clone();
        resolve_query(&resolved.context, &mut query)?;

        let mut tree = QueryPlanner::new(schema)
            .with_max_depth(self.config.max_relational_depth)
            .plan(collection, &query)?;
        validate_tree(schema, &tree)?;
        Annotator::new(schema, &resolved.access).annotate(&mut tree)?;

        Ok(Prepared {
            tree,
            access: resolved.access,
        })
    }

    fn compiler<'a>(&self, schema: &'a SchemaSnapshot, access: &'a AccessMap) -> SqlCompiler<'a> {
        SqlCompiler::new(schema, access, self.driver.dialect()).with_default_limit(self.config.default_limit)
    }
}

/// Resolve dynamic variables in the caller's filters, `deep` included.
fn resolve_query(context: &DynamicContext, query: &mut Query) -> Result<()> {
    if let Some(filter) = query.filter.as_mut() {
        context.resolve_filter(filter)?;
    }
    for nested in query.deep.iter_mut().flat_map(|deep| deep.values_mut()) {
        resolve_query(context, nested)?;
    }
    Ok(())
}
