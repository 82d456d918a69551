//! Query executor for running annotated query trees.
//!
//! The root statement runs once. One-to-many and any-to-one children are then
//! resolved level by level with keyed sub-queries:
//!
//! 1. Collect phase: gather the distinct parent keys of every such child,
//!    skipping parents the child is hidden on.
//! 2. Fetch phase: run the sub-queries of sibling children concurrently, in
//!    batches of parent keys. Rows are pulled from each statement's stream
//!    straight into per-key buckets, then their own children are resolved.
//! 3. Attach phase: hand every parent its bucket.
//!
//! Many-to-one children arrive joined into the parent row and only need
//! their nested children resolved.

use std::collections::{HashMap, HashSet};

use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt, TryStreamExt};
use tracing::debug;
use warden_proto::{Item, Value};

use crate::catalog::SchemaSnapshot;
use crate::config::EngineConfig;
use crate::driver::{RelationalDriver, RowStream};
use crate::error::{DriverError, Error, Result};
use crate::sql::{column_key, pagination, visible_key, CompiledQuery, KeySet, SqlCompiler, ROW_KEY};

use super::ast::{Level, Node, QueryTree};

/// Separator of composite key columns in bucket keys.
const KEY_SEPARATOR: char = '\u{1f}';

/// Pending sub-query of one child.
struct Fetch<'a> {
    /// Index of the child in its parent level.
    index: usize,
    /// Target collection of an any-to-one child.
    target: Option<String>,
    level: &'a Level,
    keys: KeySet,
    path: String,
}

/// Rows of one child, bucketed by key.
struct Fetched {
    index: usize,
    target: Option<String>,
    buckets: HashMap<String, Vec<Item>>,
}

/// Query executor.
pub struct QueryExecutor<'a> {
    driver: &'a dyn RelationalDriver,
    compiler: SqlCompiler<'a>,
    schema: &'a SchemaSnapshot,
    config: &'a EngineConfig,
}

impl<'a> QueryExecutor<'a> {
    /// Create a new executor.
    pub fn new(
        driver: &'a dyn RelationalDriver,
        compiler: SqlCompiler<'a>,
        schema: &'a SchemaSnapshot,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            driver,
            compiler,
            schema,
            config,
        }
    }

    /// Run `root`, the compiled root statement of `tree`, and resolve every
    /// nested relation.
    ///
    /// Items still carry helper columns; see [`prune`](super::prune::prune).
    pub async fn execute(&self, tree: &QueryTree, root: &CompiledQuery) -> Result<Vec<Item>> {
        let level = &tree.root;
        let path = level.collection.clone();
        let rows = self.run(root, &path).await?;
        if level.query.is_aggregate() {
            return Ok(rows);
        }

        let mut items: Vec<Item> = rows
            .into_iter()
            .map(|mut row| shape(level, &mut row, ""))
            .collect();
        self.resolve_level(level, items.iter_mut().collect(), path)
            .await?;
        Ok(items)
    }

    fn resolve_level<'b>(
        &'b self,
        level: &'b Level,
        mut items: Vec<&'b mut Item>,
        path: String,
    ) -> BoxFuture<'b, Result<()>> {
        async move {
            if items.is_empty() {
                return Ok(());
            }

            // Collect phase
            let mut fetches = Vec::new();
            for (index, child) in level.children.iter().enumerate() {
                match child {
                    Node::O2M(node) => {
                        let (local, remote) =
                            self.key_columns(level, &node.field, &node.level.collection)?;
                        let keys = collect_keys(&items, &node.field_key, &local, None);
                        if !keys.is_empty() {
                            fetches.push(Fetch {
                                index,
                                target: None,
                                level: &node.level,
                                keys: KeySet {
                                    columns: remote,
                                    keys,
                                },
                                path: format!("{path}.{}", node.field_key),
                            });
                        }
                    }
                    Node::A2O(node) => {
                        let discriminator = discriminator(&node.relation.one_collection_field)?;
                        let local = node.relation.fk_columns();
                        for (target, target_level) in &node.levels {
                            let keys = collect_keys(
                                &items,
                                &node.field_key,
                                &local,
                                Some((discriminator, target)),
                            );
                            if keys.is_empty() {
                                continue;
                            }
                            fetches.push(Fetch {
                                index,
                                target: Some(target.clone()),
                                level: target_level,
                                keys: KeySet {
                                    columns: self.schema.referenced_columns(&node.relation, target)?,
                                    keys,
                                },
                                path: format!("{path}.{}:{target}", node.field_key),
                            });
                        }
                    }
                    Node::Field(_) | Node::Function(_) | Node::M2O(_) => {}
                }
            }

            // Fetch phase
            let concurrency = self.config.max_concurrent_subqueries.max(1);
            let pending: Vec<BoxFuture<'_, Result<Fetched>>> = fetches
                .into_iter()
                .map(|fetch| self.fetch(fetch).boxed())
                .collect();
            let fetched: Vec<Fetched> = stream::iter(pending)
                .buffer_unordered(concurrency)
                .try_collect()
                .await?;
            let mut by_child: HashMap<usize, Vec<Fetched>> = HashMap::new();
            for fetched in fetched {
                by_child.entry(fetched.index).or_default().push(fetched);
            }

            // Attach phase
            for (index, child) in level.children.iter().enumerate() {
                let results = by_child.get(&index).map(Vec::as_slice).unwrap_or_default();
                match child {
                    Node::O2M(node) => {
                        let (local, _) = self.key_columns(level, &node.field, &node.level.collection)?;
                        let buckets = results.first().map(|fetched| &fetched.buckets);
                        for item in items.iter_mut() {
                            let value = if is_visible(item, &node.field_key) {
                                let rows = buckets
                                    .zip(parent_key(item, &local))
                                    .and_then(|(buckets, key)| buckets.get(&key))
                                    .cloned()
                                    .unwrap_or_default();
                                Value::List(rows.into_iter().map(Value::Object).collect())
                            } else {
                                Value::Null
                            };
                            item.insert(node.field_key.clone(), value);
                        }
                    }
                    Node::A2O(node) => {
                        let discriminator = discriminator(&node.relation.one_collection_field)?;
                        let local = node.relation.fk_columns();
                        for item in items.iter_mut() {
                            let value = if is_visible(item, &node.field_key) {
                                let target = item.get(&column_key(discriminator)).and_then(Value::as_str);
                                results
                                    .iter()
                                    .find(|fetched| fetched.target.as_deref() == target)
                                    .zip(parent_key(item, &local))
                                    .and_then(|(fetched, key)| fetched.buckets.get(&key))
                                    .and_then(|rows| rows.first())
                                    .map(|row| Value::Object(row.clone()))
                                    .unwrap_or(Value::Null)
                            } else {
                                Value::Null
                            };
                            item.insert(node.field_key.clone(), value);
                        }
                    }
                    Node::Field(_) | Node::Function(_) | Node::M2O(_) => {}
                }
            }

            for child in &level.children {
                if let Node::M2O(node) = child {
                    let nested: Vec<&mut Item> = items
                        .iter_mut()
                        .filter_map(|item| item.get_mut(&node.field_key).and_then(Value::as_object_mut))
                        .collect();
                    self.resolve_level(&node.level, nested, format!("{path}.{}", node.field_key))
                        .await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    async fn fetch(&self, fetch: Fetch<'_>) -> Result<Fetched> {
        let batch_size = self.config.relational_batch_size.max(1);
        let mut buckets: HashMap<String, Vec<Item>> = HashMap::new();
        for chunk in fetch.keys.keys.chunks(batch_size) {
            let keys = KeySet {
                columns: fetch.keys.columns.clone(),
                keys: chunk.to_vec(),
            };
            let compiled = self.compiler.compile_keyed(fetch.level, &keys)?;
            let mut rows = self.open(&compiled, &fetch.path).await?;
            let mut count = 0usize;
            while let Some(mut row) = rows
                .try_next()
                .await
                .map_err(|source| backend_error(&compiled, &fetch.path, source))?
            {
                count += 1;
                let key = tuple_key(fetch.keys.columns.iter().map(|c| row.get(&column_key(c))));
                if let Some(key) = key {
                    buckets
                        .entry(key)
                        .or_default()
                        .push(shape(fetch.level, &mut row, ""));
                }
            }
            debug!(path = %fetch.path, rows = count, keys = chunk.len(), "statement returned");
        }

        // Nested limit and offset apply per parent.
        let (limit, offset) = pagination(&fetch.level.query, None);
        if limit.is_some() || offset.is_some() {
            for bucket in buckets.values_mut() {
                paginate(bucket, limit, offset);
            }
        }

        let nested: Vec<&mut Item> = buckets.values_mut().flat_map(|rows| rows.iter_mut()).collect();
        self.resolve_level(fetch.level, nested, fetch.path.clone())
            .await?;

        Ok(Fetched {
            index: fetch.index,
            target: fetch.target,
            buckets,
        })
    }

    async fn open(&self, query: &CompiledQuery, path: &str) -> Result<RowStream> {
        self.driver
            .execute(query)
            .await
            .map_err(|source| backend_error(query, path, source))
    }

    async fn run(&self, query: &CompiledQuery, path: &str) -> Result<Vec<Item>> {
        let rows: Vec<Item> = self
            .open(query, path)
            .await?
            .try_collect()
            .await
            .map_err(|source| backend_error(query, path, source))?;
        debug!(path, rows = rows.len(), "statement returned");
        Ok(rows)
    }

    fn key_columns(
        &self,
        level: &Level,
        field: &str,
        target: &str,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let relation = self.schema.relation(&level.collection, field).ok_or_else(|| {
            Error::schema(format!("no relation for '{}.{field}'", level.collection))
        })?;
        self.schema.join_columns(relation, target)
    }
}

fn backend_error(query: &CompiledQuery, path: &str, source: DriverError) -> Error {
    Error::BackendExecution {
        path: path.to_string(),
        sql: query.sql.clone(),
        source,
    }
}

fn discriminator(field: &Option<String>) -> Result<&str> {
    field
        .as_deref()
        .ok_or_else(|| Error::schema("any-to-one relation has no collection field"))
}

/// Turn a flat row into an item for `level`, moving values out of `row`.
///
/// Many-to-one children become nested objects, or null when their joined row
/// is absent. Helper columns (`$col:*`, `$vis:*`, `$key`) under `prefix` are
/// carried along for the later phases.
fn shape(level: &Level, row: &mut Item, prefix: &str) -> Item {
    let mut item = Item::with_capacity(level.children.len());
    for child in &level.children {
        let key = child.field_key();
        let column = format!("{prefix}{key}");
        let value = match child {
            Node::Field(_) | Node::Function(_) => row.swap_remove(&column).unwrap_or(Value::Null),
            Node::M2O(node) => {
                let nested = format!("{column}.");
                match row.get(&format!("{nested}{ROW_KEY}")) {
                    Some(value) if !value.is_null() => Value::Object(shape(&node.level, row, &nested)),
                    _ => Value::Null,
                }
            }
            Node::O2M(_) | Node::A2O(_) => Value::Null,
        };
        item.insert(key.to_string(), value);
    }

    let helpers: Vec<String> = row
        .keys()
        .filter(|column| {
            column
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('$'))
        })
        .cloned()
        .collect();
    for column in helpers {
        if let Some(value) = row.swap_remove(&column) {
            item.entry(column[prefix.len()..].to_string()).or_insert(value);
        }
    }
    item
}

fn is_visible(item: &Item, field_key: &str) -> bool {
    match item.get(&visible_key(field_key)) {
        None => true,
        Some(value) => value
            .as_bool()
            .or_else(|| value.as_i64().map(|flag| flag != 0))
            .unwrap_or(false),
    }
}

/// Bucket key of a key tuple, `None` when any column is null.
fn tuple_key<'v>(values: impl IntoIterator<Item = Option<&'v Value>>) -> Option<String> {
    let mut key = String::new();
    for (i, value) in values.into_iter().enumerate() {
        let value = value.filter(|v| !v.is_null())?;
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(&value.key());
    }
    Some(key)
}

fn parent_key(item: &Item, local: &[String]) -> Option<String> {
    tuple_key(local.iter().map(|column| item.get(&column_key(column))))
}

/// Distinct non-null key tuples of the parents `field_key` is visible on.
fn collect_keys(
    items: &[&mut Item],
    field_key: &str,
    local: &[String],
    discriminator: Option<(&str, &str)>,
) -> Vec<Vec<Value>> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for item in items {
        if !is_visible(item, field_key) {
            continue;
        }
        if let Some((column, target)) = discriminator {
            if item.get(&column_key(column)).and_then(Value::as_str) != Some(target) {
                continue;
            }
        }
        let tuple: Vec<Value> = local
            .iter()
            .map(|column| item.get(&column_key(column)).cloned().unwrap_or(Value::Null))
            .collect();
        if let Some(key) = tuple_key(tuple.iter().map(Some)) {
            if seen.insert(key) {
                keys.push(tuple);
            }
        }
    }
    keys
}

fn paginate(rows: &mut Vec<Item>, limit: Option<u64>, offset: Option<u64>) {
    if let Some(offset) = offset {
        let skip = usize::try_from(offset).unwrap_or(usize::MAX).min(rows.len());
        *rows = rows.split_off(skip);
    }
    if let Some(limit) = limit {
        rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    }
}
