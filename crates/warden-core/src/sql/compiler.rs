//! Compilation of annotated query levels into statements.
//!
//! The root level compiles into one statement that selects its fields and
//! every many-to-one relation through joins. One-to-many and any-to-one
//! children are left to keyed sub-queries; the root only selects the helper
//! columns (`$col:<column>`, `$vis:<field>`) the executor needs to fetch and
//! attach them.
//!
//! Permissions shape every statement:
//!
//! - the level's row filter is ANDed into `WHERE`
//! - fields visible under some cases only are wrapped in
//!   `CASE WHEN <cases> THEN <column> END`
//! - caller filters on such fields only match where the field is visible
//! - read joins go through a derived table restricted to the rows the
//!   caller may read, so a hidden row reads as `NULL`

use indexmap::IndexMap;
use tracing::{trace, warn};
use warden_proto::{Filter, PageArg, Query, Value};

use crate::catalog::{FieldType, RelationKind, SchemaSnapshot};
use crate::error::{Error, Result};
use crate::query::ast::{Level, Node};
use crate::query::function::FunctionKind;
use crate::query::path::ResolvedPath;
use crate::query::validate::resolve_sort;
use crate::security::AccessMap;

use super::alias::{AliasMap, AliasScope};
use super::dialect::Dialect;
use super::ir::{Expr, Join, OrderBy, Predicate, PredicateKind, Select, SelectItem, Source, TableRef};
use super::params::ParamSet;
use super::render::{render, CompiledQuery};

/// Output key of a many-to-one relation's primary key, under its prefix.
pub const ROW_KEY: &str = "$key";

/// Prefix of helper columns carrying relation key values.
pub const COLUMN_PREFIX: &str = "$col:";

/// Prefix of helper flags telling whether a sub-query field is visible.
pub const VISIBLE_PREFIX: &str = "$vis:";

/// Separator of aggregate output keys, `count->id`.
pub const AGGREGATE_SEPARATOR: &str = "->";

/// Output key of a helper column.
pub fn column_key(column: &str) -> String {
    format!("{COLUMN_PREFIX}{column}")
}

/// Output key of a visibility flag.
pub fn visible_key(field_key: &str) -> String {
    format!("{VISIBLE_PREFIX}{field_key}")
}

/// Output key of an aggregate.
pub fn aggregate_key(function: warden_proto::AggregateFunction, field: &str) -> String {
    format!("{}{AGGREGATE_SEPARATOR}{field}", function.as_str())
}

/// Parent key values a keyed sub-query is restricted to.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySet {
    /// Key columns on the sub-query's collection.
    pub columns: Vec<String>,
    /// One tuple per distinct parent key, matching `columns`.
    pub keys: Vec<Vec<Value>>,
}

impl KeySet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            keys: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Largest limit or offset any backend accepts.
pub const MAX_PAGE_VALUE: u64 = i64::MAX as u64;

/// Effective `(limit, offset)` of a root query.
///
/// Only clean non-negative integers are honored; anything else is logged
/// and ignored. Honored values and the offset derived from `page` are
/// clamped to [`MAX_PAGE_VALUE`]. A missing limit falls back to
/// `default_limit`. `page` (1 or more) together with a limit overrides the
/// offset.
pub fn pagination(query: &Query, default_limit: Option<u64>) -> (Option<u64>, Option<u64>) {
    let limit = match &query.limit {
        None => default_limit.map(clamp),
        Some(arg) => clean(arg, "limit"),
    };
    let mut offset = query.offset.as_ref().and_then(|arg| clean(arg, "offset"));

    if let (Some(page), Some(limit)) = (query.page.as_ref().and_then(|arg| clean(arg, "page")), limit) {
        if page >= 1 {
            offset = Some(clamp(limit.saturating_mul(page - 1)));
        }
    }

    (limit, offset.filter(|offset| *offset > 0))
}

fn clean(arg: &PageArg, name: &str) -> Option<u64> {
    let Some(value) = arg.as_clean_u64() else {
        warn!(parameter = name, value = ?arg, "ignoring invalid pagination value");
        return None;
    };
    if value > MAX_PAGE_VALUE {
        warn!(parameter = name, value, "clamping oversized pagination value");
    }
    Some(clamp(value))
}

fn clamp(value: u64) -> u64 {
    value.min(MAX_PAGE_VALUE)
}

/// SQL compiler for one request.
pub struct SqlCompiler<'a> {
    schema: &'a SchemaSnapshot,
    access: &'a AccessMap,
    dialect: Dialect,
    default_limit: Option<u64>,
}

impl<'a> SqlCompiler<'a> {
    pub fn new(schema: &'a SchemaSnapshot, access: &'a AccessMap, dialect: Dialect) -> Self {
        Self {
            schema,
            access,
            dialect,
            default_limit: None,
        }
    }

    /// Limit applied when the root query sets none.
    pub fn with_default_limit(mut self, limit: Option<u64>) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Compile the root level, paginated.
    pub fn compile(&self, level: &Level) -> Result<CompiledQuery> {
        let mut compilation = Compilation::new(self.schema, self.access);
        let select = if level.query.is_aggregate() {
            compilation.aggregate_select(level, self.default_limit)?
        } else {
            compilation.level_select(level, None, Some(self.default_limit))?
        };
        Ok(self.finish(&select, compilation))
    }

    /// Compile a nested level restricted to `keys`, without pagination.
    pub fn compile_keyed(&self, level: &Level, keys: &KeySet) -> Result<CompiledQuery> {
        let mut compilation = Compilation::new(self.schema, self.access);
        let select = compilation.level_select(level, Some(keys), None)?;
        Ok(self.finish(&select, compilation))
    }

    fn finish(&self, select: &Select, compilation: Compilation<'_>) -> CompiledQuery {
        let compiled = render(self.dialect, select, compilation.params.values());
        trace!(
            dialect = %self.dialect,
            parameters = compiled.parameters.len(),
            sql = %compiled.sql,
            "compiled statement"
        );
        compiled
    }
}

/// A table reachable from the statement being built.
#[derive(Debug, Clone)]
pub(super) struct Base {
    pub collection: String,
    pub alias: String,
}

impl Base {
    fn root(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            alias: collection.to_string(),
        }
    }
}

/// Selected columns: requested fields first, then deduplicated helpers.
#[derive(Debug, Default)]
pub(super) struct Columns {
    fields: IndexMap<String, Expr>,
    helpers: IndexMap<String, Expr>,
}

impl Columns {
    pub fn field(&mut self, key: String, expr: Expr) {
        self.fields.insert(key, expr);
    }

    pub fn helper(&mut self, key: String, expr: Expr) {
        self.helpers.entry(key).or_insert(expr);
    }

    pub fn get(&self, key: &str) -> Option<&Expr> {
        self.fields.get(key)
    }

    pub fn into_items(self) -> Vec<SelectItem> {
        let Columns { fields, helpers } = self;
        let helpers: Vec<(String, Expr)> = helpers
            .into_iter()
            .filter(|(key, _)| !fields.contains_key(key))
            .collect();
        fields
            .into_iter()
            .chain(helpers)
            .map(|(alias, expr)| SelectItem {
                expr,
                alias: Some(alias),
            })
            .collect()
    }
}

/// State of one statement under construction.
pub(super) struct Compilation<'a> {
    pub schema: &'a SchemaSnapshot,
    pub access: &'a AccessMap,
    pub aliases: AliasMap,
    pub params: ParamSet,
}

impl<'a> Compilation<'a> {
    fn new(schema: &'a SchemaSnapshot, access: &'a AccessMap) -> Self {
        Self {
            schema,
            access,
            aliases: AliasMap::new(),
            params: ParamSet::new(),
        }
    }

    /// Select of a plain level. `page` carries the default limit of a
    /// paginated root, `None` for keyed sub-queries.
    fn level_select(
        &mut self,
        level: &Level,
        keys: Option<&KeySet>,
        page: Option<Option<u64>>,
    ) -> Result<Select> {
        let schema = self.schema;
        let base = Base::root(&level.collection);
        let mut joins = Vec::new();
        let mut columns = Columns::default();

        self.select_children(&mut joins, &base, level, "", &mut columns)?;

        let mut conditions = Vec::new();
        if let Some(keys) = keys {
            for column in &keys.columns {
                columns.helper(column_key(column), Expr::column(&base.alias, column));
            }
            if level.children.is_empty() {
                let primary = &schema.require_collection(&level.collection)?.primary;
                columns.helper(column_key(primary), Expr::column(&base.alias, primary));
            }
            conditions.push(self.key_predicate(&base, keys)?);
        }
        conditions.extend(self.where_terms(&mut joins, &base, level)?);
        let order_by = self.order_by(&mut joins, &base, level, None)?;

        let mut select = Select::from(Source::Table(level.collection.clone()), base.alias.clone());
        select.columns = columns.into_items();
        select.joins = joins;
        select.filter = Some(Predicate::all(conditions));
        select.order_by = order_by;
        if let Some(default_limit) = page {
            let (limit, offset) = pagination(&level.query, default_limit);
            select.limit = limit;
            select.offset = offset;
        }
        Ok(select)
    }

    /// Row filter, caller filter, and search of a level.
    pub fn where_terms(
        &mut self,
        joins: &mut Vec<Join>,
        base: &Base,
        level: &Level,
    ) -> Result<Vec<Predicate>> {
        let mut terms = Vec::new();
        if let Some(row) = level.row_filter() {
            terms.push(self.filter(joins, base, &row, AliasScope::System)?);
        }
        if let Some(filter) = &level.query.filter {
            terms.push(self.filter(joins, base, filter, AliasScope::Read)?);
        }
        if let Some(term) = level.query.search.as_deref() {
            terms.push(self.search(joins, base, level, term)?);
        }
        Ok(terms)
    }

    fn select_children(
        &mut self,
        joins: &mut Vec<Join>,
        base: &Base,
        level: &Level,
        prefix: &str,
        columns: &mut Columns,
    ) -> Result<()> {
        let schema = self.schema;

        for child in &level.children {
            let key = format!("{prefix}{}", child.field_key());
            let gate = self.case_gate(joins, base, &level.cases, child.when_case())?;

            match child {
                Node::Field(node) => {
                    columns.field(key, Expr::column(&base.alias, &node.name).gated(gate));
                }
                Node::Function(node) => {
                    let expr = self.function_expr(base, node.function, &node.target, AliasScope::Read)?;
                    columns.field(key, expr.gated(gate));
                }
                Node::M2O(node) => {
                    let target = self.join(joins, base, &node.field, None, AliasScope::Read)?;
                    let primary = schema.require_collection(&target.collection)?.primary.clone();
                    let nested = format!("{key}.");
                    columns.helper(
                        format!("{nested}{ROW_KEY}"),
                        Expr::column(&target.alias, primary).gated(gate),
                    );
                    self.select_children(joins, &target, &node.level, &nested, columns)?;
                }
                Node::O2M(node) => {
                    let relation = schema.relation(&base.collection, &node.field).ok_or_else(|| {
                        Error::schema(format!("no relation for '{}.{}'", base.collection, node.field))
                    })?;
                    let (local, _) = schema.join_columns(relation, &node.level.collection)?;
                    for column in local {
                        columns.helper(
                            format!("{prefix}{}", column_key(&column)),
                            Expr::column(&base.alias, &column),
                        );
                    }
                    if let Some(gate) = gate {
                        columns.helper(format!("{prefix}{}", visible_key(&node.field_key)), Expr::flag(gate));
                    }
                }
                Node::A2O(node) => {
                    let mut local = node.relation.fk_columns();
                    local.extend(node.relation.one_collection_field.clone());
                    for column in local {
                        columns.helper(
                            format!("{prefix}{}", column_key(&column)),
                            Expr::column(&base.alias, &column),
                        );
                    }
                    if let Some(gate) = gate {
                        columns.helper(format!("{prefix}{}", visible_key(&node.field_key)), Expr::flag(gate));
                    }
                }
            }
        }
        Ok(())
    }

    /// Value of a function field on `base`.
    pub fn function_expr(
        &mut self,
        base: &Base,
        function: FunctionKind,
        target: &str,
        scope: AliasScope,
    ) -> Result<Expr> {
        match function {
            FunctionKind::Count => self.count_expr(base, target, scope),
            part => Ok(Expr::DatePart {
                part,
                expr: Box::new(Expr::column(&base.alias, target)),
            }),
        }
    }

    /// Correlated `COUNT(*)` over a one-to-many field.
    pub fn count_expr(&mut self, base: &Base, field: &str, scope: AliasScope) -> Result<Expr> {
        let schema = self.schema;
        let relation = schema
            .relation(&base.collection, field)
            .filter(|rel| rel.kind == RelationKind::O2M)
            .ok_or_else(|| {
                Error::InvalidFilter(format!(
                    "count() needs a one-to-many field, '{}.{field}' is not one",
                    base.collection
                ))
            })?;
        let target = relation
            .target()
            .ok_or_else(|| Error::schema(format!("relation '{}.{field}' has no target", base.collection)))?;
        let (local, remote) = schema.join_columns(relation, target)?;

        let inner = Base {
            collection: target.to_string(),
            alias: self.aliases.fresh("s"),
        };
        let mut joins = Vec::new();
        let mut conditions = correlate(&inner, &remote, base, &local);
        if scope == AliasScope::Read {
            if let Some(row) = self.access.row_filter(target) {
                conditions.push(self.filter(&mut joins, &inner, &row, AliasScope::System)?);
            }
        }

        let mut select = Select::from(Source::Table(target.to_string()), inner.alias);
        select.columns = vec![SelectItem {
            expr: Expr::Aggregate {
                function: warden_proto::AggregateFunction::Count,
                arg: None,
            },
            alias: None,
        }];
        select.joins = joins;
        select.filter = Some(Predicate::all(conditions));
        Ok(Expr::Subquery(Box::new(select)))
    }

    /// `ORDER BY` of a level. Entries naming an output in `outputs` sort by
    /// that expression.
    pub fn order_by(
        &mut self,
        joins: &mut Vec<Join>,
        base: &Base,
        level: &Level,
        outputs: Option<&Columns>,
    ) -> Result<Vec<OrderBy>> {
        let schema = self.schema;
        let mut order_by = Vec::new();

        for entry in level.sort() {
            let (descending, name) = match entry.strip_prefix('-') {
                Some(name) => (true, name),
                None => (false, entry.as_str()),
            };
            if let Some(expr) = outputs.and_then(|outputs| outputs.get(name)) {
                order_by.push(OrderBy {
                    expr: expr.clone(),
                    descending,
                });
                continue;
            }

            let (resolved, descending) = resolve_sort(schema, &base.collection, entry)?;
            let (expr, gates) = self.path_expr(joins, base, &resolved, AliasScope::Read)?;
            let gate = (!gates.is_empty()).then(|| Predicate::all(gates));
            order_by.push(OrderBy {
                expr: expr.gated(gate),
                descending,
            });
        }
        Ok(order_by)
    }

    /// Join every hop of a resolved path and build its leaf expression.
    ///
    /// Under read scope, also returns the visibility gates of each traversed
    /// field and the leaf.
    pub fn path_expr(
        &mut self,
        joins: &mut Vec<Join>,
        base: &Base,
        resolved: &ResolvedPath<'_>,
        scope: AliasScope,
    ) -> Result<(Expr, Vec<Predicate>)> {
        let mut current = base.clone();
        let mut gates = Vec::new();

        for hop in &resolved.hops {
            if scope == AliasScope::Read {
                gates.extend(self.field_gate(joins, &current, &hop.field)?);
            }
            let target = (hop.relation.kind == RelationKind::A2O).then_some(hop.target.as_str());
            current = self.join(joins, &current, &hop.field, target, scope)?;
        }
        if scope == AliasScope::Read {
            gates.extend(self.field_gate(joins, &current, &resolved.field)?);
        }

        let expr = match resolved.function {
            Some(function) => self.function_expr(&current, function, &resolved.field, scope)?,
            None => Expr::column(&current.alias, &resolved.field),
        };
        Ok((expr, gates))
    }

    /// Join a many-to-one or scoped any-to-one relation off `base`.
    ///
    /// Joins are reused per scope and path. Read joins to collections with a
    /// row filter go through a derived table holding only readable rows.
    pub fn join(
        &mut self,
        joins: &mut Vec<Join>,
        base: &Base,
        field: &str,
        any_target: Option<&str>,
        scope: AliasScope,
    ) -> Result<Base> {
        let schema = self.schema;
        let relation = schema.relation(&base.collection, field).ok_or_else(|| {
            Error::schema(format!("no relation for '{}.{field}'", base.collection))
        })?;

        let target = match (relation.kind, any_target) {
            (RelationKind::A2O, Some(target)) => target.to_string(),
            (RelationKind::A2O, None) => {
                return Err(Error::InvalidFilter(format!(
                    "any-to-one field '{}.{field}' needs a collection scope",
                    base.collection
                )))
            }
            (RelationKind::O2M, _) => {
                return Err(Error::InvalidFilter(format!(
                    "one-to-many field '{}.{field}' cannot be joined",
                    base.collection
                )))
            }
            (RelationKind::M2O, _) => relation
                .target()
                .ok_or_else(|| Error::schema(format!("relation '{}.{field}' has no target", base.collection)))?
                .to_string(),
        };
        schema.require_collection(&target)?;

        let segment = match any_target {
            Some(target) => format!("{field}:{target}"),
            None => field.to_string(),
        };
        let (alias, created) = self.aliases.join(scope, &base.alias, &segment);
        let joined = Base {
            collection: target.clone(),
            alias: alias.clone(),
        };
        if !created {
            return Ok(joined);
        }

        let (local, remote) = schema.join_columns(relation, &target)?;
        let mut on = correlate(&joined, &remote, base, &local);
        if let (RelationKind::A2O, Some(discriminator)) =
            (relation.kind, relation.def.one_collection_field.as_deref())
        {
            let ty = schema
                .require_field(&base.collection, discriminator)?
                .field_type
                .clone();
            let index = self.params.bind(&ty, Value::String(target.clone()));
            on.push(Predicate::eq(
                Expr::column(&base.alias, discriminator),
                Expr::Param(index),
            ));
        }

        let source = match (scope, self.access.row_filter(&target)) {
            (AliasScope::Read, Some(row)) => Source::Derived(Box::new(self.restricted(&target, &row)?)),
            _ => Source::Table(target.clone()),
        };
        joins.push(Join {
            table: TableRef { source, alias },
            on: Predicate::all(on),
        });
        Ok(joined)
    }

    /// `SELECT alias.* FROM collection WHERE <row filter>`.
    fn restricted(&mut self, collection: &str, row: &Filter) -> Result<Select> {
        let base = Base {
            collection: collection.to_string(),
            alias: self.aliases.fresh("s"),
        };
        let mut joins = Vec::new();
        let filter = self.filter(&mut joins, &base, row, AliasScope::System)?;

        let mut select = Select::from(Source::Table(collection.to_string()), base.alias.clone());
        select.columns = vec![SelectItem {
            expr: Expr::AllColumns { table: base.alias },
            alias: None,
        }];
        select.joins = joins;
        select.filter = Some(filter);
        Ok(select)
    }

    /// Disjunction of the cases listed in `when_case`, `None` when the list
    /// is empty (unconditionally visible).
    pub fn case_gate(
        &mut self,
        joins: &mut Vec<Join>,
        base: &Base,
        cases: &[Filter],
        when_case: &[usize],
    ) -> Result<Option<Predicate>> {
        if when_case.is_empty() {
            return Ok(None);
        }
        let mut terms = Vec::with_capacity(when_case.len());
        for case in when_case.iter().filter_map(|index| cases.get(*index)) {
            terms.push(self.filter(joins, base, case, AliasScope::System)?);
        }
        Ok(Some(Predicate::any(terms)))
    }

    /// Visibility gate of `base.collection.field` for the caller.
    pub fn field_gate(
        &mut self,
        joins: &mut Vec<Join>,
        base: &Base,
        field: &str,
    ) -> Result<Option<Predicate>> {
        let access = self.access;
        match access.field_access(&base.collection, field) {
            Some(when_case) => self.case_gate(joins, base, access.cases(&base.collection), &when_case),
            None => Ok(None),
        }
    }

    /// Restrict rows of `base` to the given key tuples.
    fn key_predicate(&mut self, base: &Base, keys: &KeySet) -> Result<Predicate> {
        let def = self.schema.require_collection(&base.collection)?;
        let types: Vec<FieldType> = keys
            .columns
            .iter()
            .map(|column| {
                def.field(column)
                    .map(|f| f.field_type.clone())
                    .unwrap_or(FieldType::Unknown)
            })
            .collect();

        if let ([column], [ty]) = (keys.columns.as_slice(), types.as_slice()) {
            let mut list = Vec::with_capacity(keys.keys.len());
            for key in &keys.keys {
                if let Some(value) = key.first() {
                    list.push(Expr::Param(self.params.bind(ty, value.clone())));
                }
            }
            if list.is_empty() {
                return Ok(Predicate::constant(false));
            }
            return Ok(Predicate::new(PredicateKind::InList {
                expr: Expr::column(&base.alias, column),
                list,
            }));
        }

        let mut tuples = Vec::with_capacity(keys.keys.len());
        for key in &keys.keys {
            let mut terms = Vec::with_capacity(key.len());
            for ((column, ty), value) in keys.columns.iter().zip(&types).zip(key) {
                let index = self.params.bind(ty, value.clone());
                terms.push(Predicate::eq(Expr::column(&base.alias, column), Expr::Param(index)));
            }
            tuples.push(Predicate::all(terms));
        }
        Ok(Predicate::any(tuples))
    }
}

/// `inner.remote = outer.local` for each column pair.
pub(super) fn correlate(inner: &Base, remote: &[String], outer: &Base, local: &[String]) -> Vec<Predicate> {
    remote
        .iter()
        .zip(local)
        .map(|(r, l)| Predicate::eq(Expr::column(&inner.alias, r), Expr::column(&outer.alias, l)))
        .collect()
}
