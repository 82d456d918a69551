//! Query parameters for collection reads.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::filter::Filter;

/// Aggregate function of an aggregation query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregateFunction {
    /// Count of non-null values (`*` counts rows).
    Count,
    /// Count of distinct non-null values.
    CountDistinct,
    /// Count of rows, takes no field.
    CountAll,
    /// Sum of numeric values.
    Sum,
    /// Sum of distinct numeric values.
    SumDistinct,
    /// Average of numeric values.
    Avg,
    /// Average of distinct numeric values.
    AvgDistinct,
    /// Minimum value.
    Min,
    /// Maximum value.
    Max,
}

impl AggregateFunction {
    /// Name used in output keys, `count` in `count->id`.
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::CountDistinct => "countDistinct",
            AggregateFunction::CountAll => "countAll",
            AggregateFunction::Sum => "sum",
            AggregateFunction::SumDistinct => "sumDistinct",
            AggregateFunction::Avg => "avg",
            AggregateFunction::AvgDistinct => "avgDistinct",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }

    /// Whether the function only accepts numeric columns.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            AggregateFunction::Sum
                | AggregateFunction::SumDistinct
                | AggregateFunction::Avg
                | AggregateFunction::AvgDistinct
        )
    }

    /// Whether the function aggregates distinct values.
    pub fn is_distinct(&self) -> bool {
        matches!(
            self,
            AggregateFunction::CountDistinct
                | AggregateFunction::SumDistinct
                | AggregateFunction::AvgDistinct
        )
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw pagination argument as supplied by the caller.
///
/// Only clean non-negative integers are honored, see [`PageArg::as_clean_u64`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageArg {
    Int(i64),
    /// Integers past `i64::MAX`.
    UInt(u64),
    Float(f64),
    Text(String),
    Other(serde_json::Value),
}

impl PageArg {
    /// The value as a non-negative integer, if it is one.
    ///
    /// Accepts non-negative JSON integers and strings made only of ASCII
    /// digits. Floats (even `5.0`), signs, whitespace, and empty strings are
    /// rejected.
    pub fn as_clean_u64(&self) -> Option<u64> {
        match self {
            PageArg::Int(i) if *i >= 0 => Some(*i as u64),
            PageArg::UInt(u) => Some(*u),
            PageArg::Text(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
                // Digit strings past u64 saturate.
                Some(s.parse().unwrap_or(u64::MAX))
            }
            _ => None,
        }
    }
}

impl From<u64> for PageArg {
    fn from(v: u64) -> Self {
        i64::try_from(v).map_or(PageArg::UInt(v), PageArg::Int)
    }
}

impl From<i64> for PageArg {
    fn from(v: i64) -> Self {
        PageArg::Int(v)
    }
}

impl From<&str> for PageArg {
    fn from(v: &str) -> Self {
        PageArg::Text(v.to_string())
    }
}

/// Aggregations requested by a query, keyed by function.
pub type Aggregate = IndexMap<AggregateFunction, Vec<String>>;

/// A read query against one collection.
///
/// Every parameter is optional. Nested relational fields take their own
/// modifiers from [`Query::deep`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    /// Requested fields, `*` and `relation.*` wildcards allowed.
    #[serde(
        alias = "_fields",
        deserialize_with = "list_or_csv",
        skip_serializing_if = "Option::is_none"
    )]
    pub fields: Option<Vec<String>>,
    /// Row filter.
    #[serde(alias = "_filter", skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    /// Free-text search term.
    #[serde(alias = "_search", skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Sort fields, `-` prefix for descending.
    #[serde(
        alias = "_sort",
        deserialize_with = "list_or_csv",
        skip_serializing_if = "Option::is_none"
    )]
    pub sort: Option<Vec<String>>,
    /// Maximum number of rows.
    #[serde(alias = "_limit", skip_serializing_if = "Option::is_none")]
    pub limit: Option<PageArg>,
    /// Number of rows to skip.
    #[serde(alias = "_offset", skip_serializing_if = "Option::is_none")]
    pub offset: Option<PageArg>,
    /// One-based page number, used together with `limit`.
    #[serde(alias = "_page", skip_serializing_if = "Option::is_none")]
    pub page: Option<PageArg>,
    /// Group-by fields for aggregation.
    #[serde(
        alias = "_group",
        deserialize_with = "list_or_csv",
        skip_serializing_if = "Option::is_none"
    )]
    pub group: Option<Vec<String>>,
    /// Aggregate functions and the fields they apply to.
    #[serde(
        alias = "_aggregate",
        deserialize_with = "aggregate_map",
        skip_serializing_if = "Option::is_none"
    )]
    pub aggregate: Option<Aggregate>,
    /// Filter over aggregated rows.
    #[serde(alias = "_having", skip_serializing_if = "Option::is_none")]
    pub having: Option<Filter>,
    /// Output renames: alias -> source field.
    #[serde(alias = "_alias", skip_serializing_if = "Option::is_none")]
    pub alias: Option<IndexMap<String, String>>,
    /// Modifiers for nested relational fields, keyed by field name.
    #[serde(alias = "_deep", skip_serializing_if = "Option::is_none")]
    pub deep: Option<IndexMap<String, Query>>,
}

impl Query {
    /// Create an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the requested fields.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Set the row filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set the search term.
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Set the sort fields.
    pub fn with_sort<I, S>(mut self, sort: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sort = Some(sort.into_iter().map(Into::into).collect());
        self
    }

    /// Set the limit.
    pub fn with_limit(mut self, limit: impl Into<PageArg>) -> Self {
        self.limit = Some(limit.into());
        self
    }

    /// Set the offset.
    pub fn with_offset(mut self, offset: impl Into<PageArg>) -> Self {
        self.offset = Some(offset.into());
        self
    }

    /// Set the page.
    pub fn with_page(mut self, page: impl Into<PageArg>) -> Self {
        self.page = Some(page.into());
        self
    }

    /// Set the group-by fields.
    pub fn with_group<I, S>(mut self, group: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group = Some(group.into_iter().map(Into::into).collect());
        self
    }

    /// Add an aggregation.
    pub fn with_aggregate(mut self, function: AggregateFunction, field: impl Into<String>) -> Self {
        self.aggregate
            .get_or_insert_with(IndexMap::new)
            .entry(function)
            .or_default()
            .push(field.into());
        self
    }

    /// Set the having filter.
    pub fn with_having(mut self, having: Filter) -> Self {
        self.having = Some(having);
        self
    }

    /// Add an output alias for a field.
    pub fn with_alias(mut self, alias: impl Into<String>, field: impl Into<String>) -> Self {
        self.alias
            .get_or_insert_with(IndexMap::new)
            .insert(alias.into(), field.into());
        self
    }

    /// Add modifiers for a nested relational field.
    pub fn with_deep(mut self, field: impl Into<String>, query: Query) -> Self {
        self.deep
            .get_or_insert_with(IndexMap::new)
            .insert(field.into(), query);
        self
    }

    /// Whether this query aggregates rows.
    pub fn is_aggregate(&self) -> bool {
        self.aggregate.as_ref().is_some_and(|a| !a.is_empty())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrCsv {
    List(Vec<String>),
    Csv(String),
}

impl ListOrCsv {
    fn into_vec(self) -> Vec<String> {
        match self {
            ListOrCsv::List(items) => items,
            ListOrCsv::Csv(s) => s
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

fn list_or_csv<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Vec<String>>, D::Error> {
    let raw = Option::<ListOrCsv>::deserialize(deserializer)?;
    Ok(raw.map(ListOrCsv::into_vec))
}

fn aggregate_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Aggregate>, D::Error> {
    let raw = Option::<IndexMap<AggregateFunction, ListOrCsv>>::deserialize(deserializer)?;
    Ok(raw.map(|map| map.into_iter().map(|(k, v)| (k, v.into_vec())).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_builder() {
        let query = Query::new()
            .with_fields(["title", "author.name"])
            .with_filter(Filter::eq("status", "published"))
            .with_sort(["-date_created"])
            .with_limit(10u64)
            .with_aggregate(AggregateFunction::Count, "*");

        assert_eq!(query.fields.as_ref().unwrap().len(), 2);
        assert_eq!(query.limit.as_ref().and_then(PageArg::as_clean_u64), Some(10));
        assert!(query.is_aggregate());
    }

    #[test]
    fn test_clean_page_args() {
        assert_eq!(PageArg::Int(0).as_clean_u64(), Some(0));
        assert_eq!(PageArg::Int(25).as_clean_u64(), Some(25));
        assert_eq!(PageArg::Text("42".into()).as_clean_u64(), Some(42));
        assert_eq!(PageArg::from(u64::MAX).as_clean_u64(), Some(u64::MAX));
        assert_eq!(
            PageArg::Text("123456789012345678901234567890".into()).as_clean_u64(),
            Some(u64::MAX)
        );

        assert_eq!(PageArg::Int(-1).as_clean_u64(), None);
        assert_eq!(PageArg::Float(5.0).as_clean_u64(), None);
        assert_eq!(PageArg::Text("-1".into()).as_clean_u64(), None);
        assert_eq!(PageArg::Text(" 4".into()).as_clean_u64(), None);
        assert_eq!(PageArg::Text("4.5".into()).as_clean_u64(), None);
        assert_eq!(PageArg::Text("".into()).as_clean_u64(), None);
        assert_eq!(PageArg::Other(json!(true)).as_clean_u64(), None);

        let query: Query = serde_json::from_value(json!({"limit": u64::MAX})).unwrap();
        assert_eq!(query.limit, Some(PageArg::UInt(u64::MAX)));
    }

    #[test]
    fn test_deserialize_query() {
        let query: Query = serde_json::from_value(json!({
            "fields": "title, comments.body",
            "filter": {"status": {"_eq": "published"}},
            "limit": "5",
            "aggregate": {"count": "*", "sum": ["views"]},
            "deep": {"comments": {"_limit": 2, "_sort": "-id"}}
        }))
        .unwrap();

        assert_eq!(
            query.fields,
            Some(vec!["title".to_string(), "comments.body".to_string()])
        );
        assert_eq!(query.limit, Some(PageArg::Text("5".into())));

        let aggregate = query.aggregate.unwrap();
        assert_eq!(aggregate[&AggregateFunction::Count], vec!["*".to_string()]);
        assert_eq!(aggregate[&AggregateFunction::Sum], vec!["views".to_string()]);

        let deep = &query.deep.unwrap()["comments"];
        assert_eq!(deep.limit, Some(PageArg::Int(2)));
        assert_eq!(deep.sort, Some(vec!["-id".to_string()]));
    }

    #[test]
    fn test_odd_page_args_do_not_fail_parsing() {
        let query: Query = serde_json::from_value(json!({"limit": true, "offset": 1.5})).unwrap();
        assert_eq!(query.limit.unwrap().as_clean_u64(), None);
        assert_eq!(query.offset.unwrap().as_clean_u64(), None);
    }
}
