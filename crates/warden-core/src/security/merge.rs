//! Merging of permission records for the same collection and action.
//!
//! Records granted through several policies combine either permissively
//! (`Or`: a row or field is accessible when any record allows it) or
//! restrictively (`And`: every record must allow it).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use warden_proto::{Action, Filter, Permission};

/// How overlapping records combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Any record suffices. An unconditional filter supersedes the others.
    #[default]
    Or,
    /// Every record must hold. An unconditional filter is kept as a term.
    And,
}

/// Merge records into one record per `(collection, action)`, in first
/// appearance order.
pub fn merge_permissions(strategy: MergeStrategy, records: &[Permission]) -> Vec<Permission> {
    let mut merged: IndexMap<(String, Action), Permission> = IndexMap::new();

    for record in records {
        let key = (record.collection.clone(), record.action);
        match merged.get_mut(&key) {
            Some(current) => *current = merge_pair(strategy, current, record),
            None => {
                merged.insert(key, record.clone());
            }
        }
    }

    merged.into_values().collect()
}

fn merge_pair(strategy: MergeStrategy, current: &Permission, next: &Permission) -> Permission {
    let fields = match strategy {
        MergeStrategy::Or => current.fields.union(&next.fields),
        MergeStrategy::And => current.fields.intersection(&next.fields),
    };

    let presets = match (&current.presets, &next.presets) {
        (Some(a), Some(b)) => {
            let mut presets = a.clone();
            presets.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
            Some(presets)
        }
        (a, b) => a.clone().or_else(|| b.clone()),
    };

    Permission {
        collection: current.collection.clone(),
        action: current.action,
        fields,
        permissions: merge_filters(strategy, &current.permissions, &next.permissions),
        validation: merge_filters(strategy, &current.validation, &next.validation),
        presets,
        policy: if current.policy == next.policy {
            current.policy.clone()
        } else {
            None
        },
    }
}

/// Combine two optional filters; `None` and `{}` both mean "every row".
fn merge_filters(strategy: MergeStrategy, a: &Option<Filter>, b: &Option<Filter>) -> Option<Filter> {
    let a = a.clone().unwrap_or_default();
    let b = b.clone().unwrap_or_default();

    match strategy {
        MergeStrategy::Or => {
            if a.is_empty() || b.is_empty() {
                return Some(Filter::Empty);
            }
            Some(Filter::or(flatten(a, strategy).chain(flatten(b, strategy)).collect()))
        }
        MergeStrategy::And => {
            Some(Filter::and(flatten(a, strategy).chain(flatten(b, strategy)).collect()))
        }
    }
}

/// Splice children of an already-merged node of the same kind.
fn flatten(filter: Filter, strategy: MergeStrategy) -> Box<dyn Iterator<Item = Filter>> {
    let op = match strategy {
        MergeStrategy::Or => warden_proto::LogicalOp::Or,
        MergeStrategy::And => warden_proto::LogicalOp::And,
    };
    match filter {
        Filter::Logical { op: inner, children } if inner == op => Box::new(children.into_iter()),
        other => Box::new(std::iter::once(other)),
    }
}
