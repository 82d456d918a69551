//! Field and row access derived from permission records.
//!
//! Each collection's records are reduced to a list of distinct conditional
//! row filters (its *cases*) and, per record, the fields it grants and the
//! case it grants them under. A field is readable when at least one record
//! covers it; it is unconditionally readable when one of those records has
//! no row filter, and otherwise visible where any of its cases holds.

use std::collections::HashMap;

use serde::Serialize;
use warden_proto::{Action, FieldSet, Filter, Permission};

use crate::error::{Error, Result};

/// A field grant: covered fields, and the case they are granted under.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct Grant {
    fields: FieldSet,
    /// `None` for an unconditional grant.
    case: Option<usize>,
}

/// Read access to one collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionAccess {
    /// Collection name.
    pub collection: String,
    /// Distinct conditional row filters, in record order.
    pub cases: Vec<Filter>,
    grants: Vec<Grant>,
}

impl CollectionAccess {
    /// Build access from the records of one collection.
    pub fn from_records<'a>(
        collection: impl Into<String>,
        records: impl IntoIterator<Item = &'a Permission>,
    ) -> Self {
        let mut cases: Vec<Filter> = Vec::new();
        let mut grants = Vec::new();

        for record in records {
            let case = match &record.permissions {
                Some(filter) if !filter.is_empty() => {
                    let index = match cases.iter().position(|c| c == filter) {
                        Some(index) => index,
                        None => {
                            cases.push(filter.clone());
                            cases.len() - 1
                        }
                    };
                    Some(index)
                }
                _ => None,
            };
            grants.push(Grant {
                fields: record.fields.clone(),
                case,
            });
        }

        Self {
            collection: collection.into(),
            cases,
            grants,
        }
    }

    /// Whether some record grants every row.
    pub fn rows_unrestricted(&self) -> bool {
        self.grants.iter().any(|grant| grant.case.is_none())
    }

    /// Row filter restricting reads, `None` when rows are unrestricted.
    pub fn row_filter(&self) -> Option<Filter> {
        if self.rows_unrestricted() {
            None
        } else {
            Some(Filter::or(self.cases.clone()))
        }
    }

    /// Visibility of a field.
    ///
    /// `None` when no record covers the field, `Some(vec![])` when a covering
    /// record is unconditional, and otherwise the ascending indices of every
    /// case under which the field is granted.
    pub fn field_access(&self, field: &str) -> Option<Vec<usize>> {
        let mut when_case = Vec::new();
        let mut covered = false;

        for grant in self.grants.iter().filter(|g| g.fields.covers(field)) {
            covered = true;
            match grant.case {
                None => return Some(Vec::new()),
                Some(index) if !when_case.contains(&index) => when_case.push(index),
                Some(_) => {}
            }
        }

        covered.then(|| {
            when_case.sort_unstable();
            when_case
        })
    }

    /// Whether a field is readable at all.
    pub fn can_read_field(&self, field: &str) -> bool {
        self.grants.iter().any(|grant| grant.fields.covers(field))
    }
}

/// Read access of one request, keyed by collection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccessMap {
    admin: bool,
    collections: HashMap<String, CollectionAccess>,
}

impl AccessMap {
    /// Access of an admin caller: everything, unannotated.
    pub fn admin() -> Self {
        Self {
            admin: true,
            collections: HashMap::new(),
        }
    }

    /// Build access from a flat record list, keeping records for `action`.
    pub fn from_permissions(records: &[Permission], action: Action) -> Self {
        let mut grouped: HashMap<&str, Vec<&Permission>> = HashMap::new();
        for record in records.iter().filter(|r| r.action == action) {
            grouped.entry(record.collection.as_str()).or_default().push(record);
        }

        let collections = grouped
            .into_iter()
            .map(|(collection, records)| {
                (
                    collection.to_string(),
                    CollectionAccess::from_records(collection, records),
                )
            })
            .collect();

        Self {
            admin: false,
            collections,
        }
    }

    /// Whether the caller bypasses permission checks.
    pub fn is_admin(&self) -> bool {
        self.admin
    }

    /// Access to a collection, if any record grants it.
    pub fn collection(&self, name: &str) -> Option<&CollectionAccess> {
        self.collections.get(name)
    }

    /// Access to a collection or a permission error.
    pub fn require(&self, name: &str) -> Result<&CollectionAccess> {
        self.collection(name).ok_or_else(|| Error::PermissionDenied {
            collection: name.to_string(),
            action: Action::Read.to_string(),
        })
    }

    /// Whether the collection can be read at all.
    pub fn can_read(&self, name: &str) -> bool {
        self.admin || self.collections.contains_key(name)
    }

    /// Visibility of `collection.field`, unconditional for admins.
    pub fn field_access(&self, collection: &str, field: &str) -> Option<Vec<usize>> {
        if self.admin {
            return Some(Vec::new());
        }
        self.collection(collection)?.field_access(field)
    }

    /// Row filter of a collection, `None` for admins and unrestricted rows.
    pub fn row_filter(&self, collection: &str) -> Option<Filter> {
        if self.admin {
            return None;
        }
        match self.collection(collection) {
            Some(access) => access.row_filter(),
            // Unreachable after annotation; deny rather than widen.
            None => Some(Filter::or(Vec::new())),
        }
    }

    /// Cases of a collection, empty for admins.
    pub fn cases(&self, collection: &str) -> &[Filter] {
        if self.admin {
            return &[];
        }
        self.collection(collection)
            .map(|access| access.cases.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn record(fields: &[&str], filter: Option<Filter>) -> Permission {
        let mut record = Permission::new("articles", Action::Read).with_fields(fields.iter().copied());
        record.permissions = filter;
        record
    }

    #[test]
    fn test_case_injection() {
        let published = Filter::eq("status", "published");
        let draft = Filter::eq("status", "draft");
        let access = CollectionAccess::from_records(
            "articles",
            &[
                record(&["a", "b"], Some(published.clone())),
                record(&["b", "c"], Some(draft.clone())),
            ],
        );

        assert_eq!(access.cases, vec![published, draft]);
        assert_eq!(access.field_access("a"), Some(vec![0]));
        assert_eq!(access.field_access("b"), Some(vec![0, 1]));
        assert_eq!(access.field_access("c"), Some(vec![1]));
        assert_eq!(access.field_access("d"), None);
        assert!(!access.rows_unrestricted());
    }

    #[test]
    fn test_unconditional_record_short_circuits() {
        let access = CollectionAccess::from_records(
            "articles",
            &[
                record(&["a", "b"], Some(Filter::eq("status", "published"))),
                record(&["b"], Some(Filter::Empty)),
            ],
        );

        assert_eq!(access.field_access("a"), Some(vec![0]));
        assert_eq!(access.field_access("b"), Some(vec![]));
        assert!(access.rows_unrestricted());
        assert_eq!(access.row_filter(), None);
    }

    #[test]
    fn test_identical_filters_share_a_case() {
        let published = Filter::eq("status", "published");
        let access = CollectionAccess::from_records(
            "articles",
            &[
                record(&["a"], Some(published.clone())),
                record(&["b"], Some(published.clone())),
            ],
        );
        assert_eq!(access.cases.len(), 1);
        assert_eq!(access.field_access("b"), Some(vec![0]));
    }

    #[test]
    fn test_access_map() {
        let records = vec![
            record(&["*"], None),
            Permission::new("users", Action::Update).with_fields(["name"]),
        ];
        let map = AccessMap::from_permissions(&records, Action::Read);

        assert!(map.can_read("articles"));
        assert!(!map.can_read("users"));
        assert!(matches!(
            map.require("users"),
            Err(Error::PermissionDenied { .. })
        ));
        assert_eq!(map.field_access("articles", "anything"), Some(vec![]));

        let admin = AccessMap::admin();
        assert!(admin.can_read("users"));
        assert_eq!(admin.row_filter("users"), None);
    }

    fn arb_fields() -> impl Strategy<Value = Vec<&'static str>> {
        prop::sample::subsequence(vec!["a", "b", "c", "d"], 0..=4)
    }

    proptest! {
        #[test]
        fn prop_overlapping_records(
            grants in prop::collection::vec((arb_fields(), prop::option::of(0usize..3)), 3..6),
        ) {
            let filters = [
                Filter::eq("status", "published"),
                Filter::eq("status", "draft"),
                Filter::eq("owner", "me"),
            ];
            let records: Vec<Permission> = grants
                .iter()
                .map(|(fields, filter)| record(fields, filter.map(|i| filters[i].clone())))
                .collect();
            let access = CollectionAccess::from_records("articles", &records);

            // Cases are distinct and appear in first-use order.
            let mut expected_cases: Vec<Filter> = Vec::new();
            for record in &records {
                if let Some(filter) = &record.permissions {
                    if !expected_cases.contains(filter) {
                        expected_cases.push(filter.clone());
                    }
                }
            }
            prop_assert_eq!(&access.cases, &expected_cases);
            prop_assert_eq!(
                access.rows_unrestricted(),
                records.iter().any(|r| r.permissions.is_none())
            );

            for field in ["a", "b", "c", "d"] {
                let covering: Vec<&Permission> =
                    records.iter().filter(|r| r.fields.covers(field)).collect();
                let access_for_field = access.field_access(field);

                if covering.is_empty() {
                    prop_assert_eq!(access_for_field, None);
                } else if covering.iter().any(|r| r.permissions.is_none()) {
                    prop_assert_eq!(access_for_field, Some(vec![]));
                } else {
                    // Exactly the covering records' cases, ascending.
                    let expected: BTreeSet<usize> = covering
                        .iter()
                        .filter_map(|r| r.permissions.as_ref())
                        .filter_map(|f| access.cases.iter().position(|c| c == f))
                        .collect();
                    prop_assert_eq!(access_for_field, Some(expected.into_iter().collect::<Vec<_>>()));
                }
            }
        }
    }
}
