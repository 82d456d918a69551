//! Permission records and caller accountability.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::filter::Filter;
use crate::value::Item;

/// Operation a permission record grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Share,
}

impl Action {
    /// Lowercase name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Share => "share",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of fields a permission record covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldSet {
    /// Every field, written `*`.
    All,
    /// An explicit list.
    Only(BTreeSet<String>),
    /// No field at all.
    #[default]
    None,
}

impl FieldSet {
    /// Explicit field list. A `*` entry makes the set cover everything.
    pub fn only<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: BTreeSet<String> = fields.into_iter().map(Into::into).collect();
        if fields.contains("*") {
            FieldSet::All
        } else if fields.is_empty() {
            FieldSet::None
        } else {
            FieldSet::Only(fields)
        }
    }

    /// Whether `field` is covered.
    pub fn covers(&self, field: &str) -> bool {
        match self {
            FieldSet::All => true,
            FieldSet::Only(fields) => fields.contains(field),
            FieldSet::None => false,
        }
    }

    /// Union, `*` absorbing.
    pub fn union(&self, other: &FieldSet) -> FieldSet {
        match (self, other) {
            (FieldSet::All, _) | (_, FieldSet::All) => FieldSet::All,
            (FieldSet::None, x) | (x, FieldSet::None) => x.clone(),
            (FieldSet::Only(a), FieldSet::Only(b)) => FieldSet::Only(a.union(b).cloned().collect()),
        }
    }

    /// Intersection, `*` acting as identity.
    pub fn intersection(&self, other: &FieldSet) -> FieldSet {
        match (self, other) {
            (FieldSet::All, x) | (x, FieldSet::All) => x.clone(),
            (FieldSet::None, _) | (_, FieldSet::None) => FieldSet::None,
            (FieldSet::Only(a), FieldSet::Only(b)) => {
                FieldSet::only(a.intersection(b).cloned().collect::<Vec<_>>())
            }
        }
    }

    fn to_list(&self) -> Vec<String> {
        match self {
            FieldSet::All => vec!["*".to_string()],
            FieldSet::Only(fields) => fields.iter().cloned().collect(),
            FieldSet::None => Vec::new(),
        }
    }
}

impl Serialize for FieldSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_list().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            List(Vec<String>),
            Csv(String),
            Null(Option<()>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::List(fields) => FieldSet::only(fields),
            Raw::Csv(s) => FieldSet::only(s.split(',').map(str::trim).filter(|f| !f.is_empty())),
            Raw::Null(_) => FieldSet::None,
        })
    }
}

/// A single permission record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    /// Collection the record applies to.
    pub collection: String,
    /// Granted action.
    pub action: Action,
    /// Covered fields.
    #[serde(default)]
    pub fields: FieldSet,
    /// Row filter; `None` or `{}` means every row.
    #[serde(default)]
    pub permissions: Option<Filter>,
    /// Filter that written payloads must satisfy.
    #[serde(default)]
    pub validation: Option<Filter>,
    /// Default values applied on write.
    #[serde(default)]
    pub presets: Option<Item>,
    /// Policy the record was granted through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

impl Permission {
    /// Create a record with no fields and no row filter.
    pub fn new(collection: impl Into<String>, action: Action) -> Self {
        Self {
            collection: collection.into(),
            action,
            fields: FieldSet::None,
            permissions: None,
            validation: None,
            presets: None,
            policy: None,
        }
    }

    /// Set the covered fields.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = FieldSet::only(fields);
        self
    }

    /// Set the row filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.permissions = Some(filter);
        self
    }

    /// Set the validation filter.
    pub fn with_validation(mut self, filter: Filter) -> Self {
        self.validation = Some(filter);
        self
    }

    /// Set the granting policy.
    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// Whether the record grants access to every row.
    pub fn is_unconditional(&self) -> bool {
        self.permissions.as_ref().map_or(true, Filter::is_empty)
    }
}

/// Identity and policy context of a request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Accountability {
    /// User id, if authenticated.
    pub user: Option<String>,
    /// Primary role id.
    pub role: Option<String>,
    /// All role ids, including parents of the primary role.
    pub roles: Vec<String>,
    /// Policy ids attached through roles or directly to the user.
    pub policies: Vec<String>,
    /// Admin callers bypass permission checks.
    pub admin: bool,
    /// Whether the caller has app access.
    pub app: bool,
}

impl Accountability {
    /// An anonymous, non-admin caller.
    pub fn public() -> Self {
        Self::default()
    }

    /// An admin caller.
    pub fn admin() -> Self {
        Self {
            admin: true,
            app: true,
            ..Self::default()
        }
    }

    /// A user caller with a role.
    pub fn user(user: impl Into<String>, role: impl Into<String>) -> Self {
        let role = role.into();
        Self {
            user: Some(user.into()),
            roles: vec![role.clone()],
            role: Some(role),
            ..Self::default()
        }
    }

    /// Attach policies.
    pub fn with_policies<I, S>(mut self, policies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policies = policies.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_set_algebra() {
        let ab = FieldSet::only(["a", "b"]);
        let bc = FieldSet::only(["b", "c"]);

        assert_eq!(ab.union(&bc), FieldSet::only(["a", "b", "c"]));
        assert_eq!(ab.intersection(&bc), FieldSet::only(["b"]));
        assert_eq!(ab.union(&FieldSet::All), FieldSet::All);
        assert_eq!(ab.intersection(&FieldSet::All), ab);
        assert_eq!(
            FieldSet::only(["a"]).intersection(&FieldSet::only(["c"])),
            FieldSet::None
        );
        assert!(FieldSet::only(["*", "a"]).covers("anything"));
    }

    #[test]
    fn test_permission_deserialize() {
        let permission: Permission = serde_json::from_value(json!({
            "collection": "articles",
            "action": "read",
            "fields": ["title", "body"],
            "permissions": {"status": {"_eq": "published"}}
        }))
        .unwrap();

        assert_eq!(permission.action, Action::Read);
        assert!(permission.fields.covers("title"));
        assert!(!permission.fields.covers("secret"));
        assert!(!permission.is_unconditional());

        let open: Permission = serde_json::from_value(json!({
            "collection": "articles",
            "action": "read",
            "fields": "*",
            "permissions": {}
        }))
        .unwrap();
        assert_eq!(open.fields, FieldSet::All);
        assert!(open.is_unconditional());
    }

    #[test]
    fn test_accountability_constructors() {
        assert!(Accountability::admin().admin);
        let user = Accountability::user("u1", "editor").with_policies(["p1"]);
        assert_eq!(user.role.as_deref(), Some("editor"));
        assert_eq!(user.roles, vec!["editor".to_string()]);
        assert_eq!(user.policies, vec!["p1".to_string()]);
        assert!(!user.admin);
    }
}
