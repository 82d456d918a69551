//! Permission storage and per-request access resolution.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;
use warden_proto::{Accountability, Action, Item, Permission, Value};

use crate::cache::{cache_key, CachePort};
use crate::error::{Error, Result};

use super::access::AccessMap;
use super::context::{needs_records, DynamicContext};

/// Source of permission records.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Every record applicable to the caller for `action`, across collections.
    async fn permissions(
        &self,
        accountability: &Accountability,
        action: Action,
    ) -> Result<Vec<Permission>>;

    /// The caller's user record, for `$CURRENT_USER.<path>` lookups.
    async fn user_record(&self, _accountability: &Accountability) -> Result<Option<Item>> {
        Ok(None)
    }

    /// The caller's role record, for `$CURRENT_ROLE.<path>` lookups.
    async fn role_record(&self, _accountability: &Accountability) -> Result<Option<Item>> {
        Ok(None)
    }
}

/// In-memory permission store.
///
/// Records without a policy apply to every caller; records with a policy
/// apply to callers holding that policy.
#[derive(Debug, Default)]
pub struct MemoryPermissionStore {
    records: RwLock<Vec<Permission>>,
    users: RwLock<HashMap<String, Item>>,
    roles: RwLock<HashMap<String, Item>>,
}

impl MemoryPermissionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `records`.
    pub fn with_permissions(records: impl IntoIterator<Item = Permission>) -> Self {
        let store = Self::new();
        store.records.write().extend(records);
        store
    }

    /// Parse a JSON list of records.
    pub fn from_json(json: &str) -> Result<Self> {
        let records: Vec<Permission> = serde_json::from_str(json)
            .map_err(|e| Error::PermissionStore(format!("invalid permission list: {e}")))?;
        Ok(Self::with_permissions(records))
    }

    /// Add a record.
    pub fn add_permission(&self, record: Permission) {
        self.records.write().push(record);
    }

    /// Register a user record.
    pub fn put_user(&self, id: impl Into<String>, record: Item) {
        self.users.write().insert(id.into(), record);
    }

    /// Register a role record.
    pub fn put_role(&self, id: impl Into<String>, record: Item) {
        self.roles.write().insert(id.into(), record);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl PermissionStore for MemoryPermissionStore {
    async fn permissions(
        &self,
        accountability: &Accountability,
        action: Action,
    ) -> Result<Vec<Permission>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|record| record.action == action)
            .filter(|record| match &record.policy {
                None => true,
                Some(policy) => accountability.policies.contains(policy),
            })
            .cloned()
            .collect())
    }

    async fn user_record(&self, accountability: &Accountability) -> Result<Option<Item>> {
        Ok(accountability
            .user
            .as_ref()
            .and_then(|id| self.users.read().get(id).cloned()))
    }

    async fn role_record(&self, accountability: &Accountability) -> Result<Option<Item>> {
        Ok(accountability
            .role
            .as_ref()
            .and_then(|id| self.roles.read().get(id).cloned()))
    }
}

/// Access and dynamic-variable context of one request.
#[derive(Debug, Clone)]
pub struct ResolvedAccess {
    /// Field and row access per collection.
    pub access: AccessMap,
    /// Context dynamic variables resolve against.
    pub context: DynamicContext,
}

/// Load the caller's records for `action` and resolve their dynamic variables.
///
/// User and role records are only fetched when a filter refers to them, and
/// are memoized through `cache` for `ttl`.
pub async fn resolve_access(
    store: &dyn PermissionStore,
    cache: &dyn CachePort,
    ttl: Duration,
    accountability: &Accountability,
    action: Action,
) -> Result<ResolvedAccess> {
    let context = DynamicContext::new(accountability.clone());
    if accountability.admin {
        return Ok(ResolvedAccess {
            access: AccessMap::admin(),
            context,
        });
    }

    let mut records = store.permissions(accountability, action).await?;

    let (mut wants_user, mut wants_role) = (false, false);
    for filter in records.iter().filter_map(|r| r.permissions.as_ref()) {
        let (user, role) = needs_records(filter);
        wants_user |= user;
        wants_role |= role;
    }

    let user = match (&accountability.user, wants_user) {
        (Some(id), true) => {
            let key = cache_key("warden:user", &[id.as_str()]);
            cached_record(cache, &key, ttl, store.user_record(accountability)).await?
        }
        _ => None,
    };
    let role = match (&accountability.role, wants_role) {
        (Some(id), true) => {
            let key = cache_key("warden:role", &[id.as_str()]);
            cached_record(cache, &key, ttl, store.role_record(accountability)).await?
        }
        _ => None,
    };
    let context = context.with_user(user).with_role(role);

    for record in &mut records {
        if let Some(filter) = record.permissions.as_mut() {
            context.resolve_filter(filter)?;
        }
    }

    debug!(
        records = records.len(),
        user = ?accountability.user,
        action = %action,
        "resolved permission records"
    );

    Ok(ResolvedAccess {
        access: AccessMap::from_permissions(&records, action),
        context,
    })
}

async fn cached_record(
    cache: &dyn CachePort,
    key: &str,
    ttl: Duration,
    load: impl std::future::Future<Output = Result<Option<Item>>>,
) -> Result<Option<Item>> {
    if let Some(json) = cache.get(key).await {
        if let Value::Object(item) = Value::from_json(json) {
            return Ok(Some(item));
        }
    }

    let record = load.await?;
    if let Some(item) = &record {
        cache
            .set(key, Value::Object(item.clone()).to_json(), ttl)
            .await;
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use warden_proto::Filter;

    fn store() -> MemoryPermissionStore {
        MemoryPermissionStore::with_permissions([
            Permission::new("articles", Action::Read).with_fields(["*"]),
            Permission::new("drafts", Action::Read)
                .with_fields(["*"])
                .with_filter(Filter::eq("owner", "$CURRENT_USER"))
                .with_policy("editors"),
            Permission::new("orgs", Action::Read)
                .with_fields(["*"])
                .with_filter(Filter::eq("id", "$CURRENT_USER.org")),
            Permission::new("articles", Action::Update).with_fields(["title"]),
        ])
    }

    #[tokio::test]
    async fn test_records_filtered_by_policy_and_action() {
        let store = store();
        let public = store
            .permissions(&Accountability::public(), Action::Read)
            .await
            .unwrap();
        assert_eq!(public.len(), 2);

        let editor = Accountability::user("u1", "r1").with_policies(["editors"]);
        let records = store.permissions(&editor, Action::Read).await.unwrap();
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn test_resolve_access_substitutes_variables() {
        let store = store();
        let mut user = Item::new();
        user.insert("org".into(), Value::Int(42));
        store.put_user("u1", user);

        let cache = MemoryCache::new();
        let editor = Accountability::user("u1", "r1").with_policies(["editors"]);
        let resolved = resolve_access(&store, &cache, Duration::from_secs(10), &editor, Action::Read)
            .await
            .unwrap();

        assert_eq!(
            resolved.access.row_filter("drafts"),
            Some(Filter::or(vec![Filter::eq("owner", "u1")]))
        );
        assert_eq!(
            resolved.access.row_filter("orgs"),
            Some(Filter::or(vec![Filter::eq("id", 42)]))
        );
        assert_eq!(cache.len(), 1);

        // Second resolution is served from the cache.
        resolve_access(&store, &cache, Duration::from_secs(10), &editor, Action::Read)
            .await
            .unwrap();
        assert_eq!(cache.stats().hits(), 1);
    }

    #[tokio::test]
    async fn test_admin_bypasses_store() {
        let store = MemoryPermissionStore::new();
        let cache = MemoryCache::new();
        let resolved = resolve_access(
            &store,
            &cache,
            Duration::from_secs(10),
            &Accountability::admin(),
            Action::Read,
        )
        .await
        .unwrap();
        assert!(resolved.access.is_admin());
    }

    #[test]
    fn test_from_json() {
        let store = MemoryPermissionStore::from_json(
            r#"[{"collection": "articles", "action": "read", "fields": "*", "permissions": {}}]"#,
        )
        .unwrap();
        assert_eq!(store.len(), 1);
        assert!(MemoryPermissionStore::from_json("{").is_err());
    }
}
