//! Role resolution from the profile table.

use super::types::DeniedReason;
use crate::backend::{RowKey, RowStore};
use crate::rows::UserRow;
use crate::types::{Profile, UserId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Fetches the authoritative profile row for a user and derives its role.
///
/// Every call is a fresh lookup; nothing is cached.
pub struct RoleResolver {
    store: Arc<dyn RowStore>,
    users_table: String,
    avatar_bucket: String,
}

impl RoleResolver {
    pub fn new(
        store: Arc<dyn RowStore>,
        users_table: impl Into<String>,
        avatar_bucket: impl Into<String>,
    ) -> Self {
        Self {
            store,
            users_table: users_table.into(),
            avatar_bucket: avatar_bucket.into(),
        }
    }

    /// Resolve `user_id` to a profile with exactly one row lookup.
    pub fn resolve(&self, user_id: &UserId) -> Result<Profile, DeniedReason> {
        if user_id.as_str().is_empty() {
            return Err(DeniedReason::LookupFailed("empty user id".into()));
        }

        let row = match self
            .store
            .fetch_row(&self.users_table, &RowKey::id(user_id.as_str()))
        {
            Ok(Some(row)) => row,
            Ok(None) => {
                debug!(user = %user_id, "no profile row");
                return Err(DeniedReason::ProfileMissing);
            }
            Err(e) => {
                warn!(user = %user_id, error = %e, "profile lookup failed");
                return Err(DeniedReason::LookupFailed(e.to_string()));
            }
        };

        let user = UserRow::from_row(row).map_err(|e| {
            warn!(user = %user_id, error = %e, "malformed profile row");
            DeniedReason::LookupFailed(e.to_string())
        })?;

        user.into_profile(&self.avatar_bucket)
            .map_err(DeniedReason::UnknownRole)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryRowStore;
    use crate::types::{BlobRef, Role};
    use serde_json::json;

    fn resolver_with(rows: Vec<serde_json::Value>) -> (Arc<MemoryRowStore>, RoleResolver) {
        let store = Arc::new(MemoryRowStore::new());
        store.seed("users", rows.into_iter().map(|v| v.as_object().cloned().unwrap()));
        let resolver = RoleResolver::new(store.clone(), "users", "pfp");
        (store, resolver)
    }

    #[test]
    fn test_resolve_owner() {
        let (store, resolver) = resolver_with(vec![json!({
            "id": "u1", "role": "owner", "full_name": "Ada", "profile_picture": "u1.png"
        })]);

        let profile = resolver.resolve(&UserId::from("u1")).unwrap();
        assert_eq!(profile.role, Role::Owner);
        assert_eq!(profile.avatar_ref, Some(BlobRef::new("pfp", "u1.png")));
        assert_eq!(store.fetch_count("users"), 1);
    }

    #[test]
    fn test_resolve_missing() {
        let (_, resolver) = resolver_with(vec![]);
        assert_eq!(
            resolver.resolve(&UserId::from("u1")),
            Err(DeniedReason::ProfileMissing)
        );
    }

    #[test]
    fn test_resolve_lookup_failure() {
        let (store, resolver) = resolver_with(vec![json!({"id": "u1", "role": "owner"})]);
        store.fail_fetches("users", 1);

        let denied = resolver.resolve(&UserId::from("u1")).unwrap_err();
        assert_eq!(denied.as_str(), "lookup-failed");

        // No caching and no hidden retry: the next call is a fresh fetch.
        assert!(resolver.resolve(&UserId::from("u1")).is_ok());
        assert_eq!(store.fetch_count("users"), 2);
    }

    #[test]
    fn test_resolve_unknown_role_is_denied() {
        let (_, resolver) = resolver_with(vec![json!({"id": "u1", "role": "admin"})]);
        assert_eq!(
            resolver.resolve(&UserId::from("u1")),
            Err(DeniedReason::UnknownRole("admin".into()))
        );
    }

    #[test]
    fn test_resolve_empty_id_skips_fetch() {
        let (store, resolver) = resolver_with(vec![]);
        assert!(resolver.resolve(&UserId::from("")).is_err());
        assert_eq!(store.fetch_count("users"), 0);
    }
}
