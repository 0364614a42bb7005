//! Permission lookup seam.

use std::collections::HashMap;

use async_trait::async_trait;

use kura_types::{Authorities, ResourceResult, VfsPath, WritePermission};

/// Resolves the write permissions granted to an api key.
///
/// The router calls this once per distinct key per ingest batch; the
/// implementation is free to cache underneath.
#[async_trait]
pub trait PermissionsFinder: Send + Sync {
    async fn write_permissions(&self, api_key: &str) -> ResourceResult<Vec<WritePermission>>;
}

/// Is a write to `path` as `write_as` covered by any granted permission?
pub fn can_create(path: &VfsPath, perms: &[WritePermission], write_as: &Authorities) -> bool {
    perms.iter().any(|perm| perm.grants(path, write_as))
}

/// In-memory permission table, for embedding and tests.
#[derive(Debug, Default)]
pub struct StaticPermissions {
    grants: HashMap<String, Vec<WritePermission>>,
}

impl StaticPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one permission under an api key.
    pub fn grant(mut self, api_key: impl Into<String>, perm: WritePermission) -> Self {
        self.grants.entry(api_key.into()).or_default().push(perm);
        self
    }

    /// Grant an api key the whole tree on behalf of `authorities`.
    pub fn grant_root(self, api_key: impl Into<String>, authorities: Authorities) -> Self {
        self.grant(api_key, WritePermission::new(VfsPath::root(), authorities))
    }
}

#[async_trait]
impl PermissionsFinder for StaticPermissions {
    async fn write_permissions(&self, api_key: &str) -> ResourceResult<Vec<WritePermission>> {
        Ok(self.grants.get(api_key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_permissions_lookup() {
        let perms = StaticPermissions::new()
            .grant_root("key1", Authorities::single("acct"));

        assert_eq!(perms.write_permissions("key1").await.unwrap().len(), 1);
        assert!(perms.write_permissions("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_can_create_checks_subtree_and_accounts() {
        let granted = StaticPermissions::new()
            .grant(
                "key1",
                WritePermission::new(
                    "/data".parse().unwrap(),
                    Authorities::new(["a", "b"]).unwrap(),
                ),
            )
            .write_permissions("key1")
            .await
            .unwrap();

        let path: VfsPath = "/data/sub".parse().unwrap();
        assert!(can_create(&path, &granted, &Authorities::single("a")));
        assert!(!can_create(&path, &granted, &Authorities::single("c")));
        assert!(!can_create(
            &"/elsewhere".parse().unwrap(),
            &granted,
            &Authorities::single("a")
        ));
    }
}
