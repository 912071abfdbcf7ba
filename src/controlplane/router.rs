//! Change Router
//!
//! Maps a namespace lifecycle event back to the LustreFileSystem resources
//! that must be re-reconciled. The fan-out is deliberately coarse: every
//! filesystem is re-enqueued regardless of whether it references the changed
//! namespace. One bounded linear rescan buys a lot of simplicity, and a pass
//! that finds nothing to do touches nothing.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::store::ResourceStore;

/// Routes namespace events to filesystem reconciliations
pub struct ChangeRouter {
    store: Arc<dyn ResourceStore>,
}

impl ChangeRouter {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Names of every LustreFileSystem to re-enqueue for the given namespace
    /// event
    pub async fn on_namespace_event(&self, namespace: &str) -> Result<Vec<String>> {
        let filesystems = self.store.list_filesystems().await?;
        debug!(
            "Namespace {} changed; re-enqueueing {} filesystems",
            namespace,
            filesystems.len()
        );
        Ok(filesystems
            .into_iter()
            .filter_map(|fs| fs.metadata.name)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{LustreFileSystem, LustreFileSystemSpec};
    use crate::store::MemoryStore;
    use std::collections::BTreeMap;

    fn fs(name: &str) -> LustreFileSystem {
        LustreFileSystem::new(
            name,
            LustreFileSystemSpec {
                name: "test".into(),
                mgs_nids: vec!["172.0.0.1@tcp".into()],
                mount_root: "/lus/test".into(),
                storage_class_name: "lustre-fs".into(),
                namespaces: BTreeMap::new(),
            },
        )
    }

    #[tokio::test]
    async fn test_fan_out_returns_every_filesystem() {
        let store = Arc::new(MemoryStore::new());
        store.insert_filesystem(fs("fs-a"));
        store.insert_filesystem(fs("fs-b"));
        store.insert_filesystem(fs("fs-c"));

        let router = ChangeRouter::new(store);
        let mut names = router.on_namespace_event("ns1").await.unwrap();
        names.sort();
        assert_eq!(names, vec!["fs-a", "fs-b", "fs-c"]);

        // No filtering on the namespace: an unreferenced one fans out the same
        let router_names = router.on_namespace_event("unreferenced").await.unwrap();
        assert_eq!(router_names.len(), 3);
    }

    #[tokio::test]
    async fn test_fan_out_with_no_filesystems_is_empty() {
        let store = Arc::new(MemoryStore::new());
        let router = ChangeRouter::new(store);
        assert!(router.on_namespace_event("ns1").await.unwrap().is_empty());
    }
}
