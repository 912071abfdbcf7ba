//! In-process resource store
//!
//! Mirrors the apiserver behaviors the engine depends on: monotonically
//! increasing resource versions with conflict detection, status as a separate
//! subresource, and finalizer-gated object removal. Backs the test suite.

use std::collections::BTreeMap;

use chrono::Utc;
use k8s_openapi::api::core::v1::{
    Namespace, NamespaceStatus, PersistentVolume, PersistentVolumeClaim,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use parking_lot::RwLock;

use super::ResourceStore;
use crate::crd::LustreFileSystem;
use crate::error::{Error, Result};

#[derive(Default)]
struct Inner {
    filesystems: BTreeMap<String, LustreFileSystem>,
    namespaces: BTreeMap<String, Namespace>,
    volumes: BTreeMap<String, PersistentVolume>,
    claims: BTreeMap<(String, String), PersistentVolumeClaim>,
    version_counter: u64,
}

/// In-memory [`ResourceStore`]
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

fn bump(counter: &mut u64) -> String {
    *counter += 1;
    counter.to_string()
}

fn check_version(
    kind: &str,
    name: &str,
    stored: &Option<String>,
    incoming: &Option<String>,
) -> Result<()> {
    match incoming {
        // A write without a resource version is an unconditional replace
        None => Ok(()),
        Some(version) if stored.as_deref() == Some(version.as_str()) => Ok(()),
        Some(_) => Err(Error::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
        }),
    }
}

fn required_name(meta: &ObjectMeta, kind: &str) -> Result<String> {
    meta.name
        .clone()
        .ok_or_else(|| Error::Internal(format!("{kind} object has no name")))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file system, assigning its first resource version
    pub fn insert_filesystem(&self, mut fs: LustreFileSystem) -> LustreFileSystem {
        let mut inner = self.inner.write();
        let version = bump(&mut inner.version_counter);
        fs.metadata.resource_version = Some(version);
        let name = fs.name().to_string();
        inner.filesystems.insert(name, fs.clone());
        fs
    }

    /// Seed a namespace object
    pub fn insert_namespace(&self, ns: Namespace) {
        let name = ns.metadata.name.clone().unwrap_or_default();
        self.inner.write().namespaces.insert(name, ns);
    }

    /// Seed a namespace already in the Active phase
    pub fn insert_active_namespace(&self, name: &str) {
        self.insert_namespace(Self::active_namespace(name));
    }

    pub fn remove_namespace(&self, name: &str) {
        self.inner.write().namespaces.remove(name);
    }

    /// Build a namespace object in the Active phase
    pub fn active_namespace(name: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(NamespaceStatus {
                phase: Some("Active".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Ask for deletion the way the apiserver would: objects with finalizers
    /// get a deletion timestamp, objects without disappear immediately.
    pub fn request_filesystem_deletion(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let version = bump(&mut inner.version_counter);

        let Some(fs) = inner.filesystems.get_mut(name) else {
            return Err(Error::ResourceNotFound {
                kind: "LustreFileSystem".to_string(),
                name: name.to_string(),
            });
        };

        if fs.finalizers().is_empty() {
            inner.filesystems.remove(name);
            return Ok(());
        }

        if fs.metadata.deletion_timestamp.is_none() {
            fs.metadata.deletion_timestamp = Some(Time(Utc::now()));
            fs.metadata.resource_version = Some(version);
        }
        Ok(())
    }

    pub fn volume_exists(&self, name: &str) -> bool {
        self.inner.read().volumes.contains_key(name)
    }

    pub fn claim_exists(&self, namespace: &str, name: &str) -> bool {
        self.inner
            .read()
            .claims
            .contains_key(&(namespace.to_string(), name.to_string()))
    }
}

#[async_trait::async_trait]
impl ResourceStore for MemoryStore {
    async fn get_filesystem(&self, name: &str) -> Result<Option<LustreFileSystem>> {
        Ok(self.inner.read().filesystems.get(name).cloned())
    }

    async fn list_filesystems(&self) -> Result<Vec<LustreFileSystem>> {
        Ok(self.inner.read().filesystems.values().cloned().collect())
    }

    async fn update_filesystem(&self, fs: &LustreFileSystem) -> Result<LustreFileSystem> {
        let name = required_name(&fs.metadata, "LustreFileSystem")?;
        let mut inner = self.inner.write();
        let version = bump(&mut inner.version_counter);

        let stored = inner
            .filesystems
            .get(&name)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "LustreFileSystem".to_string(),
                name: name.clone(),
            })?;
        check_version(
            "LustreFileSystem",
            &name,
            &stored.metadata.resource_version,
            &fs.metadata.resource_version,
        )?;

        let mut updated = fs.clone();
        // Status is a subresource; the main write cannot touch it
        updated.status = stored.status;
        updated.metadata.deletion_timestamp = stored.metadata.deletion_timestamp;
        updated.metadata.resource_version = Some(version);

        if updated.metadata.deletion_timestamp.is_some() && updated.finalizers().is_empty() {
            // Last finalizer removed on a deleting object: it is gone
            inner.filesystems.remove(&name);
        } else {
            inner.filesystems.insert(name, updated.clone());
        }
        Ok(updated)
    }

    async fn update_filesystem_status(&self, fs: &LustreFileSystem) -> Result<LustreFileSystem> {
        let name = required_name(&fs.metadata, "LustreFileSystem")?;
        let mut inner = self.inner.write();
        let version = bump(&mut inner.version_counter);

        let stored = inner
            .filesystems
            .get(&name)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "LustreFileSystem".to_string(),
                name: name.clone(),
            })?;
        check_version(
            "LustreFileSystem",
            &name,
            &stored.metadata.resource_version,
            &fs.metadata.resource_version,
        )?;

        let mut updated = stored;
        updated.status = fs.status.clone();
        updated.metadata.resource_version = Some(version);
        inner.filesystems.insert(name, updated.clone());
        Ok(updated)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        Ok(self.inner.read().namespaces.get(name).cloned())
    }

    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>> {
        Ok(self.inner.read().volumes.get(name).cloned())
    }

    async fn create_volume(&self, pv: &PersistentVolume) -> Result<PersistentVolume> {
        let name = required_name(&pv.metadata, "PersistentVolume")?;
        let mut inner = self.inner.write();
        if inner.volumes.contains_key(&name) {
            return Err(Error::ResourceExists {
                kind: "PersistentVolume".to_string(),
                name,
            });
        }
        let version = bump(&mut inner.version_counter);
        let mut created = pv.clone();
        created.metadata.resource_version = Some(version);
        inner.volumes.insert(name, created.clone());
        Ok(created)
    }

    async fn update_volume(&self, pv: &PersistentVolume) -> Result<PersistentVolume> {
        let name = required_name(&pv.metadata, "PersistentVolume")?;
        let mut inner = self.inner.write();
        let version = bump(&mut inner.version_counter);

        let stored = inner
            .volumes
            .get(&name)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "PersistentVolume".to_string(),
                name: name.clone(),
            })?;
        check_version(
            "PersistentVolume",
            &name,
            &stored.metadata.resource_version,
            &pv.metadata.resource_version,
        )?;

        let mut updated = pv.clone();
        updated.status = stored.status;
        updated.metadata.resource_version = Some(version);
        inner.volumes.insert(name, updated.clone());
        Ok(updated)
    }

    async fn delete_volume(&self, name: &str) -> Result<()> {
        self.inner.write().volumes.remove(name);
        Ok(())
    }

    async fn get_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>> {
        Ok(self
            .inner
            .read()
            .claims
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_volume_claim(
        &self,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        let name = required_name(&pvc.metadata, "PersistentVolumeClaim")?;
        let namespace = pvc.metadata.namespace.clone().unwrap_or_default();
        let mut inner = self.inner.write();
        let key = (namespace, name.clone());
        if inner.claims.contains_key(&key) {
            return Err(Error::ResourceExists {
                kind: "PersistentVolumeClaim".to_string(),
                name,
            });
        }
        let version = bump(&mut inner.version_counter);
        let mut created = pvc.clone();
        created.metadata.resource_version = Some(version);
        inner.claims.insert(key, created.clone());
        Ok(created)
    }

    async fn update_volume_claim(
        &self,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        let name = required_name(&pvc.metadata, "PersistentVolumeClaim")?;
        let namespace = pvc.metadata.namespace.clone().unwrap_or_default();
        let mut inner = self.inner.write();
        let version = bump(&mut inner.version_counter);

        let key = (namespace, name.clone());
        let stored = inner
            .claims
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "PersistentVolumeClaim".to_string(),
                name: name.clone(),
            })?;
        check_version(
            "PersistentVolumeClaim",
            &name,
            &stored.metadata.resource_version,
            &pvc.metadata.resource_version,
        )?;

        let mut updated = pvc.clone();
        updated.status = stored.status;
        updated.metadata.resource_version = Some(version);
        inner.claims.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete_volume_claim(&self, namespace: &str, name: &str) -> Result<()> {
        self.inner
            .write()
            .claims
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{LustreFileSystemSpec, FINALIZER};
    use assert_matches::assert_matches;

    fn sample_fs() -> LustreFileSystem {
        LustreFileSystem::new(
            "lustre-fs-example",
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
    async fn test_stale_resource_version_conflicts() {
        let store = MemoryStore::new();
        let seeded = store.insert_filesystem(sample_fs());

        // A concurrent writer advances the version
        let mut first = seeded.clone();
        first.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        store.update_filesystem(&first).await.unwrap();

        // The original copy is now stale
        let mut stale = seeded;
        stale.metadata.finalizers = Some(vec!["other/finalizer".to_string()]);
        assert_matches!(
            store.update_filesystem(&stale).await,
            Err(Error::Conflict { .. })
        );
    }

    #[tokio::test]
    async fn test_status_is_a_subresource() {
        let store = MemoryStore::new();
        let seeded = store.insert_filesystem(sample_fs());

        // A main-resource write cannot smuggle in a status
        let mut with_status = seeded.clone();
        with_status.status = Some(Default::default());
        let updated = store.update_filesystem(&with_status).await.unwrap();
        assert_eq!(updated.status, None);

        // The status endpoint can
        let mut with_status = updated.clone();
        with_status.status = Some(Default::default());
        let updated = store.update_filesystem_status(&with_status).await.unwrap();
        assert!(updated.status.is_some());
    }

    #[tokio::test]
    async fn test_finalizer_gates_removal() {
        let store = MemoryStore::new();
        let seeded = store.insert_filesystem(sample_fs());

        let mut fs = seeded.clone();
        fs.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        let fs = store.update_filesystem(&fs).await.unwrap();

        store.request_filesystem_deletion("lustre-fs-example").unwrap();
        let loaded = store
            .get_filesystem("lustre-fs-example")
            .await
            .unwrap()
            .expect("still present while finalized");
        assert!(loaded.metadata.deletion_timestamp.is_some());

        let mut fs = LustreFileSystem {
            metadata: loaded.metadata.clone(),
            spec: fs.spec.clone(),
            status: None,
        };
        fs.metadata.finalizers = None;
        store.update_filesystem(&fs).await.unwrap();
        assert_eq!(store.get_filesystem("lustre-fs-example").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store.delete_volume("never-created").await.unwrap();
        store.delete_volume_claim("ns1", "never-created").await.unwrap();
    }
}
