//! Access Provisioner
//!
//! Manages the PersistentVolume/PersistentVolumeClaim pair backing one
//! (filesystem, namespace, mode) access request. All operations are
//! create-or-update with deterministic names, so repeating them is safe and a
//! clean second pass touches nothing.
//!
//! Ordering rule: the volume is created first and pre-claims its
//! PersistentVolumeClaim by name. Were the claim created first, the binder
//! could match the volume to an unrelated claim.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, PersistentVolume, PersistentVolumeClaim,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::{debug, info};

use crate::crd::{
    AccessMode, LustreFileSystem, CSI_DRIVER_NAME, CSI_FS_TYPE, VOLUME_RESOURCE_QUANTITY,
};
use crate::error::Result;
use crate::store::ResourceStore;

// =============================================================================
// Operation Result
// =============================================================================

/// What a create-or-update call did to the object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Created,
    Updated,
    Unchanged,
}

// =============================================================================
// Access Provisioner
// =============================================================================

/// Provisions and tears down the backing volume pair for access requests
pub struct AccessProvisioner {
    store: Arc<dyn ResourceStore>,
}

impl AccessProvisioner {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Ensure the PersistentVolume for (fs, namespace, mode) exists and
    /// carries the desired spec
    pub async fn ensure_volume(
        &self,
        fs: &LustreFileSystem,
        namespace: &str,
        mode: AccessMode,
    ) -> Result<(PersistentVolume, Op)> {
        let mut backoff = conflict_backoff();
        loop {
            match self.try_ensure_volume(fs, namespace, mode).await {
                Err(err) if err.is_conflict() => match backoff.next_backoff() {
                    Some(delay) => {
                        debug!("Conflict on PersistentVolume ensure, retrying: {}", err);
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(err),
                },
                other => return other,
            }
        }
    }

    /// Ensure the PersistentVolumeClaim for (fs, namespace, mode) exists and
    /// binds the matching volume
    pub async fn ensure_volume_claim(
        &self,
        fs: &LustreFileSystem,
        namespace: &str,
        mode: AccessMode,
    ) -> Result<(PersistentVolumeClaim, Op)> {
        let mut backoff = conflict_backoff();
        loop {
            match self.try_ensure_volume_claim(fs, namespace, mode).await {
                Err(err) if err.is_conflict() => match backoff.next_backoff() {
                    Some(delay) => {
                        debug!("Conflict on PersistentVolumeClaim ensure, retrying: {}", err);
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(err),
                },
                other => return other,
            }
        }
    }

    /// Delete the backing pair, claim first (reverse creation order). Both
    /// deletes are idempotent; a claim failure is surfaced without touching
    /// the volume.
    pub async fn teardown(
        &self,
        fs: &LustreFileSystem,
        namespace: &str,
        mode: AccessMode,
    ) -> Result<()> {
        let claim = fs.volume_claim_name(namespace, mode);
        info!("Deleting PersistentVolumeClaim {}/{}", namespace, claim);
        self.store.delete_volume_claim(namespace, &claim).await?;

        let volume = fs.volume_name(namespace, mode);
        info!("Deleting PersistentVolume {}", volume);
        self.store.delete_volume(&volume).await?;

        Ok(())
    }

    async fn try_ensure_volume(
        &self,
        fs: &LustreFileSystem,
        namespace: &str,
        mode: AccessMode,
    ) -> Result<(PersistentVolume, Op)> {
        let name = fs.volume_name(namespace, mode);
        match self.store.get_volume(&name).await? {
            None => {
                let desired = desired_volume(fs, namespace, mode, None);
                let created = self.store.create_volume(&desired).await?;
                info!("PersistentVolume {}: created", name);
                Ok((created, Op::Created))
            }
            Some(existing) => {
                let desired = desired_volume(fs, namespace, mode, Some(&existing));
                if desired == existing {
                    return Ok((existing, Op::Unchanged));
                }
                let updated = self.store.update_volume(&desired).await?;
                info!("PersistentVolume {}: updated", name);
                Ok((updated, Op::Updated))
            }
        }
    }

    async fn try_ensure_volume_claim(
        &self,
        fs: &LustreFileSystem,
        namespace: &str,
        mode: AccessMode,
    ) -> Result<(PersistentVolumeClaim, Op)> {
        let name = fs.volume_claim_name(namespace, mode);
        match self.store.get_volume_claim(namespace, &name).await? {
            None => {
                let desired = desired_claim(fs, namespace, mode, None);
                let created = self.store.create_volume_claim(&desired).await?;
                info!("PersistentVolumeClaim {}/{}: created", namespace, name);
                Ok((created, Op::Created))
            }
            Some(existing) => {
                let desired = desired_claim(fs, namespace, mode, Some(&existing));
                if desired == existing {
                    return Ok((existing, Op::Unchanged));
                }
                let updated = self.store.update_volume_claim(&desired).await?;
                info!("PersistentVolumeClaim {}/{}: updated", namespace, name);
                Ok((updated, Op::Updated))
            }
        }
    }
}

/// Standard policy for optimistic-concurrency retries against the store
fn conflict_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(50),
        max_interval: Duration::from_secs(1),
        max_elapsed_time: Some(Duration::from_secs(5)),
        ..Default::default()
    }
}

// =============================================================================
// Desired Objects
// =============================================================================

fn desired_volume(
    fs: &LustreFileSystem,
    namespace: &str,
    mode: AccessMode,
    existing: Option<&PersistentVolume>,
) -> PersistentVolume {
    let mut pv = existing.cloned().unwrap_or_default();
    pv.metadata.name = Some(fs.volume_name(namespace, mode));

    let released = pv.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Released");

    let spec = pv.spec.get_or_insert_with(Default::default);
    spec.volume_mode = Some("Filesystem".to_string());
    spec.storage_class_name = Some(fs.spec.storage_class_name.clone());
    spec.access_modes = Some(vec![mode.as_str().to_string()]);
    spec.capacity = Some(BTreeMap::from([(
        "storage".to_string(),
        Quantity(VOLUME_RESOURCE_QUANTITY.to_string()),
    )]));

    // Reserve this volume for the matching claim. If the volume was bound
    // once and its claim is gone (Released), the stale claim UID must be
    // cleared or it can never re-bind to a new claim of the same name.
    let claim_ref = spec.claim_ref.get_or_insert_with(Default::default);
    if released {
        claim_ref.uid = None;
    }
    claim_ref.name = Some(fs.volume_claim_name(namespace, mode));
    claim_ref.namespace = Some(namespace.to_string());

    spec.csi = Some(CSIPersistentVolumeSource {
        driver: CSI_DRIVER_NAME.to_string(),
        fs_type: Some(CSI_FS_TYPE.to_string()),
        volume_handle: fs.volume_handle(),
        ..Default::default()
    });

    pv
}

fn desired_claim(
    fs: &LustreFileSystem,
    namespace: &str,
    mode: AccessMode,
    existing: Option<&PersistentVolumeClaim>,
) -> PersistentVolumeClaim {
    let mut pvc = existing.cloned().unwrap_or_default();
    pvc.metadata.name = Some(fs.volume_claim_name(namespace, mode));
    pvc.metadata.namespace = Some(namespace.to_string());

    let spec = pvc.spec.get_or_insert_with(Default::default);
    spec.storage_class_name = Some(fs.spec.storage_class_name.clone());
    spec.volume_name = Some(fs.volume_name(namespace, mode));
    spec.access_modes = Some(vec![mode.as_str().to_string()]);
    spec.resources = Some(VolumeResourceRequirements {
        requests: Some(BTreeMap::from([(
            "storage".to_string(),
            Quantity(VOLUME_RESOURCE_QUANTITY.to_string()),
        )])),
        ..Default::default()
    });

    pvc
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::LustreFileSystemSpec;
    use crate::store::MemoryStore;
    use k8s_openapi::api::core::v1::PersistentVolumeStatus;

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

    fn provisioner() -> (Arc<MemoryStore>, AccessProvisioner) {
        let store = Arc::new(MemoryStore::new());
        let provisioner = AccessProvisioner::new(store.clone());
        (store, provisioner)
    }

    #[tokio::test]
    async fn test_ensure_volume_programs_the_contract_fields() {
        let (_, provisioner) = provisioner();
        let fs = sample_fs();

        let (pv, op) = provisioner
            .ensure_volume(&fs, "ns1", AccessMode::ReadWriteMany)
            .await
            .unwrap();
        assert_eq!(op, Op::Created);

        assert_eq!(pv.metadata.name.as_deref(), Some("test-ns1-readwritemany-pv"));
        let spec = pv.spec.unwrap();
        assert_eq!(spec.storage_class_name.as_deref(), Some("lustre-fs"));
        assert_eq!(
            spec.access_modes,
            Some(vec!["ReadWriteMany".to_string()])
        );

        let csi = spec.csi.unwrap();
        assert_eq!(csi.driver, CSI_DRIVER_NAME);
        assert_eq!(csi.fs_type.as_deref(), Some(CSI_FS_TYPE));
        assert_eq!(csi.volume_handle, "172.0.0.1@tcp:/test");

        let claim_ref = spec.claim_ref.unwrap();
        assert_eq!(claim_ref.name.as_deref(), Some("test-ns1-readwritemany-pvc"));
        assert_eq!(claim_ref.namespace.as_deref(), Some("ns1"));
    }

    #[tokio::test]
    async fn test_ensure_volume_is_idempotent() {
        let (_, provisioner) = provisioner();
        let fs = sample_fs();

        let (first, op) = provisioner
            .ensure_volume(&fs, "ns1", AccessMode::ReadWriteMany)
            .await
            .unwrap();
        assert_eq!(op, Op::Created);

        let (second, op) = provisioner
            .ensure_volume(&fs, "ns1", AccessMode::ReadWriteMany)
            .await
            .unwrap();
        assert_eq!(op, Op::Unchanged);
        // No write happened: the resource version did not move
        assert_eq!(
            second.metadata.resource_version,
            first.metadata.resource_version
        );
    }

    #[tokio::test]
    async fn test_ensure_claim_binds_the_volume() {
        let (_, provisioner) = provisioner();
        let fs = sample_fs();

        let (pvc, op) = provisioner
            .ensure_volume_claim(&fs, "ns1", AccessMode::ReadWriteMany)
            .await
            .unwrap();
        assert_eq!(op, Op::Created);

        assert_eq!(pvc.metadata.namespace.as_deref(), Some("ns1"));
        let spec = pvc.spec.unwrap();
        assert_eq!(spec.volume_name.as_deref(), Some("test-ns1-readwritemany-pv"));
        assert_eq!(spec.storage_class_name.as_deref(), Some("lustre-fs"));
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteMany".to_string()]));
    }

    #[tokio::test]
    async fn test_released_volume_clears_stale_claim_uid() {
        let (store, provisioner) = provisioner();
        let fs = sample_fs();

        // A volume left over from an earlier bind/unbind cycle
        let mut stale = desired_volume(&fs, "ns1", AccessMode::ReadWriteMany, None);
        if let Some(spec) = stale.spec.as_mut() {
            if let Some(claim_ref) = spec.claim_ref.as_mut() {
                claim_ref.uid = Some("11111111-2222-3333-4444-555555555555".to_string());
            }
        }
        stale.status = Some(PersistentVolumeStatus {
            phase: Some("Released".to_string()),
            ..Default::default()
        });
        store.create_volume(&stale).await.unwrap();

        let (pv, op) = provisioner
            .ensure_volume(&fs, "ns1", AccessMode::ReadWriteMany)
            .await
            .unwrap();
        assert_eq!(op, Op::Updated);
        assert_eq!(pv.spec.unwrap().claim_ref.unwrap().uid, None);
    }

    #[tokio::test]
    async fn test_teardown_removes_both_and_is_idempotent() {
        let (store, provisioner) = provisioner();
        let fs = sample_fs();

        provisioner
            .ensure_volume(&fs, "ns1", AccessMode::ReadWriteMany)
            .await
            .unwrap();
        provisioner
            .ensure_volume_claim(&fs, "ns1", AccessMode::ReadWriteMany)
            .await
            .unwrap();
        assert!(store.volume_exists("test-ns1-readwritemany-pv"));
        assert!(store.claim_exists("ns1", "test-ns1-readwritemany-pvc"));

        provisioner
            .teardown(&fs, "ns1", AccessMode::ReadWriteMany)
            .await
            .unwrap();
        assert!(!store.volume_exists("test-ns1-readwritemany-pv"));
        assert!(!store.claim_exists("ns1", "test-ns1-readwritemany-pvc"));

        // Nothing left; a second teardown is a no-op
        provisioner
            .teardown(&fs, "ns1", AccessMode::ReadWriteMany)
            .await
            .unwrap();
    }
}
