//! LustreFileSystem CRD (v1beta1)
//!
//! The hub (storage) version of the LustreFileSystem resource. A cluster-scoped
//! object describing an externally managed Lustre file system and the
//! namespaces that request access to it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Constants
// =============================================================================

/// API group for all operator resources
pub const API_GROUP: &str = "storage.billyronks.io";

/// Finalizer owned by the reconciliation engine
pub const FINALIZER: &str = "storage.billyronks.io/lustre-access";

/// CSI driver that mounts the provisioned volumes.
/// Compatibility contract with the out-of-tree driver; must not change.
pub const CSI_DRIVER_NAME: &str = "lustre.csi.billyronks.io";

/// Filesystem type tag passed to the CSI driver
pub const CSI_FS_TYPE: &str = "lustre";

/// Capacity programmed into both the PersistentVolume and the
/// PersistentVolumeClaim. The schema requires a non-zero quantity, but the
/// real capacity is governed by the backing file system, not by this value.
pub const VOLUME_RESOURCE_QUANTITY: &str = "1";

// =============================================================================
// LustreFileSystem CRD
// =============================================================================

/// LustreFileSystem describes an external Lustre file system and the
/// per-namespace access requested to it. For every (namespace, mode) pair in
/// the spec, the operator maintains a PersistentVolume/PersistentVolumeClaim
/// pair that exposes the file system to workloads in that namespace.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.billyronks.io",
    version = "v1beta1",
    kind = "LustreFileSystem",
    plural = "lustrefilesystems",
    shortname = "lus",
    status = "LustreFileSystemStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name": "FsName", "type": "string", "jsonPath": ".spec.name"}"#,
    printcolumn = r#"{"name": "MgsNid", "type": "string", "jsonPath": ".spec.mgsNids[0]"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    printcolumn = r#"{"name": "MountRoot", "type": "string", "priority": 1, "jsonPath": ".spec.mountRoot"}"#,
    printcolumn = r#"{"name": "StorageClass", "type": "string", "priority": 1, "jsonPath": ".spec.storageClassName"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LustreFileSystemSpec {
    /// Name of the Lustre file system (fsname), at most 8 characters.
    /// Immutable after creation; enforced by the admission gate.
    pub name: String,

    /// NIDs of the MGS, in connection order. Combined with `name` to form the
    /// volume handle handed to the CSI driver. Immutable after creation.
    pub mgs_nids: Vec<String>,

    /// Mount path used to access the file system from a host.
    /// Immutable after creation.
    pub mount_root: String,

    /// StorageClass programmed into the provisioned volumes
    #[serde(default = "default_storage_class_name")]
    pub storage_class_name: String,

    /// Access requests, keyed by namespace name
    #[serde(default)]
    pub namespaces: BTreeMap<String, LustreFileSystemNamespaceSpec>,
}

/// Access modes requested by a single namespace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LustreFileSystemNamespaceSpec {
    /// Requested access modes
    #[serde(default)]
    pub modes: Vec<AccessMode>,
}

// =============================================================================
// Access Modes
// =============================================================================

/// Volume access mode, spelled the way the core/v1 API spells it
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
}

impl AccessMode {
    /// The core/v1 string for this mode
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadWriteOnce => "ReadWriteOnce",
            AccessMode::ReadOnlyMany => "ReadOnlyMany",
            AccessMode::ReadWriteMany => "ReadWriteMany",
        }
    }

    /// Lowercased form used in object names
    pub fn name_segment(&self) -> &'static str {
        match self {
            AccessMode::ReadWriteOnce => "readwriteonce",
            AccessMode::ReadOnlyMany => "readonlymany",
            AccessMode::ReadWriteMany => "readwritemany",
        }
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Status
// =============================================================================

/// Observed state of a LustreFileSystem
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LustreFileSystemStatus {
    /// Per-namespace access status, keyed by namespace name.
    /// Owned exclusively by the reconciliation engine.
    #[serde(default)]
    pub namespaces: BTreeMap<String, LustreFileSystemNamespaceStatus>,
}

/// Access status for a single namespace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LustreFileSystemNamespaceStatus {
    /// Status per requested access mode
    #[serde(default)]
    pub modes: BTreeMap<AccessMode, LustreFileSystemAccessStatus>,
}

/// Status of one (namespace, mode) access pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LustreFileSystemAccessStatus {
    /// Provisioning state of the backing volume pair
    pub state: AccessState,

    /// Name of the provisioned PersistentVolume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_ref: Option<LocalObjectReference>,

    /// Name of the provisioned PersistentVolumeClaim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim_ref: Option<LocalObjectReference>,
}

impl LustreFileSystemAccessStatus {
    /// A fresh entry, waiting for its namespace to become eligible
    pub fn pending() -> Self {
        Self {
            state: AccessState::Pending,
            persistent_volume_ref: None,
            persistent_volume_claim_ref: None,
        }
    }
}

/// Provisioning state of an access pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum AccessState {
    /// Backing objects not yet provisioned
    #[default]
    Pending,
    /// Backing objects exist and are linked
    Ready,
}

impl std::fmt::Display for AccessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessState::Pending => write!(f, "Pending"),
            AccessState::Ready => write!(f, "Ready"),
        }
    }
}

/// Reference to an object by name, in a context that fixes the rest of its
/// identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectReference {
    pub name: String,
}

// =============================================================================
// Deterministic Naming
// =============================================================================

// These are upgrade contracts: live clusters carry objects named by previous
// operator releases, and the names must keep resolving.

/// Name of the PersistentVolume backing a (filesystem, namespace, mode) triple
pub fn volume_name(fs_name: &str, namespace: &str, mode: AccessMode) -> String {
    format!("{}-{}-{}-pv", fs_name, namespace, mode.name_segment())
}

/// Name of the PersistentVolumeClaim backing a (filesystem, namespace, mode)
/// triple
pub fn volume_claim_name(fs_name: &str, namespace: &str, mode: AccessMode) -> String {
    format!("{}-{}-{}-pvc", fs_name, namespace, mode.name_segment())
}

// =============================================================================
// Implementations
// =============================================================================

fn default_storage_class_name() -> String {
    "lustre-fs".to_string()
}

impl LustreFileSystem {
    /// Get the object name
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// PersistentVolume name for a namespace and mode of this file system
    pub fn volume_name(&self, namespace: &str, mode: AccessMode) -> String {
        volume_name(&self.spec.name, namespace, mode)
    }

    /// PersistentVolumeClaim name for a namespace and mode of this file system
    pub fn volume_claim_name(&self, namespace: &str, mode: AccessMode) -> String {
        volume_claim_name(&self.spec.name, namespace, mode)
    }

    /// Volume handle consumed by the CSI driver at mount time:
    /// `<comma-joined NIDs>:/<fsname>`
    pub fn volume_handle(&self) -> String {
        format!("{}:/{}", self.spec.mgs_nids.join(","), self.spec.name)
    }

    /// Finalizer list, empty if none
    pub fn finalizers(&self) -> &[String] {
        self.metadata.finalizers.as_deref().unwrap_or(&[])
    }

    /// Whether the engine's own finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == FINALIZER)
    }

    /// Whether any finalizer owned by another controller remains
    pub fn has_foreign_finalizers(&self) -> bool {
        self.finalizers().iter().any(|f| f != FINALIZER)
    }

    /// Whether the spec requests the given (namespace, mode) pair
    pub fn mode_requested(&self, namespace: &str, mode: AccessMode) -> bool {
        self.spec
            .namespaces
            .get(namespace)
            .map(|ns| ns.modes.contains(&mode))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_is_stable() {
        assert_eq!(
            volume_name("test", "ns1", AccessMode::ReadWriteMany),
            "test-ns1-readwritemany-pv"
        );
        assert_eq!(
            volume_claim_name("test", "ns1", AccessMode::ReadWriteMany),
            "test-ns1-readwritemany-pvc"
        );
        assert_eq!(
            volume_name("w0", "default", AccessMode::ReadOnlyMany),
            "w0-default-readonlymany-pv"
        );
    }

    #[test]
    fn test_volume_handle_format() {
        let fs = LustreFileSystem::new(
            "lustre-fs-example",
            LustreFileSystemSpec {
                name: "test".into(),
                mgs_nids: vec!["172.0.0.1@tcp".into(), "172.0.0.2@tcp".into()],
                mount_root: "/lus/test".into(),
                storage_class_name: default_storage_class_name(),
                namespaces: BTreeMap::new(),
            },
        );

        assert_eq!(fs.volume_handle(), "172.0.0.1@tcp,172.0.0.2@tcp:/test");
    }

    #[test]
    fn test_access_mode_serializes_like_core_v1() {
        let json = serde_json::to_string(&AccessMode::ReadWriteMany).unwrap();
        assert_eq!(json, r#""ReadWriteMany""#);

        let mode: AccessMode = serde_json::from_str(r#""ReadOnlyMany""#).unwrap();
        assert_eq!(mode, AccessMode::ReadOnlyMany);
    }

    #[test]
    fn test_status_map_keys_round_trip() {
        let mut status = LustreFileSystemStatus::default();
        status.namespaces.insert(
            "ns1".into(),
            LustreFileSystemNamespaceStatus {
                modes: BTreeMap::from([(
                    AccessMode::ReadWriteMany,
                    LustreFileSystemAccessStatus::pending(),
                )]),
            },
        );

        let json = serde_json::to_value(&status).unwrap();
        assert!(json["namespaces"]["ns1"]["modes"]["ReadWriteMany"].is_object());

        let parsed: LustreFileSystemStatus = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, status);
    }

    #[test]
    fn test_default_storage_class_applied() {
        let spec: LustreFileSystemSpec = serde_json::from_value(serde_json::json!({
            "name": "test",
            "mgsNids": ["172.0.0.1@tcp"],
            "mountRoot": "/lus/test"
        }))
        .unwrap();

        assert_eq!(spec.storage_class_name, "lustre-fs");
        assert!(spec.namespaces.is_empty());
    }

    #[test]
    fn test_finalizer_helpers() {
        let mut fs = LustreFileSystem::new(
            "fs",
            LustreFileSystemSpec {
                name: "test".into(),
                mgs_nids: vec!["172.0.0.1@tcp".into()],
                mount_root: "/lus/test".into(),
                storage_class_name: default_storage_class_name(),
                namespaces: BTreeMap::new(),
            },
        );

        assert!(!fs.has_finalizer());
        assert!(!fs.has_foreign_finalizers());

        fs.metadata.finalizers = Some(vec![FINALIZER.to_string(), "other/finalizer".to_string()]);
        assert!(fs.has_finalizer());
        assert!(fs.has_foreign_finalizers());

        fs.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        assert!(!fs.has_foreign_finalizers());
    }
}
