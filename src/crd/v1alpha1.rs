//! LustreFileSystem CRD (v1alpha1)
//!
//! The spoke (legacy) version of the LustreFileSystem resource. It predates
//! per-namespace access management: the MGS NIDs are a single comma-joined
//! string and there is no namespaces map. Objects served through this version
//! carry hub-only data in the conversion annotation; see [`crate::conversion`].

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of a v1alpha1 LustreFileSystem
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.billyronks.io",
    version = "v1alpha1",
    kind = "LustreFileSystem",
    plural = "lustrefilesystems",
    shortname = "lus",
    status = "LustreFileSystemStatus",
    printcolumn = r#"{"name": "FsName", "type": "string", "jsonPath": ".spec.name"}"#,
    printcolumn = r#"{"name": "MgsNids", "type": "string", "jsonPath": ".spec.mgsNids"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LustreFileSystemSpec {
    /// Name of the Lustre file system (fsname), at most 8 characters
    pub name: String,

    /// NIDs of the MGS as a single comma-joined string, in connection order
    pub mgs_nids: String,

    /// Mount path used to access the file system from a host
    pub mount_root: String,

    /// StorageClass programmed into the provisioned volumes
    #[serde(default = "default_storage_class_name")]
    pub storage_class_name: String,
}

/// Observed state of a v1alpha1 LustreFileSystem.
/// The legacy schema reported nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LustreFileSystemStatus {}

fn default_storage_class_name() -> String {
    "lustre-fs".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_storage_class_applied() {
        let spec: LustreFileSystemSpec = serde_json::from_value(serde_json::json!({
            "name": "test",
            "mgsNids": "172.0.0.1@tcp",
            "mountRoot": "/lus/test"
        }))
        .unwrap();

        assert_eq!(spec.storage_class_name, "lustre-fs");
    }
}
