//! Schema conversion between LustreFileSystem versions
//!
//! v1beta1 is the hub: every other version converts to and from it, never
//! directly to another spoke. Hub-only data survives a round trip through the
//! spoke schema via a single well-known annotation written on down-conversion
//! and consumed on the next up-conversion. A hub-native object never carries
//! that annotation.
//!
//! The conversion webhook transport lives outside this crate; it dispatches
//! through [`ConversionRegistry`], built once at startup.

use std::collections::BTreeMap;

use kube::core::ObjectList;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crd::v1alpha1;
use crate::crd::{LustreFileSystem, LustreFileSystemSpec, LustreFileSystemStatus};
use crate::error::{Error, Result};

// =============================================================================
// Conversion Annotation
// =============================================================================

/// Annotation holding hub-only data on a spoke object. Exactly one such key,
/// never more; the payload is opaque to everything but this module.
pub const DATA_ANNOTATION: &str = "storage.billyronks.io/conversion-data";

/// Snapshot of the hub fields that have no spoke representation. Identity and
/// the rest of the object metadata are deliberately excluded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversionData {
    spec: LustreFileSystemSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<LustreFileSystemStatus>,
}

// =============================================================================
// v1alpha1 <-> v1beta1
// =============================================================================

/// Convert a spoke object to the hub version.
///
/// Performs the structural mapping (splitting the comma-joined NID string back
/// into the NID list), then restores hub-only fields from the conversion
/// annotation when one is present. A missing annotation is a first-time
/// conversion, not an error; a malformed one is rejected outright, since
/// accepting it would corrupt the round-trip guarantee.
pub fn to_hub(spoke: &v1alpha1::LustreFileSystem) -> Result<LustreFileSystem> {
    let name = spoke.metadata.name.as_deref().unwrap_or("unknown");
    debug!("Converting LustreFileSystem {} to hub", name);

    let mut metadata = spoke.metadata.clone();
    let restored = match take_annotation(&mut metadata.annotations) {
        Some(payload) => {
            let data: ConversionData =
                serde_json::from_str(&payload).map_err(|err| Error::MalformedConversionData {
                    name: name.to_string(),
                    reason: err.to_string(),
                })?;
            Some(data)
        }
        None => None,
    };

    let mut spec = LustreFileSystemSpec {
        name: spoke.spec.name.clone(),
        mgs_nids: split_nids(&spoke.spec.mgs_nids),
        mount_root: spoke.spec.mount_root.clone(),
        storage_class_name: spoke.spec.storage_class_name.clone(),
        namespaces: BTreeMap::new(),
    };

    let mut status = None;
    if let Some(data) = restored {
        spec.namespaces = data.spec.namespaces;
        status = data.status;
    }

    Ok(LustreFileSystem {
        metadata,
        spec,
        status,
    })
}

/// Convert a hub object to the spoke version.
///
/// Performs the inverse structural mapping (joining the NID list into the
/// single string field) and stashes every hub field the spoke cannot express
/// into the conversion annotation on the result.
pub fn from_hub(hub: &LustreFileSystem) -> Result<v1alpha1::LustreFileSystem> {
    let name = hub.metadata.name.as_deref().unwrap_or("unknown");
    debug!("Converting LustreFileSystem {} from hub", name);

    let data = ConversionData {
        spec: hub.spec.clone(),
        status: hub.status.clone(),
    };
    let payload = serde_json::to_string(&data)?;

    let mut metadata = hub.metadata.clone();
    metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(DATA_ANNOTATION.to_string(), payload);

    Ok(v1alpha1::LustreFileSystem {
        metadata,
        spec: v1alpha1::LustreFileSystemSpec {
            name: hub.spec.name.clone(),
            mgs_nids: hub.spec.mgs_nids.join(","),
            mount_root: hub.spec.mount_root.clone(),
            storage_class_name: hub.spec.storage_class_name.clone(),
        },
        status: None,
    })
}

/// Remove the conversion annotation, dropping the map entirely once empty so
/// a converted hub object carries zero conversion annotations.
fn take_annotation(annotations: &mut Option<BTreeMap<String, String>>) -> Option<String> {
    let map = annotations.as_mut()?;
    let payload = map.remove(DATA_ANNOTATION);
    if map.is_empty() {
        *annotations = None;
    }
    payload
}

fn split_nids(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|nid| !nid.is_empty())
        .map(String::from)
        .collect()
}

// =============================================================================
// List Conversions
// =============================================================================

// The conversion webhook only ever converts single objects. The list paths
// exist so callers get a typed rejection instead of an untested half-feature.

/// Unsupported; lists are never converted.
pub fn list_to_hub(
    _list: &ObjectList<v1alpha1::LustreFileSystem>,
) -> Result<ObjectList<LustreFileSystem>> {
    Err(method_not_supported("to_hub"))
}

/// Unsupported; lists are never converted.
pub fn list_from_hub(
    _list: &ObjectList<LustreFileSystem>,
) -> Result<ObjectList<v1alpha1::LustreFileSystem>> {
    Err(method_not_supported("from_hub"))
}

fn method_not_supported(method: &str) -> Error {
    Error::ConversionNotSupported {
        kind: "LustreFileSystemList".to_string(),
        method: method.to_string(),
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Codec entry point over raw JSON, the form a webhook request arrives in
pub type CodecFn = fn(&serde_json::Value) -> Result<serde_json::Value>;

/// Paired up/down converters for one spoke version
#[derive(Clone, Copy)]
pub struct CodecPair {
    pub to_hub: CodecFn,
    pub from_hub: CodecFn,
}

/// Registry mapping an API version tag to its codec pair. Built once at
/// startup and handed to the webhook wiring; versions without an entry
/// (the hub itself) need no conversion.
pub struct ConversionRegistry {
    codecs: BTreeMap<String, CodecPair>,
}

impl ConversionRegistry {
    pub fn new() -> Self {
        let mut codecs = BTreeMap::new();
        codecs.insert(
            "v1alpha1".to_string(),
            CodecPair {
                to_hub: value_to_hub,
                from_hub: value_from_hub,
            },
        );
        Self { codecs }
    }

    /// Look up the codec pair for a spoke version tag
    pub fn codec(&self, version: &str) -> Option<&CodecPair> {
        self.codecs.get(version)
    }

    /// Version tags with a registered codec
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.codecs.keys().map(String::as_str)
    }
}

impl Default for ConversionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn value_to_hub(value: &serde_json::Value) -> Result<serde_json::Value> {
    let spoke: v1alpha1::LustreFileSystem = serde_json::from_value(value.clone())?;
    Ok(serde_json::to_value(to_hub(&spoke)?)?)
}

fn value_from_hub(value: &serde_json::Value) -> Result<serde_json::Value> {
    let hub: LustreFileSystem = serde_json::from_value(value.clone())?;
    Ok(serde_json::to_value(from_hub(&hub)?)?)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        AccessMode, AccessState, LocalObjectReference, LustreFileSystemAccessStatus,
        LustreFileSystemNamespaceSpec, LustreFileSystemNamespaceStatus,
    };
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn sample_hub() -> LustreFileSystem {
        let mut fs = LustreFileSystem::new(
            "lustre-fs-example",
            LustreFileSystemSpec {
                name: "test".into(),
                mgs_nids: vec!["172.0.0.1@tcp".into(), "172.0.0.2@tcp".into()],
                mount_root: "/lus/test".into(),
                storage_class_name: "lustre-fs".into(),
                namespaces: BTreeMap::from([(
                    "ns1".to_string(),
                    LustreFileSystemNamespaceSpec {
                        modes: vec![AccessMode::ReadWriteMany],
                    },
                )]),
            },
        );
        fs.status = Some(LustreFileSystemStatus {
            namespaces: BTreeMap::from([(
                "ns1".to_string(),
                LustreFileSystemNamespaceStatus {
                    modes: BTreeMap::from([(
                        AccessMode::ReadWriteMany,
                        LustreFileSystemAccessStatus {
                            state: AccessState::Ready,
                            persistent_volume_ref: Some(LocalObjectReference {
                                name: "test-ns1-readwritemany-pv".into(),
                            }),
                            persistent_volume_claim_ref: Some(LocalObjectReference {
                                name: "test-ns1-readwritemany-pvc".into(),
                            }),
                        },
                    )]),
                },
            )]),
        });
        fs
    }

    #[test]
    fn test_down_conversion_writes_exactly_one_annotation() {
        let hub = sample_hub();
        let spoke = from_hub(&hub).unwrap();

        let annotations = spoke.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations.len(), 1);
        assert!(annotations.contains_key(DATA_ANNOTATION));
        assert_eq!(spoke.spec.mgs_nids, "172.0.0.1@tcp,172.0.0.2@tcp");
    }

    #[test]
    fn test_up_conversion_consumes_annotation() {
        let hub = sample_hub();
        let restored = to_hub(&from_hub(&hub).unwrap()).unwrap();

        // The hub object must come back annotation-free
        assert_eq!(restored.metadata.annotations, None);
        assert_eq!(restored.spec, hub.spec);
        assert_eq!(restored.status, hub.status);
    }

    #[test]
    fn test_up_conversion_without_annotation_is_first_time() {
        // A natively created spoke object has no conversion data yet
        let spoke = v1alpha1::LustreFileSystem::new(
            "fresh",
            v1alpha1::LustreFileSystemSpec {
                name: "w0".into(),
                mgs_nids: "172.0.0.0@tcp".into(),
                mount_root: "/lus/w0".into(),
                storage_class_name: "lustre-fs".into(),
            },
        );

        let hub = to_hub(&spoke).unwrap();
        assert_eq!(hub.spec.mgs_nids, vec!["172.0.0.0@tcp".to_string()]);
        assert!(hub.spec.namespaces.is_empty());
        assert_eq!(hub.status, None);
    }

    #[test]
    fn test_foreign_annotations_survive_both_directions() {
        let mut hub = sample_hub();
        hub.metadata.annotations = Some(BTreeMap::from([(
            "team.example.com/owner".to_string(),
            "hpc".to_string(),
        )]));

        let spoke = from_hub(&hub).unwrap();
        assert_eq!(spoke.metadata.annotations.as_ref().unwrap().len(), 2);

        let restored = to_hub(&spoke).unwrap();
        let annotations = restored.metadata.annotations.unwrap();
        assert_eq!(annotations.len(), 1);
        assert!(annotations.contains_key("team.example.com/owner"));
    }

    #[test]
    fn test_malformed_annotation_rejected() {
        let mut spoke = from_hub(&sample_hub()).unwrap();
        spoke
            .metadata
            .annotations
            .as_mut()
            .unwrap()
            .insert(DATA_ANNOTATION.to_string(), "{not json".to_string());

        assert_matches!(
            to_hub(&spoke),
            Err(Error::MalformedConversionData { .. })
        );
    }

    fn empty_list<T: Clone + serde::de::DeserializeOwned>(version: &str) -> ObjectList<T> {
        serde_json::from_value(serde_json::json!({
            "apiVersion": format!("storage.billyronks.io/{version}"),
            "kind": "LustreFileSystemList",
            "metadata": {},
            "items": []
        }))
        .unwrap()
    }

    #[test]
    fn test_list_conversions_unsupported() {
        let list = empty_list::<LustreFileSystem>("v1beta1");
        assert_matches!(
            list_from_hub(&list),
            Err(Error::ConversionNotSupported { ref kind, .. }) if kind == "LustreFileSystemList"
        );

        let list = empty_list::<v1alpha1::LustreFileSystem>("v1alpha1");
        assert_matches!(
            list_to_hub(&list),
            Err(Error::ConversionNotSupported { ref kind, .. }) if kind == "LustreFileSystemList"
        );
    }

    #[test]
    fn test_registry_dispatch() {
        let registry = ConversionRegistry::new();
        assert!(registry.codec("v1beta1").is_none());

        let codec = registry.codec("v1alpha1").expect("v1alpha1 registered");
        let hub_value = serde_json::to_value(sample_hub()).unwrap();
        let spoke_value = (codec.from_hub)(&hub_value).unwrap();
        let restored = (codec.to_hub)(&spoke_value).unwrap();

        let restored: LustreFileSystem = serde_json::from_value(restored).unwrap();
        assert_eq!(restored.spec, sample_hub().spec);
    }

    // =========================================================================
    // Round-trip fuzzing
    // =========================================================================

    fn access_mode_strategy() -> impl Strategy<Value = AccessMode> {
        prop_oneof![
            Just(AccessMode::ReadWriteOnce),
            Just(AccessMode::ReadOnlyMany),
            Just(AccessMode::ReadWriteMany),
        ]
    }

    fn access_status_strategy() -> impl Strategy<Value = LustreFileSystemAccessStatus> {
        (
            prop_oneof![Just(AccessState::Pending), Just(AccessState::Ready)],
            proptest::option::of("[a-z0-9-]{1,20}"),
            proptest::option::of("[a-z0-9-]{1,20}"),
        )
            .prop_map(|(state, pv, pvc)| LustreFileSystemAccessStatus {
                state,
                persistent_volume_ref: pv.map(|name| LocalObjectReference { name }),
                persistent_volume_claim_ref: pvc.map(|name| LocalObjectReference { name }),
            })
    }

    fn hub_strategy() -> impl Strategy<Value = LustreFileSystem> {
        let namespaces = proptest::collection::btree_map(
            "[a-z][a-z0-9-]{0,10}",
            proptest::collection::vec(access_mode_strategy(), 0..3)
                .prop_map(|modes| LustreFileSystemNamespaceSpec { modes }),
            0..4,
        );
        let status = proptest::option::of(proptest::collection::btree_map(
            "[a-z][a-z0-9-]{0,10}",
            proptest::collection::btree_map(access_mode_strategy(), access_status_strategy(), 0..3)
                .prop_map(|modes| LustreFileSystemNamespaceStatus { modes }),
            0..4,
        ));

        (
            "[a-z][a-z0-9]{0,7}",
            proptest::collection::vec("[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}@(tcp|o2ib)[0-9]{0,2}", 1..4),
            "/lus/[a-z]{1,8}",
            "[a-z][a-z0-9-]{0,16}",
            namespaces,
            status,
        )
            .prop_map(|(name, mgs_nids, mount_root, storage_class_name, namespaces, status)| {
                let mut fs = LustreFileSystem::new(
                    "fuzz",
                    LustreFileSystemSpec {
                        name,
                        mgs_nids,
                        mount_root,
                        storage_class_name,
                        namespaces,
                    },
                );
                fs.status = status.map(|namespaces| LustreFileSystemStatus { namespaces });
                fs
            })
    }

    proptest! {
        // to_hub(from_hub(h)) must reproduce h exactly; this is the guarantee
        // the annotation protocol exists for.
        #[test]
        fn round_trip_preserves_hub_fields(hub in hub_strategy()) {
            let restored = to_hub(&from_hub(&hub).unwrap()).unwrap();

            prop_assert_eq!(&restored.spec, &hub.spec);
            prop_assert_eq!(&restored.status, &hub.status);
            prop_assert_eq!(&restored.metadata.annotations, &None);
        }
    }
}
