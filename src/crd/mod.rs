//! Custom Resource Definitions for the Lustre Access Operator
//!
//! Two served versions of the same resource:
//! - [`lustre_filesystem`]: v1beta1, the hub (storage) version
//! - [`v1alpha1`]: the legacy spoke version, bridged by [`crate::conversion`]

pub mod lustre_filesystem;
pub mod v1alpha1;

pub use lustre_filesystem::*;
