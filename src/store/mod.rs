//! Resource store port and adapters
//!
//! The engine, provisioner and router consume the object store through this
//! narrow trait instead of a process-wide client. The live adapter is
//! [`KubeStore`]; [`MemoryStore`] provides the same semantics in-process,
//! including optimistic-concurrency conflicts, and backs the test suite.

pub mod kube;
pub mod memory;

pub use self::kube::KubeStore;
pub use self::memory::MemoryStore;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, PersistentVolume, PersistentVolumeClaim};

use crate::crd::LustreFileSystem;
use crate::error::Result;

/// Narrow interface over the object store.
///
/// Update calls carry the caller's resource version and fail with
/// [`crate::error::Error::Conflict`] when it is stale; the caller re-reads and
/// retries rather than overwriting. Deletes are idempotent: deleting an
/// object that is already gone succeeds.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    // -- LustreFileSystem ----------------------------------------------------

    async fn get_filesystem(&self, name: &str) -> Result<Option<LustreFileSystem>>;

    async fn list_filesystems(&self) -> Result<Vec<LustreFileSystem>>;

    /// Replace the main resource (metadata and spec; status is ignored)
    async fn update_filesystem(&self, fs: &LustreFileSystem) -> Result<LustreFileSystem>;

    /// Replace the status subresource only
    async fn update_filesystem_status(&self, fs: &LustreFileSystem) -> Result<LustreFileSystem>;

    // -- Namespace -----------------------------------------------------------

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    // -- PersistentVolume ----------------------------------------------------

    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>>;

    async fn create_volume(&self, pv: &PersistentVolume) -> Result<PersistentVolume>;

    async fn update_volume(&self, pv: &PersistentVolume) -> Result<PersistentVolume>;

    async fn delete_volume(&self, name: &str) -> Result<()>;

    // -- PersistentVolumeClaim -----------------------------------------------

    async fn get_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>>;

    async fn create_volume_claim(
        &self,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim>;

    async fn update_volume_claim(
        &self,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim>;

    async fn delete_volume_claim(&self, namespace: &str, name: &str) -> Result<()>;
}
