//! Kubernetes-backed resource store
//!
//! Thin adapter from [`ResourceStore`] onto typed `kube` APIs. The only logic
//! here is error mapping: apiserver 404/409 responses become the operator's
//! NotFound/Conflict/Exists taxonomy so callers never match on HTTP codes.

use k8s_openapi::api::core::v1::{Namespace, PersistentVolume, PersistentVolumeClaim};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;

use super::ResourceStore;
use crate::crd::LustreFileSystem;
use crate::error::{Error, Result};

/// Resource store backed by the cluster apiserver
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn filesystems(&self) -> Api<LustreFileSystem> {
        Api::all(self.client.clone())
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    fn volumes(&self) -> Api<PersistentVolume> {
        Api::all(self.client.clone())
    }

    fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map an apiserver write failure into the operator taxonomy
fn map_write_err(err: kube::Error, kind: &str, name: &str) -> Error {
    match &err {
        kube::Error::Api(resp) if resp.reason == "AlreadyExists" => Error::ResourceExists {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 => Error::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 404 => Error::ResourceNotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        _ => Error::Kube(err),
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

fn object_name(meta: &kube::core::ObjectMeta, kind: &str) -> Result<String> {
    meta.name
        .clone()
        .ok_or_else(|| Error::Internal(format!("{kind} object has no name")))
}

#[async_trait::async_trait]
impl ResourceStore for KubeStore {
    async fn get_filesystem(&self, name: &str) -> Result<Option<LustreFileSystem>> {
        Ok(self.filesystems().get_opt(name).await?)
    }

    async fn list_filesystems(&self) -> Result<Vec<LustreFileSystem>> {
        let list = self.filesystems().list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn update_filesystem(&self, fs: &LustreFileSystem) -> Result<LustreFileSystem> {
        let name = object_name(&fs.metadata, "LustreFileSystem")?;
        self.filesystems()
            .replace(&name, &PostParams::default(), fs)
            .await
            .map_err(|err| map_write_err(err, "LustreFileSystem", &name))
    }

    async fn update_filesystem_status(&self, fs: &LustreFileSystem) -> Result<LustreFileSystem> {
        let name = object_name(&fs.metadata, "LustreFileSystem")?;
        self.filesystems()
            .replace_status(&name, &PostParams::default(), serde_json::to_vec(fs)?)
            .await
            .map_err(|err| map_write_err(err, "LustreFileSystem", &name))
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        Ok(self.namespaces().get_opt(name).await?)
    }

    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>> {
        Ok(self.volumes().get_opt(name).await?)
    }

    async fn create_volume(&self, pv: &PersistentVolume) -> Result<PersistentVolume> {
        let name = object_name(&pv.metadata, "PersistentVolume")?;
        self.volumes()
            .create(&PostParams::default(), pv)
            .await
            .map_err(|err| map_write_err(err, "PersistentVolume", &name))
    }

    async fn update_volume(&self, pv: &PersistentVolume) -> Result<PersistentVolume> {
        let name = object_name(&pv.metadata, "PersistentVolume")?;
        self.volumes()
            .replace(&name, &PostParams::default(), pv)
            .await
            .map_err(|err| map_write_err(err, "PersistentVolume", &name))
    }

    async fn delete_volume(&self, name: &str) -> Result<()> {
        match self.volumes().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(Error::Kube(err)),
        }
    }

    async fn get_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>> {
        Ok(self.claims(namespace).get_opt(name).await?)
    }

    async fn create_volume_claim(
        &self,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        let name = object_name(&pvc.metadata, "PersistentVolumeClaim")?;
        let namespace = pvc.metadata.namespace.clone().unwrap_or_default();
        self.claims(&namespace)
            .create(&PostParams::default(), pvc)
            .await
            .map_err(|err| map_write_err(err, "PersistentVolumeClaim", &name))
    }

    async fn update_volume_claim(
        &self,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        let name = object_name(&pvc.metadata, "PersistentVolumeClaim")?;
        let namespace = pvc.metadata.namespace.clone().unwrap_or_default();
        self.claims(&namespace)
            .replace(&name, &PostParams::default(), pvc)
            .await
            .map_err(|err| map_write_err(err, "PersistentVolumeClaim", &name))
    }

    async fn delete_volume_claim(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .claims(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(Error::Kube(err)),
        }
    }
}
