//! Reconciliation Engine
//!
//! Drives the observed status of a LustreFileSystem toward its declared spec.
//! Each pass re-reads all relevant state, so passes are idempotent and safe to
//! repeat; the only cross-pass promise is eventual convergence.
//!
//! Pass order: deletion (finalizer-gated teardown), admission (record the
//! finalizer before any side effect), convergence (provision missing access
//! pairs), pruning (remove at most one entry the spec no longer requests,
//! then requeue).

use std::sync::Arc;

use tracing::{debug, info};

use crate::controlplane::provisioner::AccessProvisioner;
use crate::crd::{
    AccessMode, AccessState, LocalObjectReference, LustreFileSystem,
    LustreFileSystemAccessStatus, LustreFileSystemStatus, FINALIZER,
};
use crate::error::Result;
use crate::store::ResourceStore;

// =============================================================================
// Reconcile Result
// =============================================================================

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Converged, or waiting on an external change that will re-trigger us
    Done,
    /// Made partial progress; run another pass immediately
    Requeue,
}

// =============================================================================
// Reconciliation Engine
// =============================================================================

/// The control loop for LustreFileSystem resources
pub struct ReconciliationEngine {
    store: Arc<dyn ResourceStore>,
    provisioner: AccessProvisioner,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            provisioner: AccessProvisioner::new(store.clone()),
            store,
        }
    }

    /// Run one reconciliation pass for the named resource
    pub async fn reconcile(&self, name: &str) -> Result<ReconcileAction> {
        let Some(fs) = self.store.get_filesystem(name).await? else {
            debug!("LustreFileSystem {} is gone, nothing to reconcile", name);
            return Ok(ReconcileAction::Done);
        };

        if fs.metadata.deletion_timestamp.is_some() {
            return self.finalize(fs).await;
        }

        // The finalizer must be durably recorded before the first provisioning
        // side effect, so a later deletion always has something to clean up.
        // Substantive work waits for the next pass.
        if !fs.has_finalizer() {
            let mut fs = fs;
            fs.metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(FINALIZER.to_string());
            self.store.update_filesystem(&fs).await?;
            info!("LustreFileSystem {}: finalizer added", name);
            return Ok(ReconcileAction::Done);
        }

        self.converge(fs).await
    }

    /// Deletion branch: tear down only once every foreign finalizer is gone,
    /// then drop our own. Removing it is the terminal transition.
    async fn finalize(&self, mut fs: LustreFileSystem) -> Result<ReconcileAction> {
        let name = fs.name().to_string();

        if !fs.has_finalizer() {
            return Ok(ReconcileAction::Done);
        }

        if fs.has_foreign_finalizers() {
            // No requeue: the watch event on the foreign finalizer's removal
            // re-triggers this pass.
            info!(
                "LustreFileSystem {}: deletion blocked on foreign finalizers",
                name
            );
            return Ok(ReconcileAction::Done);
        }

        for (namespace, ns_spec) in &fs.spec.namespaces {
            for mode in &ns_spec.modes {
                self.provisioner.teardown(&fs, namespace, *mode).await?;
            }
        }

        fs.metadata.finalizers = fs.metadata.finalizers.take().map(|finalizers| {
            finalizers.into_iter().filter(|f| f != FINALIZER).collect()
        });
        if fs.finalizers().is_empty() {
            fs.metadata.finalizers = None;
        }
        self.store.update_filesystem(&fs).await?;
        info!("LustreFileSystem {}: teardown complete, finalizer removed", name);

        Ok(ReconcileAction::Done)
    }

    /// Convergence and pruning branches
    async fn converge(&self, fs: LustreFileSystem) -> Result<ReconcileAction> {
        let name = fs.name().to_string();
        let original = fs.status.clone().unwrap_or_default();
        let mut status = original.clone();

        for (namespace, ns_spec) in &fs.spec.namespaces {
            let eligible = self.namespace_eligible(namespace).await?;
            let ns_status = status.namespaces.entry(namespace.clone()).or_default();

            for mode in &ns_spec.modes {
                let entry = ns_status
                    .modes
                    .entry(*mode)
                    .or_insert_with(LustreFileSystemAccessStatus::pending);

                if entry.state == AccessState::Ready {
                    continue;
                }

                if !eligible {
                    debug!(
                        "LustreFileSystem {}: namespace {} not eligible, {} held at Pending",
                        name, namespace, mode
                    );
                    *entry = LustreFileSystemAccessStatus::pending();
                    continue;
                }

                // Volume before claim: the claim binds the volume by name
                let (pv, _) = self.provisioner.ensure_volume(&fs, namespace, *mode).await?;
                let (pvc, _) = self
                    .provisioner
                    .ensure_volume_claim(&fs, namespace, *mode)
                    .await?;

                *entry = LustreFileSystemAccessStatus {
                    state: AccessState::Ready,
                    persistent_volume_ref: pv
                        .metadata
                        .name
                        .map(|name| LocalObjectReference { name }),
                    persistent_volume_claim_ref: pvc
                        .metadata
                        .name
                        .map(|name| LocalObjectReference { name }),
                };
                info!(
                    "LustreFileSystem {}: access {}/{} is ready",
                    name, namespace, mode
                );
            }
        }

        // Prune at most one entry the spec no longer requests, then requeue
        // for the rest. Working one removal at a time on a snapshot keeps the
        // iteration and the shrinking map apart.
        let mut requeue = false;
        if let Some(orphan) = find_orphan(&fs, &status) {
            match orphan {
                Orphan::Mode { namespace, mode } => {
                    self.provisioner.teardown(&fs, &namespace, mode).await?;
                    if let Some(ns_status) = status.namespaces.get_mut(&namespace) {
                        ns_status.modes.remove(&mode);
                    }
                    info!(
                        "LustreFileSystem {}: pruned access {}/{}",
                        name, namespace, mode
                    );
                }
                Orphan::Namespace { namespace } => {
                    status.namespaces.remove(&namespace);
                    info!("LustreFileSystem {}: pruned namespace {}", name, namespace);
                }
            }
            requeue = true;
        }

        if status != original {
            let mut updated = fs;
            updated.status = Some(status);
            self.store.update_filesystem_status(&updated).await?;
        }

        Ok(if requeue {
            ReconcileAction::Requeue
        } else {
            ReconcileAction::Done
        })
    }

    /// An unknown or not-yet-Active namespace is not an error, just not
    /// eligible yet; the change router re-enqueues us when it turns Active.
    async fn namespace_eligible(&self, namespace: &str) -> Result<bool> {
        Ok(self
            .store
            .get_namespace(namespace)
            .await?
            .and_then(|ns| ns.status)
            .and_then(|status| status.phase)
            .map(|phase| phase == "Active")
            .unwrap_or(false))
    }
}

// =============================================================================
// Orphan Detection
// =============================================================================

enum Orphan {
    /// A (namespace, mode) status entry with no spec counterpart
    Mode { namespace: String, mode: AccessMode },
    /// A namespace status key whose modes are gone and whose spec entry is too
    Namespace { namespace: String },
}

fn find_orphan(fs: &LustreFileSystem, status: &LustreFileSystemStatus) -> Option<Orphan> {
    for (namespace, ns_status) in &status.namespaces {
        for mode in ns_status.modes.keys() {
            if !fs.mode_requested(namespace, *mode) {
                return Some(Orphan::Mode {
                    namespace: namespace.clone(),
                    mode: *mode,
                });
            }
        }

        if !fs.spec.namespaces.contains_key(namespace) && ns_status.modes.is_empty() {
            return Some(Orphan::Namespace {
                namespace: namespace.clone(),
            });
        }
    }
    None
}

// =============================================================================
// Tests
// =============================================================================
