//! Lustre Access Operator
//!
//! A Kubernetes operator that exposes externally managed Lustre file systems
//! to cluster workloads. For every (namespace, access mode) pair declared on
//! a LustreFileSystem resource, the operator keeps a PersistentVolume and
//! PersistentVolumeClaim pair provisioned, linked, and cleaned up.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Lustre Access Operator                     │
//! ├──────────────────────────────────────────────────────────────────┤
//! │   ┌────────────────┐     ┌────────────────┐                      │
//! │   │ LustreFileSystem│    │   Namespace    │                      │
//! │   │     watch      │     │     watch      │                      │
//! │   └───────┬────────┘     └───────┬────────┘                      │
//! │           │                      │  ChangeRouter fan-out          │
//! │           └──────────┬───────────┘                               │
//! │                      │                                           │
//! │              ┌───────┴────────┐      ┌─────────────────────┐     │
//! │              │   Work Queue   │─────▶│ ReconciliationEngine│     │
//! │              └────────────────┘      └──────────┬──────────┘     │
//! │                                                 │                │
//! │                                      ┌──────────┴──────────┐     │
//! │                                      │  AccessProvisioner  │     │
//! │                                      │     (PV / PVC)      │     │
//! │                                      └──────────┬──────────┘     │
//! ├─────────────────────────────────────────────────┼────────────────┤
//! │                      ResourceStore (kube / in-memory)            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The v1alpha1 schema is bridged to the v1beta1 hub by [`conversion`], which
//! preserves hub-only data across a down/up round trip.
//!
//! # Modules
//!
//! - [`controlplane`]: Reconciliation engine, provisioner, router, wiring
//! - [`conversion`]: Hub/spoke schema conversion and version registry
//! - [`crd`]: Custom Resource Definitions
//! - [`store`]: Resource store port and adapters
//! - [`error`]: Error types and handling

pub mod controlplane;
pub mod conversion;
pub mod crd;
pub mod error;
pub mod store;

// Re-export commonly used types
pub use controlplane::{
    AccessProvisioner, ChangeRouter, Op, ReconcileAction, ReconciliationEngine, run_controller,
};

pub use conversion::{ConversionRegistry, DATA_ANNOTATION};

pub use crd::{
    volume_claim_name, volume_name, AccessMode, AccessState, LustreFileSystem,
    LustreFileSystemAccessStatus, LustreFileSystemNamespaceSpec, LustreFileSystemNamespaceStatus,
    LustreFileSystemSpec, LustreFileSystemStatus, FINALIZER,
};

pub use error::{Error, ErrorAction, Result};

pub use store::{KubeStore, MemoryStore, ResourceStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
