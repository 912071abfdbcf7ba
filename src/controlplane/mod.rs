//! Control plane for Lustre access management
//!
//! The reconciliation engine converges observed access state with the
//! declared spec, the provisioner manages the backing volume pairs, the
//! router fans namespace events back out to filesystems, and the worker wires
//! it all to the cluster watch streams.

pub mod engine;
pub mod provisioner;
pub mod router;
pub mod worker;

pub use engine::{ReconcileAction, ReconciliationEngine};
pub use provisioner::{AccessProvisioner, Op};
pub use router::ChangeRouter;
pub use worker::run_controller;
