//! Keeps a set of DigitalOcean droplets and block volumes in line with a
//! declared [`Blueprint`] and renders the result as an automation inventory.
//!
//! The moving parts, leaves first: [`naming`] maps `(group, index)` to
//! droplet names and back, [`snapshot`] reads everything the account owns,
//! [`reconciler`] creates, attaches and prunes until the snapshot matches the
//! blueprint, and [`inventory`] projects a snapshot into the output document.

pub mod blueprint;
pub mod config;
pub mod fleet;
pub mod inventory;
pub mod naming;
pub mod provider;
pub mod reconciler;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod testing;

use std::path::PathBuf;
use std::time::Duration;

pub use blueprint::{Blueprint, GroupSpec, VolumeSpec};
pub use config::{Defaults, Settings};
pub use fleet::Fleet;
pub use inventory::Inventory;
pub use naming::HostNaming;
pub use provider::CloudApi;
pub use reconciler::{ReconcileOptions, ReconcileReport, Reconciler};
pub use snapshot::Snapshot;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("digitalocean provider error: {0}")]
    Provider(#[from] do_api::Error),

    #[error("{kind} not found: {name}")]
    ResourceNotFound { kind: &'static str, name: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing env var: {0}")]
    MissingEnv(String),

    #[error("ssh public key {}: {reason}", path.display())]
    SshKey { path: PathBuf, reason: String },

    #[error("reconciliation did not converge within {0:?}")]
    NotConverged(Duration),
}

pub type Result<T> = std::result::Result<T, Error>;
