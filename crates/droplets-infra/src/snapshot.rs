use do_api::{Droplet, Volume};
use tracing::debug;

use crate::Result;
use crate::provider::CloudApi;

/// Everything the account holds at one point in time.
///
/// Taken at the start of a reconciliation pass and on every poll; never
/// kept across passes.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub droplets: Vec<Droplet>,
    pub volumes: Vec<Volume>,
}

impl Snapshot {
    pub async fn take<A: CloudApi + ?Sized>(api: &A) -> Result<Self> {
        let droplets = api.list_droplets().await?;
        let volumes = api.list_volumes().await?;
        debug!(
            droplets = droplets.len(),
            volumes = volumes.len(),
            "snapshot taken"
        );
        Ok(Self { droplets, volumes })
    }

    pub fn droplet_named(&self, name: &str) -> Option<&Droplet> {
        self.droplets.iter().find(|d| d.name == name)
    }
}
