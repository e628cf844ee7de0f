use async_trait::async_trait;
use do_api::{
    CreateDropletRequest, CreateSshKeyRequest, CreateVolumeRequest, DoClient, Droplet, Image,
    SshKey, Volume,
};

use crate::Result;

/// The provider operations the reconciler needs.
///
/// Listing calls return every page; mutating calls block through the
/// provider's "not ready" answers and surface any other failure as
/// [`crate::Error::Provider`].
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn list_droplets(&self) -> Result<Vec<Droplet>>;

    async fn create_droplet(&self, req: &CreateDropletRequest) -> Result<Droplet>;

    async fn delete_droplet(&self, droplet_id: u64) -> Result<()>;

    async fn list_volumes(&self) -> Result<Vec<Volume>>;

    async fn create_volume(&self, req: &CreateVolumeRequest) -> Result<Volume>;

    async fn attach_volume(&self, volume_id: &str, droplet_id: u64) -> Result<()>;

    async fn list_images(&self) -> Result<Vec<Image>>;

    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>>;

    async fn create_ssh_key(&self, req: &CreateSshKeyRequest) -> Result<SshKey>;
}

#[async_trait]
impl CloudApi for DoClient {
    async fn list_droplets(&self) -> Result<Vec<Droplet>> {
        Ok(DoClient::list_droplets(self).await?)
    }

    async fn create_droplet(&self, req: &CreateDropletRequest) -> Result<Droplet> {
        Ok(DoClient::create_droplet(self, req).await?)
    }

    async fn delete_droplet(&self, droplet_id: u64) -> Result<()> {
        Ok(DoClient::delete_droplet(self, droplet_id).await?)
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>> {
        Ok(DoClient::list_volumes(self).await?)
    }

    async fn create_volume(&self, req: &CreateVolumeRequest) -> Result<Volume> {
        Ok(DoClient::create_volume(self, req).await?)
    }

    async fn attach_volume(&self, volume_id: &str, droplet_id: u64) -> Result<()> {
        Ok(DoClient::attach_volume(self, volume_id, droplet_id).await?)
    }

    async fn list_images(&self) -> Result<Vec<Image>> {
        Ok(DoClient::list_images(self).await?)
    }

    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>> {
        Ok(DoClient::list_ssh_keys(self).await?)
    }

    async fn create_ssh_key(&self, req: &CreateSshKeyRequest) -> Result<SshKey> {
        Ok(DoClient::create_ssh_key(self, req).await?)
    }
}
