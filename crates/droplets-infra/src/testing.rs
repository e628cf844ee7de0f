//! In-memory provider for reconciler tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use do_api::{
    CreateDropletRequest, CreateSshKeyRequest, CreateVolumeRequest, Droplet, DropletStatus, Image,
    NetworkType, NetworkV4, Networks, RegionRef, RetryPolicy, SshKey, StatusCode, Volume,
};

use crate::config::{Defaults, Settings};
use crate::provider::CloudApi;
use crate::reconciler::ReconcileOptions;
use crate::{Error, Result};

/// A droplet with public address `203.0.113.<id>`.
pub(crate) fn droplet(id: u64, name: &str, status: DropletStatus) -> Droplet {
    Droplet {
        id,
        name: name.to_string(),
        status,
        region: RegionRef {
            slug: "nyc3".into(),
            name: "New York 3".into(),
        },
        networks: Networks {
            v4: vec![NetworkV4 {
                ip_address: format!("203.0.113.{id}"),
                netmask: Some("255.255.255.0".into()),
                gateway: None,
                kind: NetworkType::Public,
            }],
            v6: Vec::new(),
        },
        size_slug: Some("512mb".into()),
        created_at: None,
    }
}

/// Settings pointing at a throwaway public key, polling fast.
pub(crate) fn settings(dir: &Path, prefix: &str) -> Settings {
    let key = dir.join("id_rsa.pub");
    std::fs::write(&key, "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQC7 ops@example\n").unwrap();
    Settings {
        token: "test-token".into(),
        api_url: None,
        prefix: prefix.into(),
        defaults: Defaults::default(),
        ssh_public_key: key,
        retry: RetryPolicy::default(),
        reconcile: ReconcileOptions {
            poll_interval: Duration::from_millis(1),
            deadline: None,
        },
    }
}

/// Mutating calls, as recorded by [`MemoryCloud`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    CreateDroplet { name: String, image: u64, region: String, size: String },
    DeleteDroplet(String),
    CreateVolume { name: String, region: String, size: u32 },
    AttachVolume { volume: String, droplet: String },
    CreateSshKey(String),
}

#[derive(Default)]
struct State {
    droplets: Vec<Droplet>,
    volumes: Vec<Volume>,
    images: Vec<Image>,
    keys: Vec<SshKey>,
    next_id: u64,
    calls: Vec<Call>,
    listings: HashMap<u64, u32>,
    stuck: bool,
    fail_creates: Option<StatusCode>,
}

/// Eventually consistent fake account: a new droplet reports `new` on the
/// first two listings after its creation and `active` from then on.
pub(crate) struct MemoryCloud {
    state: Mutex<State>,
}

impl MemoryCloud {
    pub(crate) fn new() -> Self {
        let state = State {
            images: vec![
                Image {
                    id: 1001,
                    slug: Some("ubuntu-16-04-x64".into()),
                    name: "16.04 x64".into(),
                    distribution: Some("Ubuntu".into()),
                },
                Image {
                    id: 1002,
                    slug: Some("debian-12-x64".into()),
                    name: "12 x64".into(),
                    distribution: Some("Debian".into()),
                },
                Image {
                    id: 1003,
                    slug: None,
                    name: "my snapshot".into(),
                    distribution: None,
                },
            ],
            next_id: 100,
            ..State::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn next_id(state: &mut State) -> u64 {
        state.next_id += 1;
        state.next_id
    }

    pub(crate) fn with_droplet(self, name: &str, status: DropletStatus) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let id = Self::next_id(&mut state);
            state.droplets.push(droplet(id, name, status));
        }
        self
    }

    /// A volume, optionally attached to the named droplet.
    pub(crate) fn with_volume(self, name: &str, attached_to: Option<&str>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let droplet_ids = attached_to
                .and_then(|n| state.droplets.iter().find(|d| d.name == n))
                .map(|d| vec![d.id])
                .unwrap_or_default();
            let id = Self::next_id(&mut state);
            state.volumes.push(Volume {
                id: format!("vol-{id}"),
                name: name.to_string(),
                droplet_ids,
                size_gigabytes: 10,
                region: RegionRef::default(),
            });
        }
        self
    }

    pub(crate) fn with_ssh_key(self, name: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let id = Self::next_id(&mut state);
            state.keys.push(SshKey {
                id,
                name: name.to_string(),
                fingerprint: String::new(),
                public_key: String::new(),
            });
        }
        self
    }

    /// Droplets never leave their current status.
    pub(crate) fn stuck(self) -> Self {
        self.state.lock().unwrap().stuck = true;
        self
    }

    pub(crate) fn failing_creates(self, status: StatusCode) -> Self {
        self.state.lock().unwrap().fail_creates = Some(status);
        self
    }

    pub(crate) fn mutations(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn clear_mutations(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub(crate) fn droplet_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .droplets
            .iter()
            .map(|d| d.name.clone())
            .collect();
        names.sort();
        names
    }

    pub(crate) fn volume(&self, name: &str) -> Option<Volume> {
        self.state
            .lock()
            .unwrap()
            .volumes
            .iter()
            .find(|v| v.name == name)
            .cloned()
    }

    pub(crate) fn droplet_id(&self, name: &str) -> Option<u64> {
        self.state
            .lock()
            .unwrap()
            .droplets
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.id)
    }
}

#[async_trait]
impl CloudApi for MemoryCloud {
    async fn list_droplets(&self) -> Result<Vec<Droplet>> {
        let mut state = self.state.lock().unwrap();
        let listed = state.droplets.clone();
        if !state.stuck {
            let State {
                droplets, listings, ..
            } = &mut *state;
            for droplet in droplets.iter_mut().filter(|d| d.status == DropletStatus::New) {
                let seen = listings.entry(droplet.id).or_default();
                *seen += 1;
                if *seen >= 2 {
                    droplet.status = DropletStatus::Active;
                }
            }
        }
        Ok(listed)
    }

    async fn create_droplet(&self, req: &CreateDropletRequest) -> Result<Droplet> {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.fail_creates {
            return Err(Error::Provider(do_api::Error::Api {
                endpoint: "create droplet",
                status,
                body: r#"{"id":"unprocessable","message":"size unavailable"}"#.into(),
            }));
        }
        state.calls.push(Call::CreateDroplet {
            name: req.name.clone(),
            image: req.image,
            region: req.region.clone(),
            size: req.size.clone(),
        });
        let id = Self::next_id(&mut state);
        let created = droplet(id, &req.name, DropletStatus::New);
        state.droplets.push(created.clone());
        Ok(created)
    }

    async fn delete_droplet(&self, droplet_id: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.droplets.iter().position(|d| d.id == droplet_id) {
            let removed = state.droplets.remove(pos);
            state.calls.push(Call::DeleteDroplet(removed.name));
        }
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>> {
        Ok(self.state.lock().unwrap().volumes.clone())
    }

    async fn create_volume(&self, req: &CreateVolumeRequest) -> Result<Volume> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::CreateVolume {
            name: req.name.clone(),
            region: req.region.clone(),
            size: req.size_gigabytes,
        });
        let id = Self::next_id(&mut state);
        let volume = Volume {
            id: format!("vol-{id}"),
            name: req.name.clone(),
            droplet_ids: Vec::new(),
            size_gigabytes: req.size_gigabytes,
            region: RegionRef {
                slug: req.region.clone(),
                name: String::new(),
            },
        };
        state.volumes.push(volume.clone());
        Ok(volume)
    }

    async fn attach_volume(&self, volume_id: &str, droplet_id: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let droplet = state
            .droplets
            .iter()
            .find(|d| d.id == droplet_id)
            .map(|d| d.name.clone())
            .unwrap_or_default();
        let Some(volume) = state.volumes.iter_mut().find(|v| v.id == volume_id) else {
            return Ok(());
        };
        volume.droplet_ids = vec![droplet_id];
        let volume = volume.name.clone();
        state.calls.push(Call::AttachVolume { volume, droplet });
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<Image>> {
        Ok(self.state.lock().unwrap().images.clone())
    }

    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>> {
        Ok(self.state.lock().unwrap().keys.clone())
    }

    async fn create_ssh_key(&self, req: &CreateSshKeyRequest) -> Result<SshKey> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::CreateSshKey(req.name.clone()));
        let id = Self::next_id(&mut state);
        let key = SshKey {
            id,
            name: req.name.clone(),
            fingerprint: String::new(),
            public_key: req.public_key.clone(),
        };
        state.keys.push(key.clone());
        Ok(key)
    }
}
