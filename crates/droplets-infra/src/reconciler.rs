//! Drives the account towards the blueprint.
//!
//! One pass walks `Diffing → Creating → Pruning → Polling → Converged`.
//! Any provider error other than "not ready" ends the pass immediately; no
//! rollback is attempted because every resource is keyed by its name, so
//! running the pass again picks up where the failed one stopped.

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use do_api::{CreateDropletRequest, CreateSshKeyRequest, CreateVolumeRequest, Droplet, Image, Volume};
use tracing::{debug, error, info};

use crate::blueprint::{Blueprint, GroupSpec};
use crate::config::Settings;
use crate::inventory::Inventory;
use crate::naming::HostNaming;
use crate::provider::CloudApi;
use crate::snapshot::Snapshot;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Pause between convergence checks.
    pub poll_interval: Duration,
    /// Give up polling after this long. `None` polls until the provider
    /// converges, which may be never.
    pub deadline: Option<Duration>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Diffing,
    Creating,
    Pruning,
    Polling,
    Converged,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Diffing => "diffing",
            Self::Creating => "creating",
            Self::Pruning => "pruning",
            Self::Polling => "polling",
            Self::Converged => "converged",
            Self::Failed => "failed",
        })
    }
}

/// What a pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created_droplets: Vec<String>,
    pub created_volumes: Vec<String>,
    /// `(volume, droplet)` pairs.
    pub attached_volumes: Vec<(String, String)>,
    pub deleted_droplets: Vec<String>,
    pub poll_rounds: u32,
}

impl ReconcileReport {
    /// Nothing was created, attached or deleted.
    pub fn is_noop(&self) -> bool {
        self.created_droplets.is_empty()
            && self.created_volumes.is_empty()
            && self.attached_volumes.is_empty()
            && self.deleted_droplets.is_empty()
    }
}

/// One expected replica and the droplet currently holding its name, if any.
#[derive(Debug)]
pub struct Slot<'s> {
    pub group: &'s str,
    pub index: u32,
    pub name: String,
    pub spec: &'s GroupSpec,
    pub existing: Option<&'s Droplet>,
}

/// Every replica the blueprint asks for, groups in blueprint order and
/// indices ascending.
pub fn diff<'s>(blueprint: &'s Blueprint, naming: &HostNaming, snapshot: &'s Snapshot) -> Vec<Slot<'s>> {
    blueprint
        .groups()
        .flat_map(|(group, spec)| {
            (0..spec.count).map(move |index| {
                let name = naming.name(group, index);
                let existing = snapshot.droplet_named(&name);
                Slot {
                    group,
                    index,
                    name,
                    spec,
                    existing,
                }
            })
        })
        .collect()
}

/// Owned droplets of a still-declared group whose index is past its count.
///
/// Droplets of groups missing from the blueprint are never selected.
pub fn extra_droplets<'d>(
    blueprint: &Blueprint,
    naming: &HostNaming,
    droplets: &'d [Droplet],
) -> Vec<&'d Droplet> {
    droplets
        .iter()
        .filter(|droplet| match naming.parse(&droplet.name) {
            Some((group, index)) => blueprint.get(group).is_some_and(|spec| index >= spec.count),
            None => false,
        })
        .collect()
}

/// Volume listing reused across a pass until a volume is created.
#[derive(Debug, Default)]
pub struct VolumeCache {
    volumes: Option<Vec<Volume>>,
}

impl VolumeCache {
    pub fn seeded(volumes: Vec<Volume>) -> Self {
        Self {
            volumes: Some(volumes),
        }
    }

    pub async fn get<A: CloudApi + ?Sized>(&mut self, api: &A) -> Result<&[Volume]> {
        let volumes = match self.volumes.take() {
            Some(volumes) => volumes,
            None => api.list_volumes().await?,
        };
        Ok(self.volumes.insert(volumes).as_slice())
    }

    /// Force the next `get` to re-list; a fresh volume is missing from any
    /// listing taken before it was created.
    pub fn invalidate(&mut self) {
        self.volumes = None;
    }

    /// Reflect an attach made after the listing was taken.
    pub fn record_attachment(&mut self, volume_id: &str, droplet_id: u64) {
        if let Some(volume) = self.volumes.iter_mut().flatten().find(|v| v.id == volume_id) {
            volume.droplet_ids = vec![droplet_id];
        }
    }
}

pub struct Reconciler<'a, A: CloudApi + ?Sized> {
    api: &'a A,
    settings: &'a Settings,
    blueprint: &'a Blueprint,
    naming: HostNaming,
    phase: Phase,
    volumes: VolumeCache,
    images: Option<Vec<Image>>,
    ssh_key_id: Option<u64>,
    report: ReconcileReport,
}

impl<'a, A: CloudApi + ?Sized> Reconciler<'a, A> {
    pub fn new(api: &'a A, settings: &'a Settings, blueprint: &'a Blueprint) -> Result<Self> {
        let naming = HostNaming::new(settings.prefix.clone())?;
        blueprint.validate_with(&naming)?;
        Ok(Self {
            api,
            settings,
            blueprint,
            naming,
            phase: Phase::Diffing,
            volumes: VolumeCache::default(),
            images: None,
            ssh_key_id: None,
            report: ReconcileReport::default(),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = %self.phase, to = %phase, "reconcile phase");
        self.phase = phase;
    }

    /// Run one pass to convergence.
    ///
    /// Without a deadline in the options this only returns once the
    /// provider reports every replica active, or on a hard error, which
    /// leaves the reconciler in [`Phase::Failed`].
    pub async fn run(&mut self) -> Result<(Inventory, ReconcileReport)> {
        match self.drive().await {
            Ok(inventory) => Ok((inventory, std::mem::take(&mut self.report))),
            Err(err) => {
                error!(phase = %self.phase, error = %err, "reconcile failed");
                self.enter(Phase::Failed);
                Err(err)
            }
        }
    }

    async fn drive(&mut self) -> Result<Inventory> {
        let started = Instant::now();
        let blueprint = self.blueprint;

        self.enter(Phase::Diffing);
        let snapshot = Snapshot::take(self.api).await?;
        let slots = diff(blueprint, &self.naming, &snapshot);
        let missing = slots.iter().filter(|s| s.existing.is_none()).count();
        info!(expected = slots.len(), missing, "diff computed");
        self.volumes = VolumeCache::seeded(snapshot.volumes.clone());

        self.enter(Phase::Creating);
        for slot in &slots {
            let droplet = match slot.existing {
                Some(droplet) => droplet.clone(),
                None => self.create_droplet(&slot.name, slot.spec).await?,
            };
            // A block volume attaches to a single droplet: the group's first replica.
            if slot.index == 0 {
                self.ensure_volumes(slot.spec, &droplet).await?;
            }
        }

        self.enter(Phase::Pruning);
        self.prune().await?;

        self.enter(Phase::Polling);
        loop {
            let snapshot = Snapshot::take(self.api).await?;
            let inventory =
                Inventory::materialize(blueprint, &self.naming, &snapshot, &self.settings.token);
            self.report.poll_rounds += 1;

            if inventory.is_converged(blueprint) {
                self.enter(Phase::Converged);
                info!(
                    created = self.report.created_droplets.len(),
                    deleted = self.report.deleted_droplets.len(),
                    polls = self.report.poll_rounds,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "reconciled"
                );
                return Ok(inventory);
            }

            if let Some(deadline) = self.settings.reconcile.deadline
                && started.elapsed() >= deadline
            {
                return Err(Error::NotConverged(deadline));
            }

            debug!(
                round = self.report.poll_rounds,
                hosts = inventory.meta.hostvars.len(),
                "not converged yet"
            );
            tokio::time::sleep(self.settings.reconcile.poll_interval).await;
        }
    }

    async fn create_droplet(&mut self, name: &str, spec: &GroupSpec) -> Result<Droplet> {
        let settings = self.settings;
        let defaults = &settings.defaults;
        let slug = spec.image_or(defaults);
        let image = self.image_id(slug).await?;
        let ssh_key = self.ssh_key_id().await?;

        let req = CreateDropletRequest {
            name: name.to_string(),
            region: spec.region_or(defaults).to_string(),
            size: spec.size_or(defaults).to_string(),
            image,
            ssh_keys: vec![ssh_key],
        };
        info!(name, image = slug, size = %req.size, region = %req.region, "creating droplet");

        let droplet = self.api.create_droplet(&req).await?;
        info!(name, droplet_id = droplet.id, "droplet created");
        self.report.created_droplets.push(name.to_string());
        Ok(droplet)
    }

    async fn image_id(&mut self, slug: &str) -> Result<u64> {
        let images = match self.images.take() {
            Some(images) => images,
            None => self.api.list_images().await?,
        };
        let images = self.images.insert(images);

        images
            .iter()
            .find(|image| image.slug.as_deref() == Some(slug))
            .map(|image| image.id)
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "image",
                name: slug.to_string(),
            })
    }

    /// Id of the local public key on the account, uploading it if needed.
    async fn ssh_key_id(&mut self) -> Result<u64> {
        if let Some(id) = self.ssh_key_id {
            return Ok(id);
        }

        let (name, public_key) = read_public_key(&self.settings.ssh_public_key).await?;
        let existing = self
            .api
            .list_ssh_keys()
            .await?
            .into_iter()
            .find(|key| key.name == name);

        let key = match existing {
            Some(key) => key,
            None => {
                info!(name = %name, "uploading ssh key");
                self.api
                    .create_ssh_key(&CreateSshKeyRequest { name, public_key })
                    .await?
            }
        };

        self.ssh_key_id = Some(key.id);
        Ok(key.id)
    }

    async fn ensure_volumes(&mut self, spec: &GroupSpec, droplet: &Droplet) -> Result<()> {
        let settings = self.settings;
        let defaults = &settings.defaults;

        for (label, volume_spec) in &spec.volumes {
            let name = self.naming.volume_name(label);
            let existing = self
                .volumes
                .get(self.api)
                .await?
                .iter()
                .find(|v| v.name == name)
                .cloned();

            let volume = match existing {
                Some(volume) => volume,
                None => {
                    let req = CreateVolumeRequest {
                        name: name.clone(),
                        region: volume_spec.region_or(spec, defaults).to_string(),
                        size_gigabytes: volume_spec.size,
                    };
                    info!(name = %name, size_gb = req.size_gigabytes, region = %req.region, "creating volume");
                    let volume = self.api.create_volume(&req).await?;
                    self.volumes.invalidate();
                    self.report.created_volumes.push(name.clone());
                    volume
                }
            };

            if !volume.is_attached_to(droplet.id) {
                info!(volume = %name, droplet = %droplet.name, "attaching volume");
                self.api.attach_volume(&volume.id, droplet.id).await?;
                self.volumes.record_attachment(&volume.id, droplet.id);
                self.report
                    .attached_volumes
                    .push((name, droplet.name.clone()));
            }
        }
        Ok(())
    }

    async fn prune(&mut self) -> Result<()> {
        let droplets = self.api.list_droplets().await?;
        for droplet in extra_droplets(self.blueprint, &self.naming, &droplets) {
            info!(name = %droplet.name, droplet_id = droplet.id, "destroying extra droplet");
            self.api.delete_droplet(droplet.id).await?;
            self.report.deleted_droplets.push(droplet.name.clone());
        }
        Ok(())
    }
}

/// Delete every owned droplet of `group`, whatever its index. Returns the
/// names deleted, in listing order.
pub async fn destroy_group<A: CloudApi + ?Sized>(
    api: &A,
    naming: &HostNaming,
    group: &str,
) -> Result<Vec<String>> {
    let droplets = api.list_droplets().await?;
    let mut deleted = Vec::new();
    for droplet in &droplets {
        if naming.parse(&droplet.name).is_some_and(|(g, _)| g == group) {
            info!(name = %droplet.name, droplet_id = droplet.id, "destroying droplet");
            api.delete_droplet(droplet.id).await?;
            deleted.push(droplet.name.clone());
        }
    }
    Ok(deleted)
}

/// `(key name, key material)` from an OpenSSH public key file.
///
/// The key is registered under its trailing comment, usually `user@host`.
async fn read_public_key(path: &Path) -> Result<(String, String)> {
    let material = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::SshKey {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let fields: Vec<&str> = material.split_whitespace().collect();
    match fields.as_slice() {
        [_, _, .., comment] => Ok((comment.to_string(), material.trim().to_string())),
        _ => Err(Error::SshKey {
            path: path.to_path_buf(),
            reason: "expected `<type> <key> <comment>`".into(),
        }),
    }
}
