use do_api::DoClient;
use tokio::sync::OnceCell;
use tracing::info;

use crate::blueprint::Blueprint;
use crate::config::Settings;
use crate::inventory::Inventory;
use crate::naming::HostNaming;
use crate::provider::CloudApi;
use crate::reconciler::{self, ReconcileReport, Reconciler};
use crate::snapshot::Snapshot;
use crate::{Error, Result};

/// Group name that addresses every declared group in [`Fleet::destroy_group`].
pub const ALL_GROUPS: &str = "all";

/// One account, one blueprint.
///
/// The inventory is computed at most once per fleet from a read-only
/// snapshot; [`Fleet::reconcile`] swaps in the converged one and
/// [`Fleet::destroy_group`] drops it so the next read re-lists.
pub struct Fleet<A: CloudApi = DoClient> {
    api: A,
    settings: Settings,
    blueprint: Blueprint,
    naming: HostNaming,
    inventory: OnceCell<Inventory>,
}

impl Fleet<DoClient> {
    pub fn connect(settings: Settings, blueprint: Blueprint) -> Result<Self> {
        let mut api = DoClient::new(settings.token.clone()).with_retry(settings.retry.clone());
        if let Some(url) = &settings.api_url {
            api = api.with_base_url(url.trim_end_matches('/'));
        }
        Self::new(api, settings, blueprint)
    }
}

impl<A: CloudApi> Fleet<A> {
    pub fn new(api: A, settings: Settings, blueprint: Blueprint) -> Result<Self> {
        let naming = HostNaming::new(settings.prefix.clone())?;
        blueprint.validate_with(&naming)?;
        Ok(Self {
            api,
            settings,
            blueprint,
            naming,
            inventory: OnceCell::new(),
        })
    }

    /// Current inventory, without changing anything on the account.
    pub async fn inventory(&self) -> Result<&Inventory> {
        self.inventory
            .get_or_try_init(|| async {
                let snapshot = Snapshot::take(&self.api).await?;
                Ok::<_, Error>(Inventory::materialize(
                    &self.blueprint,
                    &self.naming,
                    &snapshot,
                    &self.settings.token,
                ))
            })
            .await
    }

    /// Converge the account on the blueprint and keep the resulting inventory.
    pub async fn reconcile(&mut self) -> Result<ReconcileReport> {
        let (inventory, report) = Reconciler::new(&self.api, &self.settings, &self.blueprint)?
            .run()
            .await?;
        self.inventory = OnceCell::from(inventory);
        Ok(report)
    }

    /// Delete every droplet of a declared group, or of every declared group
    /// for [`ALL_GROUPS`].
    pub async fn destroy_group(&mut self, group: &str) -> Result<Vec<String>> {
        let groups: Vec<String> = if group == ALL_GROUPS {
            self.blueprint.groups().map(|(g, _)| g.to_string()).collect()
        } else if self.blueprint.contains(group) {
            vec![group.to_string()]
        } else {
            return Err(Error::Config(format!("group {group:?} is not in the blueprint")));
        };

        let mut deleted = Vec::new();
        for group in &groups {
            deleted.extend(reconciler::destroy_group(&self.api, &self.naming, group).await?);
        }
        info!(group, deleted = deleted.len(), "group destroyed");

        self.inventory = OnceCell::new();
        Ok(deleted)
    }

    /// Every image slug the account can boot, sorted. Images without a slug
    /// (private snapshots) are left out.
    pub async fn image_slugs(&self) -> Result<Vec<String>> {
        let mut slugs: Vec<String> = self
            .api
            .list_images()
            .await?
            .into_iter()
            .filter_map(|image| image.slug)
            .collect();
        slugs.sort();
        slugs.dedup();
        Ok(slugs)
    }
}
