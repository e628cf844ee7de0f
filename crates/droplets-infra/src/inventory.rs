//! Inventory document consumed by configuration management.
//!
//! Serializes as
//! `{ <group>: {hosts, vars}, _meta: {hostvars: {addr: {instance}}}, all: {vars} }`.

use std::collections::BTreeMap;

use do_api::{Droplet, DropletStatus};
use serde::Serialize;

use crate::blueprint::Blueprint;
use crate::naming::HostNaming;
use crate::snapshot::Snapshot;

/// Global var carrying the API credential for downstream tooling.
pub const TOKEN_VAR: &str = "do_api_token";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inventory {
    #[serde(flatten)]
    pub groups: BTreeMap<String, GroupInventory>,
    #[serde(rename = "_meta")]
    pub meta: Meta,
    pub all: AllVars,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupInventory {
    pub hosts: Vec<String>,
    pub vars: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Meta {
    pub hostvars: BTreeMap<String, HostVars>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostVars {
    pub instance: Droplet,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AllVars {
    pub vars: BTreeMap<String, String>,
}

impl Inventory {
    /// Project a snapshot onto the blueprint. Pure; mutates neither.
    ///
    /// A replica shows up once its droplet exists and has a public IPv4
    /// address; the first public address wins.
    pub fn materialize(
        blueprint: &Blueprint,
        naming: &HostNaming,
        snapshot: &Snapshot,
        token: &str,
    ) -> Self {
        let mut groups = BTreeMap::new();
        let mut hostvars = BTreeMap::new();

        for (group, spec) in blueprint.groups() {
            let mut hosts = Vec::new();
            for index in 0..spec.count {
                let Some(droplet) = snapshot.droplet_named(&naming.name(group, index)) else {
                    continue;
                };
                let Some(address) = droplet.public_ipv4() else {
                    continue;
                };
                hosts.push(address.to_string());
                hostvars.insert(
                    address.to_string(),
                    HostVars {
                        instance: droplet.clone(),
                    },
                );
            }

            groups.insert(
                group.to_string(),
                GroupInventory {
                    hosts,
                    vars: spec.inventory_vars(),
                },
            );
        }

        Self {
            groups,
            meta: Meta { hostvars },
            all: AllVars {
                vars: BTreeMap::from([(TOKEN_VAR.to_string(), token.to_string())]),
            },
        }
    }

    /// Every listed droplet is active and every group has its full count.
    pub fn is_converged(&self, blueprint: &Blueprint) -> bool {
        let all_active = self
            .meta
            .hostvars
            .values()
            .all(|h| h.instance.status == DropletStatus::Active);

        all_active
            && blueprint.groups().all(|(group, spec)| {
                self.hosts(group).map(<[String]>::len) == Some(spec.count as usize)
            })
    }

    pub fn hosts(&self, group: &str) -> Option<&[String]> {
        self.groups.get(group).map(|g| g.hosts.as_slice())
    }

    /// Hosts of every group, in group order.
    pub fn all_hosts(&self) -> impl Iterator<Item = &str> {
        self.groups
            .values()
            .flat_map(|g| g.hosts.iter().map(String::as_str))
    }

    /// `group: host host` lines for people.
    pub fn human_lines(&self) -> Vec<String> {
        self.groups
            .iter()
            .map(|(group, g)| format!("{group}: {}", g.hosts.join(" ")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use do_api::{NetworkType, NetworkV4};
    use serde_json::json;

    use super::*;
    use crate::blueprint::GroupSpec;
    use crate::testing::droplet;

    fn blueprint() -> Blueprint {
        Blueprint::from_yaml("web:\n  count: 2\n  size: 1gb\ndb:\n  volumes:\n    data:\n      size: 20\n")
            .unwrap()
    }

    #[test]
    fn lists_present_hosts_per_group() {
        let naming = HostNaming::new("").unwrap();
        let snapshot = Snapshot {
            droplets: vec![
                droplet(1, "web00", DropletStatus::Active),
                droplet(2, "web01", DropletStatus::New),
                droplet(3, "db00", DropletStatus::Active),
                droplet(4, "web02", DropletStatus::Active),
            ],
            volumes: Vec::new(),
        };

        let inventory = Inventory::materialize(&blueprint(), &naming, &snapshot, "secret");

        assert_eq!(inventory.hosts("web").unwrap(), ["203.0.113.1", "203.0.113.2"]);
        assert_eq!(inventory.hosts("db").unwrap(), ["203.0.113.3"]);
        assert_eq!(inventory.meta.hostvars.len(), 3);
        assert_eq!(inventory.meta.hostvars["203.0.113.3"].instance.name, "db00");
        assert_eq!(inventory.groups["web"].vars["size"], "1gb");
        assert!(inventory.groups["db"].vars.is_empty());
        assert!(!inventory.is_converged(&blueprint()));
    }

    #[test]
    fn first_public_address_is_used() {
        let naming = HostNaming::new("").unwrap();
        let mut web = droplet(1, "web00", DropletStatus::Active);
        web.networks.v4 = vec![
            NetworkV4 {
                ip_address: "10.0.0.5".into(),
                netmask: None,
                gateway: None,
                kind: NetworkType::Private,
            },
            NetworkV4 {
                ip_address: "198.51.100.7".into(),
                netmask: None,
                gateway: None,
                kind: NetworkType::Public,
            },
            NetworkV4 {
                ip_address: "198.51.100.8".into(),
                netmask: None,
                gateway: None,
                kind: NetworkType::Public,
            },
        ];
        let snapshot = Snapshot {
            droplets: vec![web],
            volumes: Vec::new(),
        };
        let blueprint = Blueprint::new().with_group("web", GroupSpec::replicas(1));

        let inventory = Inventory::materialize(&blueprint, &naming, &snapshot, "t");
        assert_eq!(inventory.hosts("web").unwrap(), ["198.51.100.7"]);
    }

    #[test]
    fn droplets_without_public_address_are_not_hosts() {
        let naming = HostNaming::new("").unwrap();
        let mut web = droplet(1, "web00", DropletStatus::New);
        web.networks.v4.clear();
        let snapshot = Snapshot {
            droplets: vec![web],
            volumes: Vec::new(),
        };
        let blueprint = Blueprint::new().with_group("web", GroupSpec::replicas(1));

        let inventory = Inventory::materialize(&blueprint, &naming, &snapshot, "t");
        assert_eq!(inventory.hosts("web").unwrap(), Vec::<String>::new());
        assert!(inventory.meta.hostvars.is_empty());
        assert!(!inventory.is_converged(&blueprint));
    }

    #[test]
    fn converged_when_counts_match_and_all_active() {
        let naming = HostNaming::new("").unwrap();
        let snapshot = Snapshot {
            droplets: vec![
                droplet(1, "web00", DropletStatus::Active),
                droplet(2, "web01", DropletStatus::Active),
                droplet(3, "db00", DropletStatus::Active),
            ],
            volumes: Vec::new(),
        };
        let inventory = Inventory::materialize(&blueprint(), &naming, &snapshot, "t");
        assert!(inventory.is_converged(&blueprint()));

        let empty = Blueprint::new().with_group("web", GroupSpec::replicas(0));
        let inventory = Inventory::materialize(&empty, &naming, &snapshot, "t");
        assert!(inventory.is_converged(&empty));
        assert!(inventory.meta.hostvars.is_empty());
    }

    #[test]
    fn serializes_reserved_keys() {
        let naming = HostNaming::new("").unwrap();
        let snapshot = Snapshot {
            droplets: vec![droplet(3, "db00", DropletStatus::Active)],
            volumes: Vec::new(),
        };
        let blueprint = Blueprint::new().with_group("db", GroupSpec::replicas(1));
        let inventory = Inventory::materialize(&blueprint, &naming, &snapshot, "secret");

        let value = serde_json::to_value(&inventory).unwrap();
        assert_eq!(value["db"], json!({ "hosts": ["203.0.113.3"], "vars": {} }));
        assert_eq!(value["all"], json!({ "vars": { "do_api_token": "secret" } }));
        assert_eq!(value["_meta"]["hostvars"]["203.0.113.3"]["instance"]["name"], "db00");
        assert_eq!(value["_meta"]["hostvars"]["203.0.113.3"]["instance"]["status"], "active");
    }

    #[test]
    fn human_lines_list_groups() {
        let naming = HostNaming::new("").unwrap();
        let snapshot = Snapshot {
            droplets: vec![
                droplet(1, "web00", DropletStatus::Active),
                droplet(2, "web01", DropletStatus::Active),
            ],
            volumes: Vec::new(),
        };
        let inventory = Inventory::materialize(&blueprint(), &naming, &snapshot, "t");
        assert_eq!(
            inventory.human_lines(),
            vec!["db: ".to_string(), "web: 203.0.113.1 203.0.113.2".to_string()]
        );
        assert_eq!(inventory.all_hosts().count(), 2);
    }
}
