use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::Defaults;
use crate::naming::HostNaming;
use crate::{Error, Result};

/// Replica indices are two decimal digits.
pub const MAX_REPLICAS: u32 = 100;

/// Inventory keys that cannot be used as group names.
const RESERVED_GROUPS: &[&str] = &["all"];

/// Names the provider accepts for block storage volumes.
static VOLUME_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]{0,63}$").expect("volume name regex is valid"));

/// Desired state: group name to group spec.
///
/// Supplied fresh on every run; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Blueprint {
    groups: BTreeMap<String, GroupSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    #[serde(default = "default_count", alias = "n")]
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, VolumeSpec>,
    /// Anything else is passed through to the inventory as group vars.
    #[serde(flatten)]
    pub vars: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Size in GB.
    pub size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

fn default_count() -> u32 {
    1
}

impl Default for GroupSpec {
    fn default() -> Self {
        Self {
            count: default_count(),
            image: None,
            size: None,
            region: None,
            volumes: BTreeMap::new(),
            vars: BTreeMap::new(),
        }
    }
}

impl GroupSpec {
    pub fn replicas(count: u32) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    pub fn with_volume(mut self, label: impl Into<String>, volume: VolumeSpec) -> Self {
        self.volumes.insert(label.into(), volume);
        self
    }

    pub fn image_or<'a>(&'a self, defaults: &'a Defaults) -> &'a str {
        self.image.as_deref().unwrap_or(&defaults.image)
    }

    pub fn size_or<'a>(&'a self, defaults: &'a Defaults) -> &'a str {
        self.size.as_deref().unwrap_or(&defaults.size)
    }

    pub fn region_or<'a>(&'a self, defaults: &'a Defaults) -> &'a str {
        self.region.as_deref().unwrap_or(&defaults.region)
    }

    /// Group vars for the inventory: everything but `count` and `volumes`.
    pub fn inventory_vars(&self) -> BTreeMap<String, serde_json::Value> {
        let mut vars = self.vars.clone();
        for (key, value) in [("image", &self.image), ("size", &self.size), ("region", &self.region)] {
            if let Some(value) = value {
                vars.insert(key.to_string(), serde_json::Value::String(value.clone()));
            }
        }
        vars
    }
}

impl VolumeSpec {
    pub fn new(size: u32) -> Self {
        Self { size, region: None }
    }

    /// Volume override, then group override, then the global default.
    pub fn region_or<'a>(&'a self, group: &'a GroupSpec, defaults: &'a Defaults) -> &'a str {
        self.region
            .as_deref()
            .unwrap_or_else(|| group.region_or(defaults))
    }
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, name: impl Into<String>, spec: GroupSpec) -> Self {
        self.groups.insert(name.into(), spec);
        self
    }

    /// Parse a YAML (or JSON) mapping of group name to group spec.
    pub fn from_yaml(source: &str) -> Result<Self> {
        let blueprint: Self = serde_yaml::from_str(source)
            .map_err(|e| Error::Config(format!("malformed blueprint: {e}")))?;
        blueprint.validate()?;
        Ok(blueprint)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read blueprint {}: {e}", path.display())))?;
        Self::from_yaml(&source)
    }

    /// Reject anything the naming scheme or the inventory cannot represent.
    pub fn validate(&self) -> Result<()> {
        let mut volume_owners: BTreeMap<&str, &str> = BTreeMap::new();
        for (name, spec) in &self.groups {
            if name.is_empty() || !name.bytes().all(|b| b.is_ascii_lowercase()) {
                return Err(Error::Config(format!(
                    "group name {name:?} must be lowercase ascii letters only"
                )));
            }
            if RESERVED_GROUPS.contains(&name.as_str()) {
                return Err(Error::Config(format!("group name {name:?} is reserved")));
            }
            if spec.count > MAX_REPLICAS {
                return Err(Error::Config(format!(
                    "group {name:?} asks for {} replicas, at most {MAX_REPLICAS} are addressable",
                    spec.count
                )));
            }
            for (label, volume) in &spec.volumes {
                if !VOLUME_NAME.is_match(label) {
                    return Err(Error::Config(format!(
                        "group {name:?} has an invalid volume label {label:?} \
                         (lowercase letter, then lowercase letters, digits or '-')"
                    )));
                }
                // One volume per label, and a volume attaches to one droplet.
                if let Some(other) = volume_owners.insert(label.as_str(), name.as_str()) {
                    return Err(Error::Config(format!(
                        "volume {label:?} is declared by both {other:?} and {name:?}"
                    )));
                }
                if volume.size == 0 {
                    return Err(Error::Config(format!(
                        "volume {label:?} of group {name:?} needs a size"
                    )));
                }
            }
        }
        Ok(())
    }

    /// [`Blueprint::validate`], plus every volume name as built with the
    /// naming prefix.
    pub fn validate_with(&self, naming: &HostNaming) -> Result<()> {
        self.validate()?;
        for (name, spec) in &self.groups {
            for label in spec.volumes.keys() {
                let volume = naming.volume_name(label);
                if !VOLUME_NAME.is_match(&volume) {
                    return Err(Error::Config(format!(
                        "volume {label:?} of group {name:?} would be named {volume:?}, \
                         which the provider does not accept"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &GroupSpec)> {
        self.groups.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn get(&self, group: &str) -> Option<&GroupSpec> {
        self.groups.get(group)
    }

    pub fn contains(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }
}
