//! Deterministic droplet and volume names.
//!
//! A droplet belongs to this system iff its name is `prefix`, a run of
//! lowercase letters (the group) and exactly two digits (the replica index).
//! There is no other ownership marker. Groups with digits or uppercase
//! letters and indices of 100 or more cannot be represented; the blueprint
//! rejects them before any name is built.

use regex::Regex;

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct HostNaming {
    prefix: String,
    pattern: Regex,
}

impl HostNaming {
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        let pattern = Regex::new(&format!(r"^{}([a-z]+)(\d\d)$", regex::escape(&prefix)))
            .map_err(|e| Error::Config(format!("unusable name prefix {prefix:?}: {e}")))?;
        Ok(Self { prefix, pattern })
    }

    /// Droplet name for replica `index` of `group`, e.g. `web03`.
    pub fn name(&self, group: &str, index: u32) -> String {
        debug_assert!(index < 100, "replica index {index} has no two-digit name");
        format!("{}{group}{index:02}", self.prefix)
    }

    /// Block volume name for a declared volume label.
    pub fn volume_name(&self, label: &str) -> String {
        format!("{}{label}", self.prefix)
    }

    /// Split an owned droplet name back into `(group, index)`.
    pub fn parse<'n>(&self, name: &'n str) -> Option<(&'n str, u32)> {
        let caps = self.pattern.captures(name)?;
        let group = caps.get(1)?.as_str();
        let index = caps.get(2)?.as_str().parse().ok()?;
        Some((group, index))
    }
}
