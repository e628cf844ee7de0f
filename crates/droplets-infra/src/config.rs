use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use do_api::RetryPolicy;

use crate::reconciler::ReconcileOptions;
use crate::{Error, Result};

pub const TOKEN_VAR: &str = "DIGITAL_OCEAN_TOKEN";

/// Droplet parameters used when a group does not set its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    pub image: String,
    pub size: String,
    pub region: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            image: "ubuntu-16-04-x64".into(),
            size: "512mb".into(),
            region: "nyc3".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub token: String,
    /// API root override, e.g. a recording proxy. `None` talks to DigitalOcean.
    pub api_url: Option<String>,
    pub prefix: String,
    pub defaults: Defaults,
    /// Public key installed on every droplet created.
    pub ssh_public_key: PathBuf,
    pub retry: RetryPolicy,
    pub reconcile: ReconcileOptions,
}

impl Settings {
    /// Load from env vars:
    ///
    /// - `DIGITAL_OCEAN_TOKEN` (required)
    /// - `DROPLETS_API_URL` (default: the public API)
    /// - `DROPLETS_PREFIX` (default: empty)
    /// - `DROPLETS_IMAGE`, `DROPLETS_SIZE`, `DROPLETS_REGION`
    ///   (default: `ubuntu-16-04-x64`, `512mb`, `nyc3`)
    /// - `DROPLETS_SSH_PUBLIC_KEY` (default: `~/.ssh/id_rsa.pub`)
    /// - `DROPLETS_RETRY_DELAY_SECS` (default: 4)
    /// - `DROPLETS_POLL_INTERVAL_SECS` (default: 10)
    /// - `DROPLETS_DEADLINE_SECS` (optional; bounds retries and polling,
    ///   unset means a reconcile may wait forever)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let token = lookup(TOKEN_VAR)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::MissingEnv(TOKEN_VAR.into()))?;

        let fallback = Defaults::default();
        let defaults = Defaults {
            image: lookup("DROPLETS_IMAGE").unwrap_or(fallback.image),
            size: lookup("DROPLETS_SIZE").unwrap_or(fallback.size),
            region: lookup("DROPLETS_REGION").unwrap_or(fallback.region),
        };

        let ssh_public_key = match lookup("DROPLETS_SSH_PUBLIC_KEY") {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(lookup("HOME").unwrap_or_default()).join(".ssh/id_rsa.pub"),
        };

        let deadline = secs(&lookup, "DROPLETS_DEADLINE_SECS")?;

        let retry = RetryPolicy {
            delay: secs(&lookup, "DROPLETS_RETRY_DELAY_SECS")?.unwrap_or(RetryPolicy::default().delay),
            deadline,
        };

        let reconcile = ReconcileOptions {
            poll_interval: secs(&lookup, "DROPLETS_POLL_INTERVAL_SECS")?
                .unwrap_or(ReconcileOptions::default().poll_interval),
            deadline,
        };

        Ok(Self {
            token,
            api_url: lookup("DROPLETS_API_URL").filter(|u| !u.trim().is_empty()),
            prefix: lookup("DROPLETS_PREFIX").unwrap_or_default(),
            defaults,
            ssh_public_key,
            retry,
            reconcile,
        })
    }

    /// Bound both the not-ready retries and the convergence poll.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.retry.deadline = Some(deadline);
        self.reconcile.deadline = Some(deadline);
        self
    }
}

fn secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    lookup(key)
        .map(|raw| {
            u64::from_str(raw.trim())
                .map(Duration::from_secs)
                .map_err(|_| Error::Config(format!("{key} must be a whole number of seconds")))
        })
        .transpose()
}
