//! Typed Rust client for the DigitalOcean v2 API.
//!
//! Covers the subset needed for keeping a fleet of droplets in shape:
//! droplets (list, create, delete), block storage volumes (list, create,
//! attach), images (list) and account SSH keys (list, create).
//!
//! Collection endpoints are followed through every `links.pages.next` page.
//! Requests answered with 409/422 ("not ready yet") are re-sent after a
//! fixed delay, see [`RetryPolicy`].

mod types;

use std::time::{Duration, Instant};

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

pub use reqwest::StatusCode;
pub use types::*;

pub const BASE_URL: &str = "https://api.digitalocean.com/v2";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("digitalocean api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("digitalocean api {endpoint} returned {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("digitalocean api {endpoint} returned malformed body: {source}")]
    Decode {
        endpoint: &'static str,
        source: serde_json::Error,
    },

    #[error("digitalocean api {endpoint} response has no `{key}` field")]
    MissingKey {
        endpoint: &'static str,
        key: &'static str,
    },

    #[error("digitalocean api {endpoint} still not ready after {waited:?}")]
    NotReady {
        endpoint: &'static str,
        waited: Duration,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// How to treat "not ready" (409/422) answers.
///
/// The provider provisions resources asynchronously, so acting on a droplet
/// right after creating it is answered with 422 until it settles. Those
/// requests are re-sent every `delay`. With `deadline: None` there is no
/// ceiling: a call blocks until the provider is ready or fails hard, and may
/// never return if the provider never settles.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(4),
            deadline: None,
        }
    }
}

/// Client for the DigitalOcean REST API.
#[derive(Clone)]
pub struct DoClient {
    token: String,
    base_url: String,
    retry: RetryPolicy,
    http: reqwest::Client,
}

impl DoClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: BASE_URL.to_string(),
            retry: RetryPolicy::default(),
            http: reqwest::Client::new(),
        }
    }

    /// Point the client at another API root (no trailing slash).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Resolve a relative API path or an absolute pagination link.
    ///
    /// Pagination links sometimes come back as plain `http:`; they are
    /// upgraded when the client itself talks https.
    fn url(&self, path: &str) -> String {
        if let Some(rest) = path.strip_prefix("http:") {
            if self.base_url.starts_with("https:") {
                return format!("https:{rest}");
            }
            return path.to_string();
        }
        if path.starts_with("https:") {
            return path.to_string();
        }
        format!("{}{path}", self.base_url)
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn is_not_ready(status: StatusCode) -> bool {
        status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY
    }

    async fn check(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api { endpoint, status, body });
        }
        Ok(resp)
    }

    /// Send one logical request, re-sending it while the provider says "not ready".
    async fn send<B>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
        endpoint: &'static str,
    ) -> Result<reqwest::Response>
    where
        B: Serialize + ?Sized,
    {
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let mut builder = self
                .http
                .request(method.clone(), url)
                .header("Authorization", self.auth());
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let resp = builder.send().await?;
            let status = resp.status();

            if Self::is_not_ready(status) {
                let waited = started.elapsed();
                if let Some(deadline) = self.retry.deadline
                    && waited >= deadline
                {
                    return Err(Error::NotReady { endpoint, waited });
                }

                warn!(
                    endpoint,
                    attempt,
                    status = status.as_u16(),
                    delay_ms = self.retry.delay.as_millis() as u64,
                    "resource not ready, retrying"
                );
                tokio::time::sleep(self.retry.delay).await;
                continue;
            }

            return Self::check(resp, endpoint).await;
        }
    }

    /// Pull `key` out of a JSON object body such as `{"droplet": {...}}`.
    async fn extract<T: DeserializeOwned>(
        resp: reqwest::Response,
        key: &'static str,
        endpoint: &'static str,
    ) -> Result<T> {
        let mut body: serde_json::Map<String, serde_json::Value> = resp.json().await?;
        let value = body
            .remove(key)
            .ok_or(Error::MissingKey { endpoint, key })?;
        serde_json::from_value(value).map_err(|source| Error::Decode { endpoint, source })
    }

    /// Fetch every page of a collection, in provider order.
    ///
    /// A failure on any page fails the whole listing.
    async fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        key: &'static str,
        endpoint: &'static str,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(self.url(path));
        let mut pages = 0u32;

        while let Some(url) = next {
            let resp = self.send::<()>(Method::GET, &url, None, endpoint).await?;
            let mut body: serde_json::Map<String, serde_json::Value> = resp.json().await?;
            pages += 1;

            let batch = body
                .remove(key)
                .ok_or(Error::MissingKey { endpoint, key })?;
            let batch: Vec<T> =
                serde_json::from_value(batch).map_err(|source| Error::Decode { endpoint, source })?;
            items.extend(batch);

            let links: Links = match body.remove("links") {
                Some(links) => serde_json::from_value(links)
                    .map_err(|source| Error::Decode { endpoint, source })?,
                None => Links::default(),
            };
            next = links.pages.and_then(|p| p.next).map(|u| self.url(&u));
        }

        debug!(endpoint, pages, items = items.len(), "listing complete");
        Ok(items)
    }

    // ── Droplets ─────────────────────────────────────────────────────

    pub async fn list_droplets(&self) -> Result<Vec<Droplet>> {
        self.list_all("/droplets", "droplets", "list droplets").await
    }

    pub async fn create_droplet(&self, req: &CreateDropletRequest) -> Result<Droplet> {
        let resp = self
            .send(Method::POST, &self.url("/droplets"), Some(req), "create droplet")
            .await?;
        Self::extract(resp, "droplet", "create droplet").await
    }

    pub async fn delete_droplet(&self, droplet_id: u64) -> Result<()> {
        self.send::<()>(
            Method::DELETE,
            &self.url(&format!("/droplets/{droplet_id}")),
            None,
            "delete droplet",
        )
        .await?;
        Ok(())
    }

    // ── Volumes ──────────────────────────────────────────────────────

    pub async fn list_volumes(&self) -> Result<Vec<Volume>> {
        self.list_all("/volumes", "volumes", "list volumes").await
    }

    pub async fn create_volume(&self, req: &CreateVolumeRequest) -> Result<Volume> {
        let resp = self
            .send(Method::POST, &self.url("/volumes"), Some(req), "create volume")
            .await?;
        Self::extract(resp, "volume", "create volume").await
    }

    pub async fn attach_volume(&self, volume_id: &str, droplet_id: u64) -> Result<()> {
        self.send(
            Method::POST,
            &self.url(&format!("/volumes/{volume_id}/actions")),
            Some(&VolumeAction::Attach { droplet_id }),
            "attach volume",
        )
        .await?;
        Ok(())
    }

    // ── Images and keys ──────────────────────────────────────────────

    pub async fn list_images(&self) -> Result<Vec<Image>> {
        self.list_all("/images", "images", "list images").await
    }

    pub async fn list_ssh_keys(&self) -> Result<Vec<SshKey>> {
        self.list_all("/account/keys", "ssh_keys", "list ssh keys").await
    }

    pub async fn create_ssh_key(&self, req: &CreateSshKeyRequest) -> Result<SshKey> {
        let resp = self
            .send(Method::POST, &self.url("/account/keys"), Some(req), "create ssh key")
            .await?;
        Self::extract(resp, "ssh_key", "create ssh key").await
    }
}
