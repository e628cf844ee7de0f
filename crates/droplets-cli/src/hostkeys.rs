//! Refresh `known_hosts` for inventory hosts with `ssh-keygen` and `ssh-keyscan`.
//!
//! Both tools get the host as a plain argument; nothing goes through a shell.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

pub fn known_hosts_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".ssh").join("known_hosts"))
}

/// Replace the recorded keys of every host. Returns how many hosts were handled.
pub async fn install<'h>(
    hosts: impl IntoIterator<Item = &'h str>,
    known_hosts: &Path,
) -> Result<usize> {
    let mut handled = 0;
    for host in hosts {
        forget(host, known_hosts).await?;
        let keys = scan(host).await?;
        if keys.is_empty() {
            warn!(host, "ssh-keyscan returned no keys");
        } else {
            append(known_hosts, &keys).await?;
            info!(host, "host keys installed");
        }
        handled += 1;
    }
    Ok(handled)
}

/// `ssh-keygen -f <known_hosts> -R <host>`; a missing file has nothing to forget.
async fn forget(host: &str, known_hosts: &Path) -> Result<()> {
    if !tokio::fs::try_exists(known_hosts).await.unwrap_or(false) {
        return Ok(());
    }
    let output = Command::new("ssh-keygen")
        .arg("-f")
        .arg(known_hosts)
        .arg("-R")
        .arg(host)
        .output()
        .await
        .context("failed to run ssh-keygen")?;

    if !output.status.success() {
        bail!(
            "ssh-keygen -R {host} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

async fn scan(host: &str) -> Result<Vec<u8>> {
    let output = Command::new("ssh-keyscan")
        .arg(host)
        .output()
        .await
        .context("failed to run ssh-keyscan")?;

    if !output.status.success() {
        bail!(
            "ssh-keyscan {host} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output.stdout)
}

async fn append(known_hosts: &Path, keys: &[u8]) -> Result<()> {
    if let Some(dir) = known_hosts.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("cannot create {}", dir.display()))?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(known_hosts)
        .await
        .with_context(|| format!("cannot open {}", known_hosts.display()))?;
    file.write_all(keys).await?;
    if !keys.ends_with(b"\n") {
        file.write_all(b"\n").await?;
    }
    file.flush().await?;
    Ok(())
}
