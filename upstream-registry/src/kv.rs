//! Manual overrides stored in the registry key/value store

use crate::client::RegistryClient;
use crate::error::Result;
use tracing::{debug, info};

fn normalize(key: &str) -> &str {
    key.trim_start_matches('/')
}

/// Read a manual override: its trimmed value and version.
///
/// A missing key reads as an empty value at the current registry index.
pub async fn read_manual(client: &dyn RegistryClient, key: &str) -> Result<(String, u64)> {
    let key = normalize(key);
    let (value, version) = client.read_kv(key, 0).await?;
    debug!(key, version, "read manual value");
    Ok((value, version))
}

/// Write a manual override.
///
/// Creating the key is tried first; if it already exists the write only
/// succeeds when `version` is still its current version.
pub async fn write_manual(client: &dyn RegistryClient, key: &str, value: &str, version: u64) -> Result<bool> {
    let key = normalize(key);
    if client.write_kv(key, value, 0).await? {
        info!(key, "created manual value");
        return Ok(true);
    }

    let written = client.write_kv(key, value, version).await?;
    if written {
        info!(key, version, "updated manual value");
    } else {
        info!(key, version, "manual value changed since it was read, not written");
    }
    Ok(written)
}
