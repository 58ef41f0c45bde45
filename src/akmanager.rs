//! Credential-set management: reset, count, and list the crawler's pool of
//! upstream API credentials.
//!
//! Grounded on the original `AkManager.py`, which kept the credential list
//! hardcoded in source and re-ran the script to "reset" it. We read
//! credentials from a file instead, one per line, so rotating a leaked or
//! exhausted credential doesn't require a rebuild.

use std::path::Path;

use anyhow::Context;
use std::sync::Arc;

use crate::store::CoordinationStore;
use crate::Result;

/// Load credentials from a file, one per line, blank lines and `#` comments
/// ignored.
pub fn load_credentials(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("could not read credentials file {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect())
}

/// Replace the credential set with the contents of `path`.
pub async fn reset(store: &Arc<dyn CoordinationStore>, path: &Path) -> Result<usize> {
    let credentials = load_credentials(path)?;
    store.reset_credentials(&credentials).await?;
    Ok(credentials.len())
}

/// Number of credentials remaining.
pub async fn count(store: &Arc<dyn CoordinationStore>) -> Result<u64> {
    store.credential_count().await
}

/// Every remaining credential.
pub async fn list(store: &Arc<dyn CoordinationStore>) -> Result<Vec<String>> {
    store.list_credentials().await
}
