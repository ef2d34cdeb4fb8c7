use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

/// Fetches `url` into `dest` unless it already exists (or `force`).
/// Returns `true` when a download happened.
pub async fn fetch_source(url: &str, dest: &Path, force: bool) -> Result<bool> {
    if dest.is_file() && !force {
        info!(path = %dest.display(), "source dataset present, skipping download");
        return Ok(false);
    }
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    info!(%url, "downloading source dataset");
    let resp = reqwest::get(url).await.context("dataset download request failed")?;
    if !resp.status().is_success() {
        bail!("dataset download failed: HTTP {} for {url}", resp.status());
    }
    let bytes = resp.bytes().await.context("dataset download body failed")?;

    let tmp = dest.with_extension("part");
    tokio::fs::write(&tmp, &bytes)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, dest)
        .await
        .with_context(|| format!("failed to move download into {}", dest.display()))?;

    info!(path = %dest.display(), bytes = bytes.len(), "source dataset saved");
    Ok(true)
}
