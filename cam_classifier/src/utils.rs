//! Utility functions
//!
use std::path::{Path, PathBuf};

use reqwest::Client;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("{0} does not exist and no URL to download it from was given")]
    Missing(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to write file: {0}")]
    Io(#[from] std::io::Error),
}

/// Download a file from a URL to a given filepath.
pub async fn download_file(
    client: &Client,
    url: &str,
    filepath: impl AsRef<Path>,
) -> Result<(), DownloadError> {
    let resp = client.get(url).send().await?.error_for_status()?;
    let content = resp.bytes().await?;

    if let Some(parent) = filepath.as_ref().parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(filepath, &content).await?;

    Ok(())
}

/// Make sure `filepath` exists locally, downloading it from `url` if necessary.
pub async fn ensure_local_file(
    client: &Client,
    filepath: PathBuf,
    url: Option<&str>,
) -> Result<PathBuf, DownloadError> {
    if tokio::fs::try_exists(&filepath).await? {
        return Ok(filepath);
    }
    match url {
        Some(url) => {
            log::info!("Downloading {} to {}", url, filepath.display());
            download_file(client, url, &filepath).await?;
            Ok(filepath)
        }
        None => Err(DownloadError::Missing(filepath.display().to_string())),
    }
}
