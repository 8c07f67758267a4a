//! Asset download

use crate::client::ReleaseClient;
use crate::error::{ReleaseError, Result};
use std::path::Path;
use tokio::io::AsyncWriteExt;

impl ReleaseClient {
    /// Download `url` into `destination`
    ///
    /// The destination is created (truncated) before the request is sent, so
    /// it exists even when the download fails. Cleaning it up is the
    /// caller's job.
    pub async fn fetch(&self, url: &str, destination: &Path) -> Result<()> {
        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|source| ReleaseError::Create {
                path: destination.to_path_buf(),
                source,
            })?;

        tracing::info!("Downloading {}", url);
        let mut response = self
            .get(url)
            .send()
            .await
            .map_err(|e| ReleaseError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ReleaseError::Transport {
                url: url.to_string(),
                reason: format!(
                    "invalid HTTP response code while downloading asset ({})",
                    status
                ),
            });
        }

        let copy_error = |reason: String| ReleaseError::Copy {
            url: url.to_string(),
            path: destination.to_path_buf(),
            reason,
        };

        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| copy_error(e.to_string()))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| copy_error(e.to_string()))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| copy_error(e.to_string()))?;

        tracing::debug!("Downloaded {} bytes to {}", written, destination.display());
        Ok(())
    }
}
