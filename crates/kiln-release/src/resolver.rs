//! Release resolution
//!
//! Lists the releases of a repository and picks the one whose tag matches
//! the requested version.

use crate::client::ReleaseClient;
use crate::error::{ReleaseError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl Release {
    /// True when the tag is `version` or `v{version}`
    pub fn matches_version(&self, version: &str) -> bool {
        self.tag_name == version
            || self
                .tag_name
                .strip_prefix('v')
                .is_some_and(|rest| rest == version)
    }
}

/// First release in list order whose tag matches `version`
pub fn select_release(releases: Vec<Release>, version: &str) -> Option<Release> {
    releases.into_iter().find(|r| r.matches_version(version))
}

impl ReleaseClient {
    /// Resolve the release of `repository` tagged `version` or `v{version}`
    pub async fn resolve(&self, repository: &str, version: &str) -> Result<Release> {
        let url = format!("{}/repos/{}/releases", self.api_base(), repository);
        tracing::debug!("Listing releases: {}", url);

        let response = self
            .get(&url)
            .send()
            .await
            .map_err(|e| ReleaseError::Transport {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ReleaseError::Transport {
                url,
                reason: format!("invalid HTTP response code for release query ({})", status),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ReleaseError::Transport {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let releases: Vec<Release> =
            serde_json::from_slice(&body).map_err(|e| ReleaseError::Decode {
                what: format!("release list from {}", url),
                reason: e.to_string(),
            })?;

        tracing::debug!("{} releases listed for {}", releases.len(), repository);

        select_release(releases, version).ok_or_else(|| ReleaseError::NotFound {
            repository: repository.to_string(),
            version: version.to_string(),
        })
    }

    /// Resolve the release, then download every asset named in `targets`
    ///
    /// Returns the paths that were written. Assets absent from the release
    /// are skipped with a warning and left out of the returned paths.
    pub async fn download_release(
        &self,
        repository: &str,
        version: &str,
        targets: &BTreeMap<String, PathBuf>,
    ) -> Result<Vec<PathBuf>> {
        let release = self.resolve(repository, version).await?;
        tracing::info!("Resolved release {} of {}", release.tag_name, repository);

        let mut written = Vec::new();
        for asset in &release.assets {
            if let Some(target) = targets.get(&asset.name) {
                self.fetch(&asset.browser_download_url, target).await?;
                written.push(target.clone());
            }
        }

        for name in targets.keys() {
            if !release.assets.iter().any(|a| &a.name == name) {
                tracing::warn!("Asset {} not found in release {}", name, release.tag_name);
            }
        }

        Ok(written)
    }
}
