//! マニフェストローダー

use crate::error::{ManifestError, Result};
use crate::model::BuildManifest;
use std::path::Path;
use tracing::{debug, info, instrument};

/// 作業ディレクトリから読み込むマニフェストのファイル名
pub const DEFAULT_MANIFEST: &str = "build.yaml";

/// マニフェストファイルを読み込んで検証
#[instrument(skip(path), fields(path = %path.display()))]
pub fn load_manifest(path: &Path) -> Result<BuildManifest> {
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let manifest: BuildManifest =
        serde_yaml::from_str(&content).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    validate(&manifest)?;

    info!(
        versions = manifest.versions.len(),
        registries = manifest.registries.len(),
        "Manifest loaded"
    );
    Ok(manifest)
}

/// 文字列からマニフェストをパース
pub fn parse_manifest(content: &str) -> Result<BuildManifest> {
    let manifest: BuildManifest =
        serde_yaml::from_str(content).map_err(|source| ManifestError::Parse {
            path: DEFAULT_MANIFEST.into(),
            source,
        })?;
    validate(&manifest)?;
    Ok(manifest)
}

fn validate(manifest: &BuildManifest) -> Result<()> {
    if manifest.registries.is_empty() {
        return Err(ManifestError::Invalid(
            "registries が1つも定義されていません".to_string(),
        ));
    }

    for (version, tags) in &manifest.versions {
        if tags.iter().any(|t| t.trim().is_empty()) {
            return Err(ManifestError::Invalid(format!(
                "バージョン {} に空のタグがあります",
                version
            )));
        }
        if tags.is_empty() {
            debug!(version = %version, "Version has no tags, nothing will be built");
        }
    }

    for (name, registry) in &manifest.registries {
        if registry.user_variable.is_empty() || registry.password_variable.is_empty() {
            return Err(ManifestError::Invalid(format!(
                "レジストリ {} の user_variable / password_variable が空です",
                name
            )));
        }
    }

    Ok(())
}
