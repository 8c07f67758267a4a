//! Docker Engine API を直接使うバックエンド
//!
//! バージョンごとに GitHub リリースからバイナリを取り出してコンテキストに置き、
//! タグ × レジストリごとにビルドとプッシュを行う。

use crate::auth::Credentials;
use crate::backend::{BuildUnit, ImageBackend, Transcript};
use crate::builder::ImageBuilder;
use crate::error::{BuildError, BuildResult};
use crate::pusher::ImagePusher;
use async_trait::async_trait;
use bollard::Docker;
use kiln_core::ProductSettings;
use kiln_release::{ExtractSummary, ReleaseClient};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

pub struct NativeBackend {
    builder: ImageBuilder,
    pusher: ImagePusher,
    releases: ReleaseClient,
    product: ProductSettings,
}

impl NativeBackend {
    pub fn new(docker: Docker, releases: ReleaseClient, product: ProductSettings) -> Self {
        Self {
            builder: ImageBuilder::new(docker.clone()),
            pusher: ImagePusher::new(docker),
            releases,
            product,
        }
    }

    /// ローカルの Docker デーモンに接続して作成
    pub fn connect(releases: ReleaseClient, product: ProductSettings) -> BuildResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self::new(docker, releases, product))
    }
}

#[async_trait]
impl ImageBackend for NativeBackend {
    async fn prepare(&self, version: &str) -> BuildResult<()> {
        // ダウンロード先はどの経路で抜けても削除される
        let download_dir = tempfile::TempDir::new()?;
        let asset = self.product.asset_name(version);
        let archive = download_dir.path().join(&asset);
        let targets = BTreeMap::from([(asset.clone(), archive.clone())]);

        let written = self
            .releases
            .download_release(&self.product.repository, version, &targets)
            .await?;
        if !written.contains(&archive) {
            return Err(BuildError::MissingAsset {
                asset,
                version: version.to_string(),
            });
        }

        let product = self.product.clone();
        let summary = tokio::task::spawn_blocking(move || unpack_release(&archive, &product))
            .await
            .map_err(|e| BuildError::Io(std::io::Error::other(e)))??;

        tracing::info!(
            "Prepared build context for {}: {} file(s)",
            version,
            summary.extracted.len()
        );
        Ok(())
    }

    async fn build(&self, unit: &BuildUnit, transcript: &mut Transcript) -> BuildResult<()> {
        let build_args = HashMap::from([
            ("CONTAINERSSH_VERSION".to_string(), unit.version.clone()),
            ("CONTAINERSSH_TAG".to_string(), unit.tag.clone()),
        ]);
        self.builder
            .build_image(
                &self.product.context,
                &unit.image_reference,
                &build_args,
                transcript,
            )
            .await
    }

    async fn push(
        &self,
        unit: &BuildUnit,
        credentials: &Credentials,
        transcript: &mut Transcript,
    ) -> BuildResult<()> {
        self.pusher
            .push(&unit.image_reference, credentials, transcript)
            .await
    }
}

/// リリースアーカイブから必要なファイルをコンテキストへ展開
///
/// 見つからなかったエントリは警告だけ出して続行する。
pub fn unpack_release(archive: &Path, product: &ProductSettings) -> BuildResult<ExtractSummary> {
    std::fs::create_dir_all(&product.context)?;

    let entries: Vec<(String, PathBuf)> = product
        .files
        .iter()
        .map(|file| (file.source.clone(), product.context.join(&file.target)))
        .collect();

    let summary = kiln_release::extract(archive, &entries)?;
    for name in &summary.missing {
        tracing::warn!("{} not found in {}", name, archive.display());
    }
    Ok(summary)
}
