use crate::backend::BuildUnit;
use crate::process::ProcessError;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Push failed: {message}")]
    PushFailed { message: String },

    #[error("Invalid tag: {tag}")]
    InvalidTag { tag: String },

    #[error(
        "Missing credentials for registry {registry}: environment variable {variable} is unset or empty"
    )]
    Credential { registry: String, variable: String },

    #[error("Integration test failed: {0}")]
    TestFailed(#[source] ProcessError),

    #[error("Release {version} has no asset named {asset}")]
    MissingAsset { asset: String, version: String },

    #[error("Build context error: {0}")]
    Context(#[source] std::io::Error),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Release(#[from] kiln_release::ReleaseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::Credential { registry, variable } => {
                format!(
                    "レジストリ {} の認証情報がありません\n\
                     \n\
                     解決方法:\n\
                     1. 環境変数 {} を設定してください\n\
                     2. build.yaml の registries.{} の変数名を確認してください",
                    registry, variable, registry
                )
            }
            BuildError::DockerConnection(e) => {
                format!(
                    "Docker に接続できません: {}\n\
                     \n\
                     Docker デーモンが起動しているか確認してください。",
                    e
                )
            }
            BuildError::Process(ProcessError::Lookup { program }) => {
                format!(
                    "コマンドが見つかりません: {}\n\
                     \n\
                     PATH にインストールされているか確認してください。",
                    program
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;

/// パイプラインの段階
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// リリース取得とビルドコンテキストの準備（バージョン単位）
    Prepare,
    Build,
    Test,
    Push,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Prepare => "prepare",
            Stage::Build => "build",
            Stage::Test => "test",
            Stage::Push => "push",
        };
        f.write_str(name)
    }
}

/// どの段階で、どの version/tag/registry について失敗したか
#[derive(Debug)]
pub struct StageError {
    pub stage: Stage,
    pub version: String,
    pub tag: Option<String>,
    pub registry: Option<String>,
    pub source: BuildError,
}

impl StageError {
    pub fn prepare(version: &str, source: BuildError) -> Self {
        Self {
            stage: Stage::Prepare,
            version: version.to_string(),
            tag: None,
            registry: None,
            source,
        }
    }

    pub fn at(stage: Stage, unit: &BuildUnit, source: BuildError) -> Self {
        Self {
            stage,
            version: unit.version.clone(),
            tag: Some(unit.tag.clone()),
            registry: Some(unit.registry.clone()),
            source,
        }
    }

    /// 原因となったエラー
    pub fn kind(&self) -> &BuildError {
        &self.source
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed for version {}", self.stage, self.version)?;
        if let Some(tag) = &self.tag {
            write!(f, " tag {}", tag)?;
        }
        if let Some(registry) = &self.registry {
            write!(f, " on {}", registry)?;
        }
        Ok(())
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
