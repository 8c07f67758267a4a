use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("マニフェストを読み込めません: {path}\n理由: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("マニフェストのパースに失敗しました: {path}\n理由: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("無効なマニフェスト: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ManifestError>;
