//! 起動時に一度だけ組み立てる実行設定
//!
//! 環境変数の読み取りはここに集約し、各コンポーネントには値として渡す。
//! レジストリ認証情報だけは例外で、プッシュ直前に kiln-build 側で解決する。

use crate::loader::DEFAULT_MANIFEST;
use std::path::PathBuf;

/// 子プロセスへ常に引き継ぐ環境変数
pub const INHERITED_VARIABLES: [&str; 3] = ["PATH", "TMP", "TEMP"];

/// マニフェストのパスを上書きする環境変数
const MANIFEST_VARIABLE: &str = "KILN_MANIFEST";

#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// `--push` が指定されたか
    pub push: bool,
    /// GitHub API / アセットダウンロード用のトークン
    pub github_token: Option<String>,
    pub manifest_path: PathBuf,
    /// 子プロセスに引き継ぐ PATH / TMP / TEMP（未設定のものは含まない）
    pub inherited_env: Vec<(String, String)>,
}

impl RunConfig {
    /// 現在のプロセス環境から組み立てる
    pub fn from_env(push: bool) -> Self {
        Self::from_lookup(push, |name| std::env::var(name).ok())
    }

    /// 任意の参照関数から組み立てる
    pub fn from_lookup(push: bool, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let github_token = lookup("GITHUB_TOKEN").filter(|t| !t.is_empty());
        let manifest_path = lookup(MANIFEST_VARIABLE)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST));
        let inherited_env = INHERITED_VARIABLES
            .iter()
            .filter_map(|name| lookup(name).map(|value| (name.to_string(), value)))
            .collect();

        Self {
            push,
            github_token,
            manifest_path,
            inherited_env,
        }
    }
}
