//! build.yaml のデータモデル

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// リビジョン接尾辞を付けないタグ
const UNSUFFIXED_TAG: &str = "latest";

/// ビルドマニフェスト全体
///
/// `versions` と `registries` は `BTreeMap` で保持するため、
/// 反復順序はキーのソート順で決定的になる。
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BuildManifest {
    /// ビルドスタンプ（例: "20240101"）
    pub revision: String,

    /// バージョン → タグ一覧
    #[serde(default)]
    pub versions: BTreeMap<String, Vec<String>>,

    /// レジストリ名 → 認証情報の環境変数名
    #[serde(default)]
    pub registries: BTreeMap<String, Registry>,

    #[serde(default)]
    pub product: ProductSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,
}

impl BuildManifest {
    /// タグを「そのままのタグ」と「タグ-リビジョン」に展開
    ///
    /// `latest` にはリビジョン接尾辞を付けない。
    pub fn expand_tags(&self, tags: &[String]) -> Vec<String> {
        let mut expanded = Vec::with_capacity(tags.len() * 2);
        for tag in tags {
            expanded.push(tag.clone());
            if tag != UNSUFFIXED_TAG {
                expanded.push(format!("{}-{}", tag, self.revision));
            }
        }
        expanded
    }
}

/// レジストリ設定
///
/// 認証情報そのものは保持せず、値を持つ環境変数の名前だけを持つ。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Registry {
    pub user_variable: String,
    pub password_variable: String,
}

/// ビルド対象プロダクトの設定
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProductSettings {
    /// リリースを取得する GitHub リポジトリ（owner/name）
    pub repository: String,
    /// レジストリ配下のイメージ名
    pub image: String,
    /// リリースアセット名のテンプレート（`{version}` を置換）
    pub asset: String,
    /// ビルドコンテキストのディレクトリ
    pub context: PathBuf,
    /// アーカイブから取り出すファイル（コンテキストからの相対パス）
    pub files: Vec<FileMapping>,
}

impl Default for ProductSettings {
    fn default() -> Self {
        Self {
            repository: "containerssh/containerssh".to_string(),
            image: "containerssh/containerssh".to_string(),
            asset: "containerssh_{version}_linux_amd64.tar.gz".to_string(),
            context: PathBuf::from("containerssh"),
            files: vec![
                FileMapping::new("containerssh", "containerssh"),
                FileMapping::new("LICENSE.md", "LICENSE.md"),
                FileMapping::new("NOTICE.md", "NOTICE.md"),
            ],
        }
    }
}

impl ProductSettings {
    /// 指定バージョンのアセット名
    pub fn asset_name(&self, version: &str) -> String {
        self.asset.replace("{version}", version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileMapping {
    /// アーカイブ内のパス
    pub source: String,
    /// コンテキストディレクトリからの相対パス
    pub target: PathBuf,
}

impl FileMapping {
    pub fn new(source: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// イメージのビルド方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Docker Engine API で直接ビルド・プッシュ
    #[default]
    Native,
    /// compose 系 CLI を外部プロセスとして実行
    Compose,
}

/// 外部コマンドの出力の扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// 出力をバッファに集め、レポートにまとめて表示
    #[default]
    Capture,
    /// 自プロセスの stdout/stderr にそのまま流す
    Stream,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub backend: Backend,
    /// compose による結合テストを実行するか
    pub test: bool,
    pub output: OutputMode,
    /// compose 系 CLI のプログラム名
    pub compose: String,
    /// テスト結果を終了コードで返すサービス
    pub sentinel: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Native,
            test: false,
            output: OutputMode::Capture,
            compose: "docker-compose".to_string(),
            sentinel: "sut".to_string(),
        }
    }
}
