//! ビルド方式の抽象と、1単位分の出力記録

use crate::auth::Credentials;
use crate::error::BuildResult;
use crate::process::{CommandRunner, Invocation, ProcessError};
use async_trait::async_trait;
use kiln_core::OutputMode;

/// version × tag × registry の1組
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildUnit {
    pub version: String,
    pub tag: String,
    pub registry: String,
    /// `{registry}/{image}:{tag}`
    pub image_reference: String,
}

impl BuildUnit {
    pub fn new(version: &str, tag: &str, registry: &str, image: &str) -> Self {
        Self {
            version: version.to_string(),
            tag: tag.to_string(),
            registry: registry.to_string(),
            image_reference: format!("{}/{}:{}", registry, image, tag),
        }
    }
}

/// イメージのビルドとプッシュを行うバックエンド
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// バージョンごとに一度だけ呼ばれる準備処理
    async fn prepare(&self, _version: &str) -> BuildResult<()> {
        Ok(())
    }

    async fn build(&self, unit: &BuildUnit, transcript: &mut Transcript) -> BuildResult<()>;

    async fn push(
        &self,
        unit: &BuildUnit,
        credentials: &Credentials,
        transcript: &mut Transcript,
    ) -> BuildResult<()>;
}

/// 1単位分のコマンド出力
///
/// Capture モードではバッファに溜め、Stream モードでは即座に stdout へ書く。
#[derive(Debug)]
pub struct Transcript {
    mode: OutputMode,
    text: String,
}

impl Transcript {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            text: String::new(),
        }
    }

    pub fn append(&mut self, text: &str) {
        match self.mode {
            OutputMode::Capture => self.text.push_str(text),
            OutputMode::Stream => print!("{}", text),
        }
    }

    pub fn line(&mut self, line: &str) {
        self.append(line);
        self.append("\n");
    }

    /// コマンドを実行し、成功・失敗どちらでも出力を記録
    pub async fn run(
        &mut self,
        runner: &dyn CommandRunner,
        invocation: Invocation,
    ) -> Result<(), ProcessError> {
        let invocation = invocation.output(self.mode);
        self.line(&format!("$ {}", invocation.command_line()));

        match runner.run(&invocation).await {
            Ok(output) => {
                self.append(&output.text);
                Ok(())
            }
            Err(err) => {
                if let ProcessError::Exit { output, .. } = &err {
                    self.append(output);
                }
                Err(err)
            }
        }
    }

    pub fn into_text(self) -> String {
        self.text
    }
}
