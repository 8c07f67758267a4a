//! compose 系 CLI を外部プロセスとして動かすバックエンドと結合テスト
//!
//! 子プロセスには CONTAINERSSH_VERSION / CONTAINERSSH_TAG / GITHUB_TOKEN /
//! REGISTRY を渡し、compose ファイル側でイメージ名を組み立てる。

use crate::auth::Credentials;
use crate::backend::{BuildUnit, ImageBackend, Transcript};
use crate::error::{BuildError, BuildResult};
use crate::process::{CommandRunner, Invocation};
use async_trait::async_trait;
use std::sync::Arc;

const DEFAULT_COMPOSE: &str = "docker-compose";

/// compose コマンド（`docker-compose` や `docker compose`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeCommand {
    program: String,
    base_args: Vec<String>,
}

impl ComposeCommand {
    /// 空白区切りのコマンド文字列を解釈
    ///
    /// 空文字列の場合は `docker-compose` を使う。
    pub fn parse(command: &str) -> Self {
        let mut words = command.split_whitespace().map(str::to_string);
        match words.next() {
            Some(program) => Self {
                program,
                base_args: words.collect(),
            },
            None => Self {
                program: DEFAULT_COMPOSE.to_string(),
                base_args: Vec::new(),
            },
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// サブコマンドを付けた Invocation
    pub fn invocation<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(&self.program)
            .args(self.base_args.iter().cloned())
            .args(args)
    }
}

impl Default for ComposeCommand {
    fn default() -> Self {
        Self::parse(DEFAULT_COMPOSE)
    }
}

/// compose 子プロセスに渡す環境変数
pub fn compose_env(unit: &BuildUnit, github_token: Option<&str>) -> Vec<(String, String)> {
    vec![
        ("CONTAINERSSH_VERSION".to_string(), unit.version.clone()),
        ("CONTAINERSSH_TAG".to_string(), unit.tag.clone()),
        (
            "GITHUB_TOKEN".to_string(),
            github_token.unwrap_or_default().to_string(),
        ),
        ("REGISTRY".to_string(), unit.registry.clone()),
    ]
}

/// compose の build / push でイメージを扱うバックエンド
pub struct ComposeBackend {
    runner: Arc<dyn CommandRunner>,
    compose: ComposeCommand,
    github_token: Option<String>,
}

impl ComposeBackend {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        compose: ComposeCommand,
        github_token: Option<String>,
    ) -> Self {
        Self {
            runner,
            compose,
            github_token,
        }
    }

    fn env(&self, unit: &BuildUnit) -> Vec<(String, String)> {
        compose_env(unit, self.github_token.as_deref())
    }
}

#[async_trait]
impl ImageBackend for ComposeBackend {
    async fn build(&self, unit: &BuildUnit, transcript: &mut Transcript) -> BuildResult<()> {
        tracing::info!("Building {} with {}", unit.image_reference, self.compose.program());
        let invocation = self.compose.invocation(["build"]).envs(self.env(unit));
        transcript.run(self.runner.as_ref(), invocation).await?;
        Ok(())
    }

    async fn push(
        &self,
        unit: &BuildUnit,
        credentials: &Credentials,
        transcript: &mut Transcript,
    ) -> BuildResult<()> {
        tracing::info!("Logging in to {}", credentials.registry);
        let login = Invocation::new("docker")
            .args(["login", "--username", credentials.username.as_str()])
            .args(["--password-stdin", credentials.registry.as_str()])
            .envs(self.env(unit))
            .stdin(credentials.password());
        transcript.run(self.runner.as_ref(), login).await?;

        tracing::info!("Pushing {}", unit.image_reference);
        let push = self.compose.invocation(["push"]).envs(self.env(unit));
        transcript.run(self.runner.as_ref(), push).await?;
        Ok(())
    }
}

/// compose up / down による結合テスト
pub struct IntegrationTest {
    runner: Arc<dyn CommandRunner>,
    compose: ComposeCommand,
    /// 終了コードでテスト結果を決めるサービス
    sentinel: String,
    github_token: Option<String>,
}

impl IntegrationTest {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        compose: ComposeCommand,
        sentinel: impl Into<String>,
        github_token: Option<String>,
    ) -> Self {
        Self {
            runner,
            compose,
            sentinel: sentinel.into(),
            github_token,
        }
    }

    /// `up` の成否にかかわらず必ず `down` を実行する
    ///
    /// `up` の失敗は `TestFailed`、`down` だけの失敗は `Process` になる。
    pub async fn run(&self, unit: &BuildUnit, transcript: &mut Transcript) -> BuildResult<()> {
        tracing::info!("Testing {}", unit.image_reference);
        let env = compose_env(unit, self.github_token.as_deref());

        let up = self
            .compose
            .invocation(["up", "--abort-on-container-exit", "--exit-code-from"])
            .arg(&self.sentinel)
            .envs(env.clone());
        let up_result = transcript.run(self.runner.as_ref(), up).await;

        let down = self.compose.invocation(["down"]).envs(env);
        let down_result = transcript.run(self.runner.as_ref(), down).await;

        up_result.map_err(BuildError::TestFailed)?;
        down_result?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessError;
    use crate::testing::RecordingRunner;
    use kiln_core::OutputMode;

    fn unit() -> BuildUnit {
        BuildUnit::new("1.2.3", "stable", "example.com", "containerssh/containerssh")
    }

    #[test]
    fn test_parse_compose_command() {
        let legacy = ComposeCommand::parse("docker-compose");
        assert_eq!(legacy.program(), "docker-compose");
        assert_eq!(legacy.invocation(["up"]).command_line(), "docker-compose up");

        let plugin = ComposeCommand::parse("docker  compose");
        assert_eq!(plugin.invocation(["down"]).command_line(), "docker compose down");

        assert_eq!(ComposeCommand::parse("  "), ComposeCommand::default());
    }

    #[test]
    fn test_compose_env() {
        let env = compose_env(&unit(), None);
        assert!(env.contains(&("CONTAINERSSH_VERSION".to_string(), "1.2.3".to_string())));
        assert!(env.contains(&("CONTAINERSSH_TAG".to_string(), "stable".to_string())));
        assert!(env.contains(&("GITHUB_TOKEN".to_string(), String::new())));
        assert!(env.contains(&("REGISTRY".to_string(), "example.com".to_string())));
    }

    #[tokio::test]
    async fn test_down_runs_after_failed_up() {
        let runner = Arc::new(RecordingRunner::new().fail_when("up", 3));
        let test = IntegrationTest::new(runner.clone(), ComposeCommand::default(), "sut", None);
        let mut transcript = Transcript::new(OutputMode::Capture);

        let err = test.run(&unit(), &mut transcript).await.unwrap_err();

        assert!(matches!(
            err,
            BuildError::TestFailed(ProcessError::Exit { code: Some(3), .. })
        ));
        assert_eq!(
            runner.command_lines(),
            vec![
                "docker-compose up --abort-on-container-exit --exit-code-from sut",
                "docker-compose down",
            ]
        );
        assert!(transcript.into_text().contains("ran docker-compose down"));
    }

    #[tokio::test]
    async fn test_failed_down_after_passing_up_is_process_error() {
        let runner = Arc::new(RecordingRunner::new().fail_when("down", 1));
        let test = IntegrationTest::new(runner.clone(), ComposeCommand::default(), "sut", None);
        let mut transcript = Transcript::new(OutputMode::Capture);

        let err = test.run(&unit(), &mut transcript).await.unwrap_err();
        assert!(matches!(err, BuildError::Process(ProcessError::Exit { .. })));
    }

    #[tokio::test]
    async fn test_push_logs_in_with_password_on_stdin() {
        let runner = Arc::new(RecordingRunner::new());
        let backend = ComposeBackend::new(
            runner.clone(),
            ComposeCommand::default(),
            Some("gh-token".to_string()),
        );
        let credentials = Credentials::new("example.com", "alice", "s3cret");
        let mut transcript = Transcript::new(OutputMode::Capture);

        backend
            .push(&unit(), &credentials, &mut transcript)
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0].command_line(),
            "docker login --username alice --password-stdin example.com"
        );
        assert_eq!(calls[0].stdin.as_deref(), Some(b"s3cret".as_slice()));
        assert_eq!(calls[1].command_line(), "docker-compose push");
        assert!(
            calls[1]
                .env
                .contains(&("GITHUB_TOKEN".to_string(), "gh-token".to_string()))
        );

        // パスワードはレポートに出ない
        assert!(!transcript.into_text().contains("s3cret"));
    }

    #[tokio::test]
    async fn test_failed_login_skips_push() {
        let runner = Arc::new(RecordingRunner::new().fail_when("login", 1));
        let backend = ComposeBackend::new(runner.clone(), ComposeCommand::default(), None);
        let credentials = Credentials::new("example.com", "alice", "s3cret");
        let mut transcript = Transcript::new(OutputMode::Capture);

        let err = backend
            .push(&unit(), &credentials, &mut transcript)
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Process(_)));
        assert_eq!(runner.calls().len(), 1);
    }
}
