//! version × tag × registry ごとのビルド・テスト・プッシュ
//!
//! どこかで失敗した時点で残りの単位は実行しない。
//! 各単位のレポートは成否にかかわらず出力する。

use crate::auth::{CredentialLookup, env_lookup, resolve_credentials};
use crate::backend::{BuildUnit, ImageBackend, Transcript};
use crate::compose::{ComposeBackend, ComposeCommand, IntegrationTest};
use crate::error::{BuildResult, Stage, StageError};
use crate::native::NativeBackend;
use crate::process::{CommandRunner, ProcessRunner};
use crate::report::ExecutionReport;
use kiln_core::{Backend, BuildManifest, Registry, RunConfig};
use kiln_release::ReleaseClient;
use std::io::Write;
use std::sync::Arc;

pub struct Orchestrator {
    manifest: BuildManifest,
    config: RunConfig,
    backend: Box<dyn ImageBackend>,
    test: Option<IntegrationTest>,
    lookup: CredentialLookup,
}

impl Orchestrator {
    pub fn new(manifest: BuildManifest, config: RunConfig, backend: Box<dyn ImageBackend>) -> Self {
        Self {
            manifest,
            config,
            backend,
            test: None,
            lookup: env_lookup(),
        }
    }

    pub fn with_integration_test(mut self, test: IntegrationTest) -> Self {
        self.test = Some(test);
        self
    }

    pub fn with_credential_lookup(mut self, lookup: CredentialLookup) -> Self {
        self.lookup = lookup;
        self
    }

    /// マニフェストの pipeline 設定に従って組み立てる
    ///
    /// Docker デーモンへの接続は native バックエンドの場合だけ行う。
    pub fn from_manifest(manifest: BuildManifest, config: RunConfig) -> BuildResult<Self> {
        let pipeline = manifest.pipeline.clone();
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::from_config(&config));
        let compose = ComposeCommand::parse(&pipeline.compose);

        let backend: Box<dyn ImageBackend> = match pipeline.backend {
            Backend::Native => Box::new(NativeBackend::connect(
                ReleaseClient::new(config.github_token.clone()),
                manifest.product.clone(),
            )?),
            Backend::Compose => Box::new(ComposeBackend::new(
                runner.clone(),
                compose.clone(),
                config.github_token.clone(),
            )),
        };
        tracing::debug!(
            "Pipeline: backend={:?} test={} output={:?}",
            pipeline.backend,
            pipeline.test,
            pipeline.output
        );

        let github_token = config.github_token.clone();
        let mut orchestrator = Self::new(manifest, config, backend);
        if pipeline.test {
            orchestrator = orchestrator.with_integration_test(IntegrationTest::new(
                runner,
                compose,
                pipeline.sentinel,
                github_token,
            ));
        }
        Ok(orchestrator)
    }

    /// 全ての単位を順に処理し、レポートを `out` に書く
    pub async fn run(&self, out: &mut (dyn Write + Send)) -> Result<(), StageError> {
        for (version, tags) in &self.manifest.versions {
            tracing::info!("Preparing version {}", version);
            self.backend
                .prepare(version)
                .await
                .map_err(|e| StageError::prepare(version, e))?;

            for tag in self.manifest.expand_tags(tags) {
                for (name, registry) in &self.manifest.registries {
                    let unit =
                        BuildUnit::new(version, &tag, name, &self.manifest.product.image);
                    let mut transcript = Transcript::new(self.manifest.pipeline.output);

                    let result = self.run_unit(&unit, registry, &mut transcript).await;

                    let failure = result
                        .as_ref()
                        .err()
                        .map(|e| format!("{}: {}", e, e.kind()));
                    let report = ExecutionReport::new(unit, transcript.into_text(), failure);
                    if let Err(e) = report.write_to(out) {
                        tracing::warn!("Failed to write report: {}", e);
                    }

                    result?;
                }
            }
        }

        Ok(())
    }

    async fn run_unit(
        &self,
        unit: &BuildUnit,
        registry: &Registry,
        transcript: &mut Transcript,
    ) -> Result<(), StageError> {
        self.backend
            .build(unit, transcript)
            .await
            .map_err(|e| StageError::at(Stage::Build, unit, e))?;

        if let Some(test) = &self.test {
            test.run(unit, transcript)
                .await
                .map_err(|e| StageError::at(Stage::Test, unit, e))?;
        }

        if self.config.push {
            // ログインより前に認証情報を確定させる
            let credentials = resolve_credentials(&unit.registry, registry, &*self.lookup)
                .map_err(|e| StageError::at(Stage::Push, unit, e))?;
            self.backend
                .push(unit, &credentials, transcript)
                .await
                .map_err(|e| StageError::at(Stage::Push, unit, e))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;
    use crate::testing::RecordingRunner;
    use kiln_core::parse_manifest;
    use std::collections::HashMap;

    const MANIFEST: &str = r#"
revision: "20240101"
versions:
  "1.2.3": ["stable"]
registries:
  example.com:
    user_variable: U
    password_variable: P
pipeline:
  backend: compose
  test: true
"#;

    fn config(push: bool) -> RunConfig {
        RunConfig {
            push,
            ..Default::default()
        }
    }

    fn compose_orchestrator(
        manifest: &str,
        runner: &Arc<RecordingRunner>,
        push: bool,
    ) -> Orchestrator {
        colored::control::set_override(false);
        let manifest = parse_manifest(manifest).unwrap();
        let backend = ComposeBackend::new(runner.clone(), ComposeCommand::default(), None);
        let test = IntegrationTest::new(runner.clone(), ComposeCommand::default(), "sut", None);
        Orchestrator::new(manifest, config(push), Box::new(backend))
            .with_integration_test(test)
            .with_credential_lookup(Arc::new(|_: &str| None::<String>))
    }

    fn lookup(vars: &[(&str, &str)]) -> CredentialLookup {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(move |name: &str| map.get(name).cloned())
    }

    #[tokio::test]
    async fn test_missing_credentials_stop_before_login() {
        let runner = Arc::new(RecordingRunner::new());
        let orchestrator = compose_orchestrator(MANIFEST, &runner, true);
        let mut out = Vec::<u8>::new();

        let err = orchestrator.run(&mut out).await.unwrap_err();

        assert_eq!(err.stage, Stage::Push);
        assert_eq!(err.version, "1.2.3");
        assert_eq!(err.tag.as_deref(), Some("stable"));
        assert_eq!(err.registry.as_deref(), Some("example.com"));
        assert!(matches!(
            err.kind(),
            BuildError::Credential { variable, .. } if variable == "U"
        ));

        let lines = runner.command_lines();
        assert_eq!(
            lines,
            vec![
                "docker-compose build",
                "docker-compose up --abort-on-container-exit --exit-code-from sut",
                "docker-compose down",
            ]
        );
        assert!(!lines.iter().any(|l| l.contains("login") || l.contains("push")));

        let report = String::from_utf8(out).unwrap();
        assert!(report.contains("::group::"));
        assert!(report.contains("1.2.3 / stable / example.com"));
        assert!(report.contains("ran docker-compose build"));
        assert!(report.contains("ran docker-compose up"));
        assert!(report.contains("::endgroup::"));
        // 最初の単位で止まる
        assert!(!report.contains("stable-20240101"));
    }

    #[tokio::test]
    async fn test_empty_password_is_rejected() {
        let runner = Arc::new(RecordingRunner::new());
        let orchestrator = compose_orchestrator(MANIFEST, &runner, true)
            .with_credential_lookup(lookup(&[("U", "alice"), ("P", "")]));

        let err = orchestrator.run(&mut Vec::<u8>::new()).await.unwrap_err();

        assert!(matches!(
            err.kind(),
            BuildError::Credential { variable, .. } if variable == "P"
        ));
        assert!(!runner.command_lines().iter().any(|l| l.contains("login")));
    }

    #[tokio::test]
    async fn test_without_push_flag_nothing_is_pushed() {
        let runner = Arc::new(RecordingRunner::new());
        let orchestrator = compose_orchestrator(MANIFEST, &runner, false);
        let mut out = Vec::<u8>::new();

        orchestrator.run(&mut out).await.unwrap();

        let lines = runner.command_lines();
        // stable と stable-20240101 の2単位
        assert_eq!(lines.iter().filter(|l| l.ends_with(" build")).count(), 2);
        assert!(!lines.iter().any(|l| l.contains("login") || l.ends_with(" push")));

        let report = String::from_utf8(out).unwrap();
        assert_eq!(report.matches("::group::").count(), 2);
        assert!(report.contains("1.2.3 / stable-20240101 / example.com"));
    }

    #[tokio::test]
    async fn test_push_with_credentials() {
        let runner = Arc::new(RecordingRunner::new());
        let orchestrator = compose_orchestrator(MANIFEST, &runner, true)
            .with_credential_lookup(lookup(&[("U", "alice"), ("P", "s3cret")]));

        orchestrator.run(&mut Vec::<u8>::new()).await.unwrap();

        let login = "docker login --username alice --password-stdin example.com";
        let lines = runner.command_lines();
        assert_eq!(lines.iter().filter(|l| l.as_str() == login).count(), 2);
        assert_eq!(lines.last().map(String::as_str), Some("docker-compose push"));
    }

    #[tokio::test]
    async fn test_failed_test_stage_stops_the_run() {
        let runner = Arc::new(RecordingRunner::new().fail_when("up", 1));
        let orchestrator = compose_orchestrator(MANIFEST, &runner, true);
        let mut out = Vec::<u8>::new();

        let err = orchestrator.run(&mut out).await.unwrap_err();

        assert_eq!(err.stage, Stage::Test);
        assert!(matches!(err.kind(), BuildError::TestFailed(_)));
        assert_eq!(runner.command_lines().last().map(String::as_str), Some("docker-compose down"));

        let report = String::from_utf8(out).unwrap();
        assert_eq!(report.matches("::group::").count(), 1);
        assert!(report.contains("test stage failed for version 1.2.3 tag stable on example.com"));
    }

    #[tokio::test]
    async fn test_units_follow_manifest_order() {
        let manifest = r#"
revision: "7"
versions:
  "0.5.0": ["latest", "0.5"]
  "0.4.1": ["0.4"]
registries:
  quay.io: { user_variable: QU, password_variable: QP }
  docker.io: { user_variable: DU, password_variable: DP }
pipeline:
  backend: compose
"#;
        colored::control::set_override(false);
        let runner = Arc::new(RecordingRunner::new());
        let manifest = parse_manifest(manifest).unwrap();
        let backend = ComposeBackend::new(runner.clone(), ComposeCommand::default(), None);
        let orchestrator = Orchestrator::new(manifest, config(false), Box::new(backend));
        let mut out = Vec::<u8>::new();

        orchestrator.run(&mut out).await.unwrap();

        let report = String::from_utf8(out).unwrap();
        let titles: Vec<&str> = report
            .lines()
            .filter_map(|l| l.strip_prefix("::group::✓ "))
            .collect();
        assert_eq!(
            titles,
            vec![
                "0.4.1 / 0.4 / docker.io",
                "0.4.1 / 0.4 / quay.io",
                "0.4.1 / 0.4-7 / docker.io",
                "0.4.1 / 0.4-7 / quay.io",
                "0.5.0 / latest / docker.io",
                "0.5.0 / latest / quay.io",
                "0.5.0 / 0.5 / docker.io",
                "0.5.0 / 0.5 / quay.io",
                "0.5.0 / 0.5-7 / docker.io",
                "0.5.0 / 0.5-7 / quay.io",
            ]
        );
    }
}
