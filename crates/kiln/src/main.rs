use clap::Parser;
use colored::Colorize;
use kiln_build::{Orchestrator, StageError};
use kiln_core::RunConfig;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(
    about = "GitHub リリースからコンテナイメージをビルド・テスト・公開",
    long_about = "build.yaml の versions × registries の組み合わせごとに\n\
                  イメージをビルドし、必要なら結合テストを行い、--push 指定時はレジストリへ公開します。"
)]
#[command(version)]
struct Cli {
    /// ビルドしたイメージをレジストリにプッシュ
    #[arg(long)]
    push: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ログは stderr に出し、stdout はレポート専用にする
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), describe(&e).red());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RunConfig::from_env(cli.push);
    tracing::debug!("Manifest: {}", config.manifest_path.display());

    let manifest = kiln_core::load_manifest(&config.manifest_path)?;
    let orchestrator = Orchestrator::from_manifest(manifest, config)
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    let mut stdout = std::io::stdout();
    orchestrator.run(&mut stdout).await?;

    println!("{}", "✓ 全てのイメージを処理しました".green());
    Ok(())
}

/// 段階の失敗は原因の対処方法まで含めて表示する
fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<StageError>() {
        Some(stage) => format!("{}\n{}", stage, stage.kind().user_message()),
        None => err.to_string(),
    }
}
