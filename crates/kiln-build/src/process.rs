//! 外部プロセスの実行
//!
//! 子プロセスの環境変数は呼び出し側が指定したものだけに絞り、
//! そこへ PATH / TMP / TEMP を必ず追加する。
//! 出力はそのまま流すか、stdout と stderr を行単位で混ぜてバッファに集める。

use async_trait::async_trait;
use kiln_core::{OutputMode, RunConfig};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{program} not found in PATH")]
    Lookup { program: String },

    #[error("failed to start {program}: {source}")]
    Start {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write to stdin of {program}: {source}")]
    Stdin {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}", status_label(.code))]
    Exit {
        program: String,
        code: Option<i32>,
        /// Capture モードで集めた出力（Stream モードでは空）
        output: String,
    },
}

fn status_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

/// 実行するコマンド
#[derive(Clone, Default)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// stdin に書き込んでから閉じるデータ（パスワード等）
    pub stdin: Option<Vec<u8>>,
    pub output: OutputMode,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: Vec<(String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn output(mut self, mode: OutputMode) -> Self {
        self.output = mode;
        self
    }

    /// ログ・レポート用のコマンドライン（stdin の内容は含まない）
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field(
                "env",
                &self.env.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            )
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .field("output", &self.output)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Capture モードで集めた stdout + stderr
    pub text: String,
}

/// 外部コマンド実行の抽象
///
/// テストでは記録用の実装に差し替える。
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError>;
}

/// 実プロセスを起動する CommandRunner
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    inherited_env: Vec<(String, String)>,
}

impl ProcessRunner {
    /// `inherited_env` は全ての子プロセスに追加される（PATH / TMP / TEMP）
    pub fn new(inherited_env: Vec<(String, String)>) -> Self {
        Self { inherited_env }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.inherited_env.clone())
    }

    fn search_path(&self) -> Option<&str> {
        self.inherited_env
            .iter()
            .find(|(name, _)| name == "PATH")
            .map(|(_, value)| value.as_str())
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError> {
        let program = invocation.program.clone();
        let path = lookup_program(&program, self.search_path())
            .ok_or_else(|| ProcessError::Lookup {
                program: program.clone(),
            })?;

        tracing::debug!("Running: {}", invocation.command_line());

        let mut cmd = Command::new(&path);
        cmd.args(&invocation.args);
        cmd.env_clear();
        cmd.envs(invocation.env.iter().map(|(k, v)| (k, v)));
        cmd.envs(self.inherited_env.iter().map(|(k, v)| (k, v)));
        cmd.stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        match invocation.output {
            OutputMode::Stream => {
                cmd.stdout(Stdio::inherit());
                cmd.stderr(Stdio::inherit());
            }
            OutputMode::Capture => {
                cmd.stdout(Stdio::piped());
                cmd.stderr(Stdio::piped());
            }
        }
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ProcessError::Start {
            program: program.clone(),
            source,
        })?;

        if let (Some(data), Some(mut stdin)) = (&invocation.stdin, child.stdin.take()) {
            let written = async {
                stdin.write_all(data).await?;
                stdin.shutdown().await
            }
            .await;
            // stdin は閉じてから結果を判定する
            drop(stdin);
            written.map_err(|source| ProcessError::Stdin {
                program: program.clone(),
                source,
            })?;
        }

        let buffer = Arc::new(Mutex::new(String::new()));
        let stdout = collect_lines(child.stdout.take(), buffer.clone());
        let stderr = collect_lines(child.stderr.take(), buffer.clone());
        let (status, _, _) = tokio::join!(child.wait(), stdout, stderr);

        let status = status.map_err(|source| ProcessError::Start {
            program: program.clone(),
            source,
        })?;
        let text = std::mem::take(&mut *buffer.lock().unwrap_or_else(|e| e.into_inner()));

        if !status.success() {
            return Err(ProcessError::Exit {
                program,
                code: status.code(),
                output: text,
            });
        }

        Ok(CommandOutput { text })
    }
}

/// 行単位で読み取り、共有バッファに追記
async fn collect_lines<R>(reader: Option<R>, buffer: Arc<Mutex<String>>)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let mut buffer = buffer.lock().unwrap_or_else(|e| e.into_inner());
                buffer.push_str(&String::from_utf8_lossy(&line));
            }
        }
    }
}

/// `search_path` からプログラムの絶対パスを探す
///
/// パス区切りを含む名前はそのまま存在確認だけ行う。
pub fn lookup_program(program: &str, search_path: Option<&str>) -> Option<PathBuf> {
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return is_executable(direct).then(|| direct.to_path_buf());
    }

    let search_path = search_path?;
    std::env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .flat_map(|dir| candidates(&dir, program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(windows)]
fn candidates(dir: &Path, program: &str) -> Vec<PathBuf> {
    vec![dir.join(program), dir.join(format!("{}.exe", program))]
}

#[cfg(not(windows))]
fn candidates(dir: &Path, program: &str) -> Vec<PathBuf> {
    vec![dir.join(program)]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
