//! テスト用の CommandRunner

use crate::process::{CommandOutput, CommandRunner, Invocation, ProcessError};
use async_trait::async_trait;
use std::sync::Mutex;

/// 呼び出しを記録し、指定した引数を含むコマンドだけ失敗させる
#[derive(Default)]
pub(crate) struct RecordingRunner {
    calls: Mutex<Vec<Invocation>>,
    failures: Vec<(String, i32)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 引数に `arg` を含むコマンドは `code` で終了させる
    pub fn fail_when(mut self, arg: &str, code: i32) -> Self {
        self.failures.push((arg.to_string(), code));
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// 各呼び出しのコマンドライン
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(Invocation::command_line).collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ProcessError> {
        self.calls.lock().unwrap().push(invocation.clone());
        let text = format!("ran {}\n", invocation.command_line());

        let failure = self
            .failures
            .iter()
            .find(|(arg, _)| invocation.args.iter().any(|a| a == arg));
        match failure {
            Some((_, code)) => Err(ProcessError::Exit {
                program: invocation.program.clone(),
                code: Some(*code),
                output: text,
            }),
            None => Ok(CommandOutput { text }),
        }
    }
}
