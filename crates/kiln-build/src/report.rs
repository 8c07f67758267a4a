//! 1単位ごとの実行結果の表示
//!
//! GitHub Actions のログで折りたためるよう `::group::` / `::endgroup::` で囲む。

use crate::backend::BuildUnit;
use colored::Colorize;
use std::io::{self, Write};

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub unit: BuildUnit,
    /// Capture モードで集めたコマンド出力
    pub output: String,
    pub failure: Option<String>,
}

impl ExecutionReport {
    pub fn new(unit: BuildUnit, output: String, failure: Option<String>) -> Self {
        Self {
            unit,
            output,
            failure,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    pub fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        let mark = if self.succeeded() {
            "✓".green()
        } else {
            "✗".red()
        };
        let title = format!(
            "{} / {} / {}",
            self.unit.version, self.unit.tag, self.unit.registry
        );

        writeln!(out, "::group::{} {}", mark, title.bold())?;
        if !self.output.is_empty() {
            write!(out, "{}", self.output)?;
            if !self.output.ends_with('\n') {
                writeln!(out)?;
            }
        }
        if let Some(failure) = &self.failure {
            writeln!(out, "{}", failure.red())?;
        }
        writeln!(out, "::endgroup::")?;
        out.flush()
    }
}
