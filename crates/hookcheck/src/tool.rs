use std::ffi::OsString;
use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// How to launch one external tool: a program plus the fixed leading arguments.
/// Stage-specific arguments are appended after these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to launch `{program}`: {source}")]
pub struct SpawnError {
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

/// Captured result of one blocking tool invocation.
#[derive(Debug, Clone)]
pub struct ToolRun {
    pub argv: Vec<String>,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ToolRun {
    /// One-line description of a failed run: the exit code and the tail of stderr.
    pub fn failure_detail(&self) -> String {
        let code = match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        };
        let stderr = String::from_utf8_lossy(&self.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            format!("`{}` failed with {code}", self.argv.join(" "))
        } else {
            format!(
                "`{}` failed with {code}; stderr:\n{}",
                self.argv.join(" "),
                tail_lines(stderr, STDERR_TAIL_LINES)
            )
        }
    }
}

const STDERR_TAIL_LINES: usize = 40;

fn tail_lines(s: &str, n: usize) -> String {
    let lines: Vec<&str> = s.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Runs `spec` with `extra` appended, waiting for it to exit. No timeout: a hung tool
/// hangs the caller.
pub fn run_tool(
    spec: &ToolSpec,
    extra: &[OsString],
    cwd: Option<&Path>,
) -> Result<ToolRun, SpawnError> {
    let mut argv = Vec::with_capacity(1 + spec.args.len() + extra.len());
    argv.push(spec.program.clone());
    argv.extend(spec.args.iter().cloned());
    argv.extend(extra.iter().map(|a| a.to_string_lossy().into_owned()));

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args).args(extra);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    debug!(argv = ?argv, cwd = ?cwd, "invoking tool");

    let out = cmd.output().map_err(|source| SpawnError {
        program: spec.program.clone(),
        source,
    })?;

    Ok(ToolRun {
        argv,
        exit_code: out.status.code(),
        success: out.status.success(),
        stdout: out.stdout,
        stderr: out.stderr,
    })
}
