pub mod validation;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use crate::error::AgentError;

/// Captured result of one `git` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stdout, or stderr when stdout is empty.
    pub fn text(&self) -> &str {
        let stdout = self.stdout.trim();
        if stdout.is_empty() {
            self.stderr.trim()
        } else {
            stdout
        }
    }
}

/// Splits a command line into git arguments, dropping a leading `git`.
pub fn parse_command(command: &str) -> Result<Vec<String>> {
    let mut args = shlex::split(command.trim())
        .ok_or_else(|| anyhow!("Unbalanced quotes in command: {}", command))?;

    if args.first().map(String::as_str) == Some("git") {
        args.remove(0);
    }
    if args.is_empty() {
        return Err(anyhow!("Empty git command"));
    }
    Ok(args)
}

/// Strips a leading `git ` so commands are stored the same way everywhere.
pub fn strip_git_prefix(command: &str) -> String {
    let trimmed = command.trim();
    trimmed
        .strip_prefix("git ")
        .map(str::trim_start)
        .unwrap_or(trimmed)
        .to_string()
}

/// Runs git subcommands inside one working directory.
#[derive(Debug, Clone)]
pub struct GitExecutor {
    git_binary: PathBuf,
    work_dir: PathBuf,
}

impl GitExecutor {
    pub fn new(work_dir: impl AsRef<Path>) -> Result<Self, AgentError> {
        let git_binary = which::which("git").map_err(|e| {
            AgentError::Environment(format!("git executable not found on PATH: {}", e))
        })?;
        Ok(Self {
            git_binary,
            work_dir: work_dir.as_ref().to_path_buf(),
        })
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Same binary, different working directory.
    pub fn with_work_dir(&self, work_dir: impl AsRef<Path>) -> Self {
        Self {
            git_binary: self.git_binary.clone(),
            work_dir: work_dir.as_ref().to_path_buf(),
        }
    }

    /// Runs a command line such as `checkout -b feature` or `git status`.
    pub fn run(&self, command: &str) -> Result<CommandOutput> {
        let args = parse_command(command)?;
        self.run_args(&args)
    }

    pub fn run_args<S: AsRef<str>>(&self, args: &[S]) -> Result<CommandOutput> {
        let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
        tracing::debug!("git {} (in {:?})", args.join(" "), self.work_dir);

        let started = Instant::now();
        let output = Command::new(&self.git_binary)
            .args(&args)
            .current_dir(&self.work_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_EDITOR", "true")
            .env("GIT_MERGE_AUTOEDIT", "no")
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to spawn git in {:?}", self.work_dir))?;

        let result = CommandOutput {
            // None means the process was killed by a signal
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        if !result.success() {
            tracing::debug!(
                "git {} exited with {}: {}",
                args.join(" "),
                result.exit_code,
                result.stderr.trim()
            );
        }
        Ok(result)
    }
}
