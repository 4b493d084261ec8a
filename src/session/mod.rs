use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::verify::VerificationResult;
use crate::workflow::Workflow;

/// Directory inside the git dir holding the session file.
pub const SESSION_DIR: &str = "gitagent";
pub const SESSION_FILE: &str = "session.json";

/// One executed command as remembered across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub workflow_id: String,
    /// 1-based step number inside its workflow.
    pub step: usize,
    pub command: String,
    pub exit_code: i32,
    pub verification: VerificationResult,
    pub summary: String,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub repo_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<CommandRecord>,
    #[serde(default)]
    pub workflow: Option<Workflow>,
}

impl Session {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            repo_path: repo_path.into(),
            created_at: now,
            updated_at: now,
            history: Vec::new(),
            workflow: None,
        }
    }

    pub fn record(&mut self, record: CommandRecord) {
        self.history.push(record);
    }

    /// The workflow still in progress, if any.
    pub fn pending_workflow(&self) -> Option<&Workflow> {
        self.workflow.as_ref().filter(|w| !w.is_finished())
    }

    /// Drops the unfinished workflow; true if there was one.
    pub fn discard_workflow(&mut self) -> bool {
        let discarded = self.pending_workflow().is_some();
        self.workflow = None;
        discarded
    }

    pub fn recent_history(&self, limit: usize) -> &[CommandRecord] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }

    /// History lines for the planner prompt.
    pub fn render_history(&self, limit: usize) -> String {
        let recent = self.recent_history(limit);
        if recent.is_empty() {
            return "(no commands run yet in this repository)".to_string();
        }
        recent
            .iter()
            .map(|r| {
                format!(
                    "- git {} -> exit {}, {}: {}",
                    r.command, r.exit_code, r.verification.outcome, r.verification.explanation
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Reads and rewrites the per-repository session file wholesale.
pub struct SessionStore {
    storage_path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { storage_path: path }
    }

    /// Store for the repository whose git directory is `git_dir`.
    pub fn for_git_dir(git_dir: &Path) -> Self {
        Self::new(git_dir.join(SESSION_DIR).join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.storage_path
    }

    pub fn load(&self) -> Result<Option<Session>> {
        if !self.storage_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.storage_path)
            .with_context(|| format!("Failed to read session file {:?}", self.storage_path))?;
        let session = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt session file {:?}", self.storage_path))?;
        Ok(Some(session))
    }

    pub fn load_or_create(&self, repo_path: &Path) -> Result<Session> {
        Ok(self
            .load()?
            .unwrap_or_else(|| Session::new(repo_path.to_path_buf())))
    }

    /// Drops the unfinished workflow and saves. An unreadable file is
    /// replaced by a fresh session; returns true if anything was discarded.
    pub fn reset(&self, repo_path: &Path) -> Result<bool> {
        let (mut session, discarded) = match self.load() {
            Ok(loaded) => {
                let mut session = loaded.unwrap_or_else(|| Session::new(repo_path.to_path_buf()));
                let discarded = session.discard_workflow();
                (session, discarded)
            }
            Err(e) => {
                tracing::warn!("Replacing unreadable session: {:#}", e);
                (Session::new(repo_path.to_path_buf()), true)
            }
        };
        self.save(&mut session)?;
        Ok(discarded)
    }

    pub fn save(&self, session: &mut Session) -> Result<()> {
        session.updated_at = Utc::now();
        if let Some(parent) = self.storage_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(session)?;
        fs::write(&self.storage_path, json)
            .with_context(|| format!("Failed to write session file {:?}", self.storage_path))?;
        Ok(())
    }
}
