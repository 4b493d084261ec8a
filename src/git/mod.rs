use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::error::AgentError;
use crate::executor::{CommandOutput, GitExecutor};

/// Read-side view of one repository: discovery, snapshots and planner context.
pub struct GitManager {
    repo_path: PathBuf,
    git_dir: PathBuf,
    executor: GitExecutor,
}

impl GitManager {
    /// Finds the repository containing `path`.
    pub fn discover(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(AgentError::Environment(format!(
                "Not a directory: {}",
                path.display()
            )));
        }

        let probe = GitExecutor::new(path)?;
        let toplevel = probe
            .run_args(&["rev-parse", "--show-toplevel"])
            .map_err(|e| AgentError::Environment(e.to_string()))?;
        if !toplevel.success() || toplevel.stdout.trim().is_empty() {
            return Err(AgentError::Environment(format!(
                "Not inside a Git repository: {}",
                path.display()
            )));
        }
        let repo_path = PathBuf::from(toplevel.stdout.trim());

        let executor = probe.with_work_dir(&repo_path);
        let git_dir = executor
            .run_args(&["rev-parse", "--absolute-git-dir"])
            .map_err(|e| AgentError::Environment(e.to_string()))?;
        if !git_dir.success() {
            return Err(AgentError::Environment(format!(
                "Could not locate the git directory: {}",
                git_dir.stderr.trim()
            )));
        }

        Ok(Self {
            repo_path,
            git_dir: PathBuf::from(git_dir.stdout.trim()),
            executor,
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn executor(&self) -> &GitExecutor {
        &self.executor
    }

    fn git(&self, args: &[&str]) -> Result<CommandOutput> {
        self.executor.run_args(args)
    }

    /// Checked-out branch name, `None` when HEAD is detached.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let output = self.git(&["symbolic-ref", "--quiet", "--short", "HEAD"])?;
        Ok(output
            .success()
            .then(|| output.stdout.trim().to_string())
            .filter(|b| !b.is_empty()))
    }

    /// Commit id of HEAD, `None` on an unborn branch.
    pub fn head(&self) -> Result<Option<String>> {
        let output = self.git(&["rev-parse", "--verify", "--quiet", "HEAD"])?;
        Ok(output
            .success()
            .then(|| output.stdout.trim().to_string())
            .filter(|h| !h.is_empty()))
    }

    /// Commit id `rev` points at, `None` if it names no commit.
    pub fn resolve_commit(&self, rev: &str) -> Result<Option<String>> {
        let spec = format!("{}^{{commit}}", rev);
        let output = self.git(&["rev-parse", "--verify", "--quiet", &spec])?;
        Ok(output
            .success()
            .then(|| output.stdout.trim().to_string())
            .filter(|h| !h.is_empty()))
    }

    pub fn branches(&self) -> Result<Vec<String>> {
        let output = self.git(&["for-each-ref", "--format=%(refname:short)", "refs/heads/"])?;
        if !output.success() {
            anyhow::bail!("Failed to list branches: {}", output.stderr.trim());
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    pub fn branch_exists(&self, name: &str) -> Result<bool> {
        let refname = format!("refs/heads/{}", name);
        Ok(self
            .git(&["show-ref", "--verify", "--quiet", &refname])?
            .success())
    }

    pub fn analyze_changes(&self) -> Result<GitChanges> {
        let status = self.git(&["status", "--porcelain"])?;
        if !status.success() {
            anyhow::bail!("Failed to get git status: {}", status.stderr.trim());
        }
        Ok(GitChanges::parse(&status.stdout))
    }

    /// Commits on HEAD not yet on its upstream, `None` without an upstream.
    pub fn ahead_of_upstream(&self) -> Result<Option<u32>> {
        let output = self.git(&["rev-list", "--count", "@{upstream}..HEAD"])?;
        if !output.success() {
            return Ok(None);
        }
        Ok(output.stdout.trim().parse().ok())
    }

    pub fn snapshot(&self) -> Result<RepoSnapshot> {
        Ok(RepoSnapshot {
            branch: self.current_branch()?,
            head: self.head()?,
            branches: self.branches()?,
            changes: self.analyze_changes()?,
            ahead: self.ahead_of_upstream()?,
        })
    }

    /// Condensed state handed to the planner.
    pub fn context(&self, log_entries: usize) -> Result<RepoContext> {
        let log_arg = format!("-{}", log_entries.max(1));
        let current_branch = self
            .current_branch()
            .context("Failed to read current branch")?
            .unwrap_or_else(|| "HEAD (detached)".to_string());

        Ok(RepoContext {
            current_branch,
            status: self.read(&["status", "--short", "--branch"]),
            branches: self.read(&["branch", "-vv"]),
            remote_branches: self.read(&["branch", "-r"]),
            recent_commits: self.read(&["log", &log_arg, "--oneline", "--decorate"]),
            diff_stat: self.read(&["diff", "--stat", "HEAD"]),
            unpushed_commits: self.read(&["log", "@{upstream}..HEAD", "--oneline"]),
            remotes: self.read(&["remote", "-v"]),
        })
    }

    // Context fields are informational, so failures are shown rather than raised.
    fn read(&self, args: &[&str]) -> String {
        match self.git(args) {
            Ok(output) if output.success() => {
                let text = output.stdout.trim();
                if text.is_empty() {
                    "(none)".to_string()
                } else {
                    text.to_string()
                }
            }
            Ok(output) => format!("(unavailable: {})", output.stderr.trim()),
            Err(e) => format!("(unavailable: {})", e),
        }
    }
}

/// Working tree and index state parsed from `git status --porcelain`.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitChanges {
    pub staged_modified: Vec<String>,
    pub staged_added: Vec<String>,
    pub staged_deleted: Vec<String>,
    pub unstaged_modified: Vec<String>,
    pub unstaged_deleted: Vec<String>,
    pub untracked: Vec<String>,
    pub conflicted: Vec<String>,
}

impl GitChanges {
    pub fn parse(porcelain: &str) -> Self {
        let mut changes = GitChanges::default();

        for line in porcelain.lines() {
            if line.len() < 4 {
                continue;
            }
            let mut codes = line.chars();
            let (index, worktree) = match (codes.next(), codes.next()) {
                (Some(x), Some(y)) => (x, y),
                _ => continue,
            };
            let file = line[3..].trim().to_string();

            match (index, worktree) {
                ('?', '?') => changes.untracked.push(file),
                ('!', '!') => {}
                ('U', _) | (_, 'U') | ('A', 'A') | ('D', 'D') => changes.conflicted.push(file),
                (x, y) => {
                    match x {
                        'M' | 'R' | 'C' | 'T' => changes.staged_modified.push(file.clone()),
                        'A' => changes.staged_added.push(file.clone()),
                        'D' => changes.staged_deleted.push(file.clone()),
                        _ => {}
                    }
                    match y {
                        'M' | 'T' => changes.unstaged_modified.push(file),
                        'D' => changes.unstaged_deleted.push(file),
                        _ => {}
                    }
                }
            }
        }

        changes
    }

    pub fn has_staged(&self) -> bool {
        !(self.staged_modified.is_empty()
            && self.staged_added.is_empty()
            && self.staged_deleted.is_empty())
    }

    pub fn has_unstaged(&self) -> bool {
        !(self.unstaged_modified.is_empty() && self.unstaged_deleted.is_empty())
    }

    /// No staged, unstaged, untracked or conflicted paths.
    pub fn is_clean(&self) -> bool {
        !self.has_staged()
            && !self.has_unstaged()
            && self.untracked.is_empty()
            && self.conflicted.is_empty()
    }
}

/// Repository state captured around a step, stored with the step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSnapshot {
    pub branch: Option<String>,
    pub head: Option<String>,
    pub branches: Vec<String>,
    pub changes: GitChanges,
    pub ahead: Option<u32>,
}

impl RepoSnapshot {
    pub fn has_branch(&self, name: &str) -> bool {
        self.branches.iter().any(|b| b == name)
    }
}

#[derive(Debug, Clone)]
pub struct RepoContext {
    pub current_branch: String,
    pub status: String,
    pub branches: String,
    pub remote_branches: String,
    pub recent_commits: String,
    pub diff_stat: String,
    pub unpushed_commits: String,
    pub remotes: String,
}

impl RepoContext {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Current branch: {}", self.current_branch);
        for (label, value) in [
            ("Status", &self.status),
            ("Local branches", &self.branches),
            ("Remote branches", &self.remote_branches),
            ("Recent commits", &self.recent_commits),
            ("Uncommitted changes (diff --stat)", &self.diff_stat),
            ("Unpushed commits", &self.unpushed_commits),
            ("Remotes", &self.remotes),
        ] {
            let _ = writeln!(out, "{}:\n{}", label, indent(value));
        }
        out
    }
}

pub(crate) fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("  {}", l))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_porcelain_status() {
        let porcelain = "M  src/lib.rs\n M README.md\nA  new.rs\n D gone.rs\nD  removed.rs\n?? notes.txt\nUU conflict.rs\nMM both.rs\n";
        let changes = GitChanges::parse(porcelain);

        assert_eq!(changes.staged_modified, vec!["src/lib.rs", "both.rs"]);
        assert_eq!(changes.staged_added, vec!["new.rs"]);
        assert_eq!(changes.staged_deleted, vec!["removed.rs"]);
        assert_eq!(changes.unstaged_modified, vec!["README.md", "both.rs"]);
        assert_eq!(changes.unstaged_deleted, vec!["gone.rs"]);
        assert_eq!(changes.untracked, vec!["notes.txt"]);
        assert_eq!(changes.conflicted, vec!["conflict.rs"]);
        assert!(changes.has_staged());
        assert!(!changes.is_clean());
    }

    #[test]
    fn empty_status_is_clean() {
        let changes = GitChanges::parse("");
        assert!(changes.is_clean());
        assert!(!changes.has_staged());
    }

    #[test]
    fn discover_fails_outside_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        match GitManager::discover(dir.path()) {
            Err(AgentError::Environment(msg)) => assert!(msg.contains("Not inside a Git repository")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected an environment error"),
        }
    }

    #[test]
    fn render_labels_every_section() {
        let context = RepoContext {
            current_branch: "main".to_string(),
            status: "## main".to_string(),
            branches: "* main".to_string(),
            remote_branches: "(none)".to_string(),
            recent_commits: "abc123 initial".to_string(),
            diff_stat: "(none)".to_string(),
            unpushed_commits: "(none)".to_string(),
            remotes: "(none)".to_string(),
        };
        let text = context.render();
        assert!(text.starts_with("Current branch: main\n"));
        assert!(text.contains("Recent commits:\n  abc123 initial"));
        assert!(text.contains("Remotes:\n  (none)"));
    }
}
