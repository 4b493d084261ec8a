//! Post-execution checks that a git command did what it was meant to do.
//!
//! The exit code alone is not trusted: each recognised command pattern has a
//! rule comparing the repository snapshot taken before the command with the
//! state afterwards.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::executor::{parse_command, CommandOutput};
use crate::git::{GitManager, RepoSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Success,
    SemanticFailure,
    ExecutionFailure,
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::SemanticFailure => "semantic failure",
            Self::ExecutionFailure => "execution failure",
        })
    }
}

/// Output of a read-only command the planner asked us to run afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub command: String,
    pub exit_code: i32,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub outcome: VerificationOutcome,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub probes: Vec<Probe>,
}

impl VerificationResult {
    pub fn success(explanation: impl Into<String>) -> Self {
        Self::new(VerificationOutcome::Success, explanation)
    }

    pub fn semantic_failure(explanation: impl Into<String>) -> Self {
        Self::new(VerificationOutcome::SemanticFailure, explanation)
    }

    pub fn execution_failure(explanation: impl Into<String>) -> Self {
        Self::new(VerificationOutcome::ExecutionFailure, explanation)
    }

    fn new(outcome: VerificationOutcome, explanation: impl Into<String>) -> Self {
        Self {
            outcome,
            explanation: explanation.into(),
            probes: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == VerificationOutcome::Success
    }
}

/// Which semantic check applies to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    CreateBranch { name: String, switch: bool },
    DeleteBranch { name: String },
    SwitchBranch { name: String },
    /// HEAD detached at `target`; `commit` is what it resolved to, if anything.
    Detach { target: String, commit: Option<String> },
    Stage,
    Unstage,
    HardReset,
    Commit,
    Stash,
    Push,
    Integrate,
    ExitCodeOnly,
}

impl Rule {
    /// Classifies `args` (without the leading `git`).
    ///
    /// `resolve` maps a revision to its commit id and returns `None` for
    /// local branch names, which are switched to rather than detached at.
    pub fn classify(
        args: &[String],
        before: &RepoSnapshot,
        is_path: impl Fn(&str) -> bool,
        resolve: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let Some((subcommand, rest)) = args.split_first() else {
            return Rule::ExitCodeOnly;
        };
        let flags: Vec<&str> = rest.iter().map(String::as_str).filter(|a| a.starts_with('-')).collect();
        let positional: Vec<&str> = rest.iter().map(String::as_str).filter(|a| !a.starts_with('-')).collect();
        let has = |names: &[&str]| flags.iter().any(|f| names.contains(f));
        let whole_tree = |p: &str| matches!(p, "." | ":/");
        let value_after = |names: &[&str]| {
            rest.iter()
                .position(|a| names.contains(&a.as_str()))
                .and_then(|i| rest.get(i + 1))
                .cloned()
        };
        let detach = |target: &str| Rule::Detach {
            target: target.to_string(),
            commit: resolve(&anchor_to_head(target, before)),
        };

        match subcommand.as_str() {
            "branch" => {
                if has(&["-d", "-D", "--delete"]) {
                    positional
                        .last()
                        .map(|name| Rule::DeleteBranch { name: name.to_string() })
                        .unwrap_or(Rule::ExitCodeOnly)
                } else if flags.iter().all(|f| matches!(*f, "--track" | "--no-track" | "-t")) {
                    positional
                        .first()
                        .map(|name| Rule::CreateBranch { name: name.to_string(), switch: false })
                        .unwrap_or(Rule::ExitCodeOnly)
                } else {
                    Rule::ExitCodeOnly
                }
            }
            "checkout" => {
                if let Some(name) = value_after(&["-b"]) {
                    Rule::CreateBranch { name, switch: true }
                } else if let Some(name) = value_after(&["-B"]) {
                    Rule::SwitchBranch { name }
                } else if rest.iter().any(|a| a == "--") || positional.len() > 1 {
                    Rule::ExitCodeOnly
                } else if has(&["--detach"]) {
                    detach(positional.first().copied().unwrap_or("HEAD"))
                } else if let Some(name) = positional.first().copied() {
                    if before.has_branch(name) {
                        Rule::SwitchBranch { name: name.to_string() }
                    } else if is_path(name) {
                        Rule::ExitCodeOnly
                    } else if resolve(&anchor_to_head(name, before)).is_some() {
                        detach(name)
                    } else {
                        // remote-tracking branch that git checks out as a new local one
                        Rule::SwitchBranch { name: name.to_string() }
                    }
                } else {
                    Rule::ExitCodeOnly
                }
            }
            "switch" => {
                if let Some(name) = value_after(&["-c", "--create"]) {
                    Rule::CreateBranch { name, switch: true }
                } else if let Some(name) = value_after(&["-C", "--force-create"]) {
                    Rule::SwitchBranch { name }
                } else if has(&["--detach", "-d"]) && positional.len() <= 1 {
                    detach(positional.first().copied().unwrap_or("HEAD"))
                } else if has(&["--detach", "-d"]) || positional.len() != 1 {
                    Rule::ExitCodeOnly
                } else {
                    Rule::SwitchBranch { name: positional[0].to_string() }
                }
            }
            "add" if !has(&["-n", "--dry-run"]) => Rule::Stage,
            "restore" if has(&["--staged", "-S"]) && !has(&["--worktree", "-W"]) => {
                if !positional.is_empty() && positional.iter().all(|p| whole_tree(*p)) {
                    Rule::Unstage
                } else {
                    Rule::ExitCodeOnly
                }
            }
            "reset" => {
                if has(&["--hard"]) {
                    Rule::HardReset
                } else if has(&["--soft", "--merge", "--keep"]) {
                    Rule::ExitCodeOnly
                } else if positional.iter().all(|p| whole_tree(*p) || !is_path(*p)) {
                    // commit-ish plus whole-tree pathspec leaves nothing staged
                    Rule::Unstage
                } else {
                    Rule::ExitCodeOnly
                }
            }
            "commit" if !has(&["--dry-run"]) => Rule::Commit,
            "stash" => {
                let keeps_some = has(&["-k", "--keep-index", "-p", "--patch", "-S", "--staged"]);
                match rest.first().map(String::as_str).filter(|a| !a.starts_with('-')) {
                    None | Some("push") => {
                        let message = value_after(&["-m", "--message"]);
                        let pathspec = rest.iter().any(|a| a == "--")
                            || positional
                                .iter()
                                .any(|p| *p != "push" && Some(*p) != message.as_deref());
                        if keeps_some || pathspec {
                            Rule::ExitCodeOnly
                        } else {
                            Rule::Stash
                        }
                    }
                    Some("save") if !keeps_some => Rule::Stash,
                    _ => Rule::ExitCodeOnly,
                }
            }
            "push" if !has(&["--dry-run", "-n", "--tags", "--delete", "-d"]) => match positional.as_slice() {
                [] | [_] => Rule::Push,
                [_, refspec] => {
                    // only the checked-out branch has its upstream in the snapshot
                    let names_current = |r: &str| {
                        let r = r.strip_prefix("refs/heads/").unwrap_or(r);
                        r == "HEAD" || Some(r) == before.branch.as_deref()
                    };
                    let refspec = refspec.trim_start_matches('+');
                    let (src, dst) = refspec.split_once(':').unwrap_or((refspec, refspec));
                    if names_current(src) && (dst == src || names_current(dst)) {
                        Rule::Push
                    } else {
                        Rule::ExitCodeOnly
                    }
                }
                _ => Rule::ExitCodeOnly,
            },
            "merge" | "pull" | "rebase" | "cherry-pick" | "revert" if !has(&["--abort", "--quit"]) => Rule::Integrate,
            _ => Rule::ExitCodeOnly,
        }
    }

    /// Checks that must hold before the command, whatever its exit code.
    fn precondition(&self, before: &RepoSnapshot) -> Option<VerificationResult> {
        match self {
            Rule::CreateBranch { name, .. } if before.has_branch(name) => Some(
                VerificationResult::semantic_failure(format!(
                    "Branch '{}' already existed before the command; nothing was created",
                    name
                )),
            ),
            Rule::DeleteBranch { name } if !before.has_branch(name) => Some(
                VerificationResult::semantic_failure(format!(
                    "Branch '{}' did not exist, so nothing could be deleted",
                    name
                )),
            ),
            _ => None,
        }
    }

    fn postcondition(&self, before: &RepoSnapshot, after: &RepoSnapshot) -> VerificationResult {
        let on_branch = after.branch.as_deref().unwrap_or("a detached HEAD");
        match self {
            Rule::CreateBranch { name, switch } => {
                if !after.has_branch(name) {
                    VerificationResult::semantic_failure(format!(
                        "Branch '{}' does not exist after the command",
                        name
                    ))
                } else if *switch && after.branch.as_deref() != Some(name.as_str()) {
                    VerificationResult::semantic_failure(format!(
                        "Branch '{}' was created but HEAD is on {}",
                        name, on_branch
                    ))
                } else if *switch {
                    VerificationResult::success(format!("Branch '{}' created and checked out", name))
                } else {
                    VerificationResult::success(format!("Branch '{}' now exists", name))
                }
            }
            Rule::DeleteBranch { name } => {
                if after.has_branch(name) {
                    VerificationResult::semantic_failure(format!(
                        "Branch '{}' still exists after deletion",
                        name
                    ))
                } else {
                    VerificationResult::success(format!("Branch '{}' deleted", name))
                }
            }
            Rule::SwitchBranch { name } => {
                if after.branch.as_deref() == Some(name.as_str()) {
                    VerificationResult::success(format!("HEAD is on '{}'", name))
                } else {
                    VerificationResult::semantic_failure(format!(
                        "Expected to be on branch '{}', but on {}",
                        name, on_branch
                    ))
                }
            }
            Rule::Detach { target, commit } => match (&after.branch, commit) {
                (Some(branch), _) => VerificationResult::semantic_failure(format!(
                    "Expected a detached HEAD at '{}', but on branch '{}'",
                    target, branch
                )),
                (None, Some(commit)) if after.head.as_deref() != Some(commit.as_str()) => {
                    VerificationResult::semantic_failure(format!(
                        "HEAD is detached at {} instead of '{}' ({})",
                        after.head.as_deref().map(short_hash).unwrap_or_default(),
                        target,
                        short_hash(commit)
                    ))
                }
                _ => VerificationResult::success(format!("HEAD is detached at '{}'", target)),
            },
            Rule::Stage => {
                if after.changes.has_staged() {
                    VerificationResult::success("Changes are staged")
                } else if after.changes.is_clean() {
                    VerificationResult::success("Nothing to stage; working tree is clean")
                } else {
                    VerificationResult::semantic_failure("No changes were staged")
                }
            }
            Rule::Unstage => {
                if after.changes.has_staged() {
                    VerificationResult::semantic_failure("Changes are still staged")
                } else {
                    VerificationResult::success("Nothing is staged")
                }
            }
            Rule::HardReset | Rule::Stash => {
                if after.changes.has_staged() || after.changes.has_unstaged() {
                    VerificationResult::semantic_failure("Tracked changes remain in the working tree")
                } else {
                    VerificationResult::success("Working tree has no tracked changes")
                }
            }
            Rule::Commit => {
                if after.head.is_some() && after.head != before.head {
                    VerificationResult::success(format!(
                        "New commit {} created",
                        after.head.as_deref().map(short_hash).unwrap_or_default()
                    ))
                } else {
                    VerificationResult::semantic_failure("HEAD did not move; no commit was created")
                }
            }
            Rule::Push => match after.ahead {
                Some(0) => VerificationResult::success("Branch is up to date with its upstream"),
                Some(n) => VerificationResult::semantic_failure(format!(
                    "Branch is still {} commit(s) ahead of its upstream",
                    n
                )),
                None => VerificationResult::success("Push completed; no upstream to compare against"),
            },
            Rule::Integrate => {
                if after.changes.conflicted.is_empty() {
                    VerificationResult::success("No unresolved conflicts")
                } else {
                    VerificationResult::semantic_failure(format!(
                        "Unresolved conflicts in: {}",
                        after.changes.conflicted.join(", ")
                    ))
                }
            }
            Rule::ExitCodeOnly => VerificationResult::success("Command exited successfully"),
        }
    }
}

fn short_hash(hash: &str) -> String {
    hash.chars().take(7).collect()
}

/// Rewrites `HEAD~1`, `@^` and friends against the HEAD recorded before the
/// command ran.
fn anchor_to_head(rev: &str, before: &RepoSnapshot) -> String {
    let Some(head) = before.head.as_deref() else {
        return rev.to_string();
    };
    if let Some(suffix) = rev.strip_prefix("HEAD") {
        return format!("{}{}", head, suffix);
    }
    match rev.strip_prefix('@') {
        Some(suffix) if suffix.is_empty() || suffix.starts_with(['~', '^']) => format!("{}{}", head, suffix),
        _ => rev.to_string(),
    }
}

/// `branch`/`tag` invocations that only list refs.
fn lists_refs(args: &[&str]) -> bool {
    const LISTING_FLAGS: &[&str] = &[
        "-a", "--all", "-r", "--remotes", "-v", "-vv", "--verbose", "--list", "-l", "--show-current",
    ];
    // take a commit or pattern; the value may be left out
    const FILTER_FLAGS: &[&str] = &[
        "--contains", "--no-contains", "--merged", "--no-merged", "--points-at", "--sort", "--format",
    ];
    let listing = args.iter().any(|a| matches!(*a, "--list" | "-l"));
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if FILTER_FLAGS.contains(arg) {
            iter.next();
        } else if !(LISTING_FLAGS.contains(arg)
            || FILTER_FLAGS.iter().any(|f| arg.strip_prefix(f).is_some_and(|v| v.starts_with('=')))
            || (listing && !arg.starts_with('-')))
        {
            return false;
        }
    }
    true
}

/// True for git commands that only read repository state.
pub fn is_read_only(args: &[String]) -> bool {
    let Some((subcommand, rest)) = args.split_first() else {
        return false;
    };
    let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
    if rest.iter().any(|a| a.starts_with("--output")) {
        return false;
    }

    match subcommand.as_str() {
        "status" | "log" | "diff" | "show" | "rev-parse" | "ls-files" | "describe"
        | "show-ref" | "for-each-ref" | "rev-list" | "shortlog" | "cat-file" => true,
        "reflog" => !matches!(rest.first(), Some(&"expire") | Some(&"delete")),
        "branch" | "tag" => lists_refs(&rest),
        "remote" => rest.is_empty() || rest == ["-v"] || matches!(rest.first(), Some(&"show") | Some(&"get-url")),
        "stash" => matches!(rest.first(), Some(&"list") | Some(&"show")),
        _ => false,
    }
}

pub struct Verifier<'a> {
    repo: &'a GitManager,
}

impl<'a> Verifier<'a> {
    pub fn new(repo: &'a GitManager) -> Self {
        Self { repo }
    }

    /// Decides whether `command` achieved its intended outcome.
    pub fn verify(
        &self,
        command: &str,
        output: &CommandOutput,
        before: &RepoSnapshot,
        probes: &[String],
    ) -> Result<VerificationResult> {
        let args = parse_command(command)?;
        let root = self.repo.repo_path();
        let rule = Rule::classify(
            &args,
            before,
            |p| root.join(p).exists(),
            |rev| match self.repo.branch_exists(rev) {
                Ok(false) => self.repo.resolve_commit(rev).ok().flatten(),
                _ => None,
            },
        );
        tracing::debug!("verifying `git {}` with {:?}", command, rule);

        if let Some(failure) = rule.precondition(before) {
            return Ok(failure);
        }

        if !output.success() {
            return Ok(VerificationResult::execution_failure(format!(
                "git exited with code {}: {}",
                output.exit_code,
                output.text()
            )));
        }

        let after = self.repo.snapshot()?;
        let mut result = rule.postcondition(before, &after);
        if !result.is_success() {
            return Ok(result);
        }

        for probe in probes {
            let probe_args = match parse_command(probe) {
                Ok(args) if is_read_only(&args) => args,
                _ => {
                    tracing::debug!("skipping verification probe `{}`", probe);
                    continue;
                }
            };
            let probe_output = self.repo.executor().run_args(&probe_args)?;
            result.probes.push(Probe {
                command: crate::executor::strip_git_prefix(probe),
                exit_code: probe_output.exit_code,
                output: probe_output.text().to_string(),
            });
            if !probe_output.success() {
                result.outcome = VerificationOutcome::SemanticFailure;
                result.explanation = format!(
                    "Verification probe `git {}` failed: {}",
                    crate::executor::strip_git_prefix(probe),
                    probe_output.text()
                );
                break;
            }
        }

        Ok(result)
    }
}
