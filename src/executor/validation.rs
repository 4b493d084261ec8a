use crate::config::SecurityConfig;
use crate::workflow::PlannedStep;
use anyhow::{anyhow, Result};
use regex::Regex;

use super::parse_command;

/// Subcommands the assistant is willing to run.
pub const ALLOWED_SUBCOMMANDS: &[&str] = &[
    // read
    "status", "log", "show", "diff", "branch", "tag", "remote", "reflog", "blame",
    "describe", "rev-parse", "ls-files", "shortlog",
    // write
    "add", "rm", "mv", "commit", "checkout", "switch", "restore", "reset", "revert",
    "merge", "rebase", "cherry-pick", "stash", "clean", "init",
    // remote
    "push", "pull", "fetch", "clone",
    // repo-level config
    "config",
];

const SHELL_OPERATORS: &[&str] = &["&&", "||", "|", ";", ">", ">>", "<", "&"];

const DEFAULT_COMMIT_MESSAGE: &str = "Commit created by gitagent";

pub struct CommandValidator {
    dangerous_patterns: Vec<String>,
    short_cluster: Regex,
}

impl CommandValidator {
    pub fn new(security: &SecurityConfig) -> Self {
        Self {
            dangerous_patterns: security.dangerous_commands.clone(),
            short_cluster: Regex::new(r"^-[A-Za-z]+$").expect("static regex"),
        }
    }

    pub fn validate_plan(&self, steps: &[PlannedStep]) -> ValidationReport {
        let mut report = ValidationReport::new();

        for (i, step) in steps.iter().enumerate() {
            if let Err(e) = self.validate_command(&step.command) {
                report.add_error(ValidationError {
                    step_index: i,
                    message: e.to_string(),
                });
                continue;
            }

            if step.is_dangerous || self.is_dangerous_command(&step.command) {
                report.add_warning(ValidationWarning {
                    step_index: i,
                    message: format!("Potentially destructive command: git {}", step.command),
                    severity: WarningSeverity::High,
                });
            }

            if step.expected_outcome.trim().is_empty() {
                report.add_warning(ValidationWarning {
                    step_index: i,
                    message: "No expected outcome given".to_string(),
                    severity: WarningSeverity::Low,
                });
            }
        }

        report
    }

    pub fn validate_command(&self, command: &str) -> Result<()> {
        let args = parse_command(command)?;
        let subcommand = args[0].as_str();

        if !ALLOWED_SUBCOMMANDS.contains(&subcommand) {
            return Err(anyhow!("Unsupported git subcommand: {}", subcommand));
        }

        if let Some(op) = args.iter().find(|a| SHELL_OPERATORS.contains(&a.as_str())) {
            return Err(anyhow!(
                "Shell operator '{}' is not supported; use one step per git command",
                op
            ));
        }

        if let Some(flag) = self.interactive_flag(subcommand, &args[1..]) {
            return Err(anyhow!(
                "Interactive flag '{}' for git {} would block waiting for input",
                flag,
                subcommand
            ));
        }

        Ok(())
    }

    pub fn is_dangerous_command(&self, command: &str) -> bool {
        if self
            .dangerous_patterns
            .iter()
            .any(|pattern| command.contains(pattern.as_str()))
        {
            return true;
        }

        // Force flags can appear anywhere after `push`
        match parse_command(command) {
            Ok(args) => {
                args[0] == "push"
                    && args[1..].iter().any(|a| {
                        a == "--force"
                            || a.starts_with("--force-with-lease")
                            || self.cluster_has(a, 'f')
                    })
            }
            Err(_) => false,
        }
    }

    /// Rewrites a command so it never waits on an editor.
    pub fn normalize(&self, command: &str) -> Result<String> {
        let mut args = parse_command(command)?;
        let has = |args: &[String], flags: &[&str]| {
            args.iter()
                .any(|a| flags.iter().any(|f| a == f || a.starts_with(&format!("{}=", f))))
        };

        match args[0].as_str() {
            "merge" => {
                let control = ["--abort", "--continue", "--quit", "--no-edit", "--edit", "-e", "-m"];
                if !has(&args, &control) {
                    args.push("--no-edit".to_string());
                }
            }
            "commit" => {
                let message = [
                    "-m", "--message", "-F", "--file", "-C", "--reuse-message", "--no-edit",
                    "--fixup", "--squash",
                ];
                let has_message = has(&args, &message)
                    || args[1..].iter().any(|a| {
                        // -am "msg" style clusters
                        self.cluster_has(a, 'm') || (a.starts_with("-m") && a.len() > 2)
                    });
                if !has_message {
                    if has(&args, &["--amend"]) {
                        args.push("--no-edit".to_string());
                    } else {
                        args.push("-m".to_string());
                        args.push(DEFAULT_COMMIT_MESSAGE.to_string());
                    }
                }
            }
            _ => {}
        }

        shlex::try_join(args.iter().map(String::as_str))
            .map_err(|e| anyhow!("Cannot quote command {:?}: {:?}", args, e))
    }

    fn interactive_flag<'a>(&self, subcommand: &str, rest: &'a [String]) -> Option<&'a str> {
        let (long, short): (&[&str], &[char]) = match subcommand {
            "add" => (&["--interactive", "--patch", "--edit"], &['i', 'p', 'e']),
            "commit" => (&["--patch", "--interactive"], &['p']),
            "checkout" | "reset" | "restore" | "stash" => (&["--patch"], &['p']),
            "clean" => (&["--interactive"], &['i']),
            "rebase" => (&["--interactive", "--edit-todo"], &['i']),
            _ => return None,
        };

        rest.iter()
            .find(|a| {
                long.contains(&a.as_str()) || short.iter().any(|c| self.cluster_has(a, *c))
            })
            .map(String::as_str)
    }

    fn cluster_has(&self, arg: &str, flag: char) -> bool {
        self.short_cluster.is_match(arg) && arg[1..].contains(flag)
    }
}

#[derive(Debug)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Indices of steps carrying a high severity warning.
    pub fn dangerous_steps(&self) -> Vec<usize> {
        self.warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::High)
            .map(|w| w.step_index)
            .collect()
    }

    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("step {}: {}", e.step_index + 1, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug)]
pub struct ValidationError {
    pub step_index: usize,
    pub message: String,
}

#[derive(Debug)]
pub struct ValidationWarning {
    pub step_index: usize,
    pub message: String,
    pub severity: WarningSeverity,
}

#[derive(Debug, PartialEq)]
pub enum WarningSeverity {
    Low,
    High,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> CommandValidator {
        CommandValidator::new(&SecurityConfig::default())
    }

    fn step(command: &str) -> PlannedStep {
        PlannedStep::new(command, "because", "it works")
    }

    #[test]
    fn accepts_plain_git_commands() {
        let v = validator();
        assert!(v.validate_command("checkout -b feature").is_ok());
        assert!(v.validate_command(r#"commit -m "a && b""#).is_ok());
        assert!(v.validate_command("git push -u origin feature").is_ok());
    }

    #[test]
    fn rejects_unknown_subcommands_and_shell_operators() {
        let v = validator();
        assert!(v.validate_command("gc --prune=now").is_err());
        assert!(v.validate_command("status && rm -rf .").is_err());
        assert!(v.validate_command("log | head").is_err());
    }

    #[test]
    fn rejects_interactive_flags() {
        let v = validator();
        assert!(v.validate_command("rebase -i main").is_err());
        assert!(v.validate_command("add -p").is_err());
        assert!(v.validate_command("add --patch src").is_err());
        assert!(v.validate_command("clean -fi").is_err());
        // -i means --include for commit
        assert!(v.validate_command("commit -i -m msg file.txt").is_ok());
        assert!(v.validate_command("rebase main").is_ok());
    }

    #[test]
    fn flags_force_pushes_anywhere_in_the_command() {
        let v = validator();
        assert!(v.is_dangerous_command("push origin main --force"));
        assert!(v.is_dangerous_command("push -fu origin main"));
        assert!(v.is_dangerous_command("push --force-with-lease"));
        assert!(v.is_dangerous_command("reset --hard HEAD~1"));
        assert!(!v.is_dangerous_command("push origin main"));
        assert!(!v.is_dangerous_command("branch -d merged"));
    }

    #[test]
    fn normalize_keeps_commands_non_interactive() {
        let v = validator();
        let normalized = |cmd: &str| parse_command(&v.normalize(cmd).unwrap()).unwrap();

        assert_eq!(normalized("git merge feature"), ["merge", "feature", "--no-edit"]);
        assert_eq!(normalized("merge --abort"), ["merge", "--abort"]);
        assert_eq!(normalized("commit"), ["commit", "-m", DEFAULT_COMMIT_MESSAGE]);
        assert_eq!(normalized("commit --amend"), ["commit", "--amend", "--no-edit"]);
        assert_eq!(normalized(r#"commit -am "wip: parser""#), ["commit", "-am", "wip: parser"]);
        assert_eq!(normalized("status"), ["status"]);
    }

    #[test]
    fn plan_report_collects_errors_and_warnings() {
        let v = validator();
        let steps = vec![
            step("status"),
            step("rebase -i HEAD~3"),
            step("reset --hard origin/main"),
        ];
        let report = v.validate_plan(&steps);

        assert!(report.has_errors());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].step_index, 1);
        assert!(report.error_summary().starts_with("step 2:"));
        assert_eq!(report.dangerous_steps(), vec![2]);
    }
}
