//! Planned workflows and their step-by-step state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::executor::CommandOutput;
use crate::git::RepoSnapshot;
use crate::theme::Theme;
use crate::verify::{VerificationOutcome, VerificationResult};

/// Where the controller is inside a workflow.
///
/// `Planning -> AwaitingConfirmation -> Executing -> Verifying`, then back to
/// `AwaitingConfirmation` for the next step, or `Complete` / `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Planning,
    AwaitingConfirmation,
    Executing,
    Verifying,
    Complete,
    Failed,
}

impl WorkflowState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Planning => "planning",
            Self::AwaitingConfirmation => "awaiting confirmation",
            Self::Executing => "executing",
            Self::Verifying => "verifying",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    /// Git command without the leading `git`.
    pub command: String,
    pub rationale: String,
    pub expected_outcome: String,
    #[serde(default)]
    pub verification_commands: Vec<String>,
    #[serde(default)]
    pub is_dangerous: bool,
    #[serde(default)]
    pub status: StepStatus,
    /// Repository state right before the command ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<RepoSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<CommandOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
}

impl PlannedStep {
    pub fn new(
        command: impl Into<String>,
        rationale: impl Into<String>,
        expected_outcome: impl Into<String>,
    ) -> Self {
        Self {
            command: crate::executor::strip_git_prefix(&command.into()),
            rationale: rationale.into(),
            expected_outcome: expected_outcome.into(),
            verification_commands: Vec::new(),
            is_dangerous: false,
            status: StepStatus::Pending,
            snapshot: None,
            output: None,
            verification: None,
        }
    }

    pub fn with_verification_commands(mut self, commands: Vec<String>) -> Self {
        self.verification_commands = commands;
        self
    }

    pub fn dangerous(mut self) -> Self {
        self.is_dangerous = true;
        self
    }

    /// Drops anything recorded by a previous attempt at this step.
    pub fn reset_attempt(&mut self) {
        self.status = StepStatus::Pending;
        self.snapshot = None;
        self.output = None;
        self.verification = None;
    }
}

/// What the planner hands back for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowPlan {
    pub explanation: String,
    pub steps: Vec<PlannedStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub request: String,
    #[serde(default)]
    pub explanation: String,
    pub original_branch: Option<String>,
    /// The failed workflow this one was requested as a follow-up to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_failure: Option<String>,
    pub steps: Vec<PlannedStep>,
    /// Index of the next step to run.
    pub cursor: usize,
    pub state: WorkflowState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// A workflow that has a request but no plan yet.
    pub fn planning(request: impl Into<String>, original_branch: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("wf-{}", now.format("%Y%m%d%H%M%S%3f")),
            request: request.into(),
            explanation: String::new(),
            original_branch,
            previous_failure: None,
            steps: Vec::new(),
            cursor: 0,
            state: WorkflowState::Planning,
            created_at: now,
            updated_at: now,
        }
    }

    /// Planner-facing account of where this workflow stopped.
    pub fn failure_note(&self) -> String {
        let mut note = format!("Request: {}", self.request);
        if let Some(step) = self.current_step() {
            note.push_str(&format!("\nFailed step {}: git {}", self.cursor + 1, step.command));
            if let Some(verification) = &step.verification {
                note.push_str(&format!(
                    "\nResult: {}: {}",
                    verification.outcome, verification.explanation
                ));
            }
        }
        note
    }

    pub fn set_plan(&mut self, plan: WorkflowPlan) {
        self.explanation = plan.explanation;
        self.steps = plan.steps;
        self.cursor = 0;
        self.transition(WorkflowState::AwaitingConfirmation);
    }

    pub fn transition(&mut self, state: WorkflowState) {
        tracing::debug!("workflow {}: {} -> {}", self.id, self.state, state);
        self.state = state;
        self.updated_at = Utc::now();
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    pub fn progress(&self) -> (usize, usize) {
        (self.cursor, self.steps.len())
    }

    pub fn current_step(&self) -> Option<&PlannedStep> {
        self.steps.get(self.cursor)
    }

    pub fn current_step_mut(&mut self) -> Option<&mut PlannedStep> {
        self.steps.get_mut(self.cursor)
    }

    /// Marks the current step and moves the cursor on success.
    pub fn finish_step(&mut self, verification: VerificationResult) {
        let passed = verification.outcome == VerificationOutcome::Success;
        if let Some(step) = self.current_step_mut() {
            step.status = if passed {
                StepStatus::Succeeded
            } else {
                StepStatus::Failed
            };
            step.verification = Some(verification);
        }

        if !passed {
            self.transition(WorkflowState::Failed);
        } else {
            self.cursor += 1;
            if self.cursor >= self.steps.len() {
                self.transition(WorkflowState::Complete);
            } else {
                self.transition(WorkflowState::AwaitingConfirmation);
            }
        }
    }

    pub fn preview(&self, theme: &Theme) -> String {
        let mut preview = String::new();
        preview.push_str(&format!(
            "{} {}\n",
            theme.header.apply("Plan:"),
            theme.explanation.apply(&self.explanation)
        ));

        for (i, step) in self.steps.iter().enumerate() {
            let marker = match step.status {
                StepStatus::Succeeded => theme.success.apply("✓"),
                StepStatus::Failed => theme.failure.apply("✗"),
                StepStatus::Pending if i == self.cursor => theme.header.apply("→"),
                StepStatus::Pending => theme.muted.apply("·"),
            };
            preview.push_str(&format!(
                "  {} {}. {}\n",
                marker,
                i + 1,
                theme.command.apply(&format!("git {}", step.command))
            ));
            preview.push_str(&format!("       {}\n", step.rationale));
            if step.is_dangerous {
                preview.push_str(&format!(
                    "       {}\n",
                    theme.warning.apply("⚠️  This step is potentially destructive!")
                ));
            }
        }

        preview
    }

    /// Plain-text report of what happened, used when no LLM summary is available.
    pub fn local_summary(&self) -> String {
        let mut summary = format!("Request: {}\n", self.request);
        if self.steps.is_empty() {
            summary.push_str("No commands were needed.\n");
        }
        for (i, step) in self.steps.iter().enumerate() {
            let line = match (&step.status, &step.verification) {
                (StepStatus::Succeeded, Some(v)) => format!("✅ Step {}: git {} - {}", i + 1, step.command, v.explanation),
                (StepStatus::Failed, Some(v)) => format!("❌ Step {}: git {} - {}", i + 1, step.command, v.explanation),
                _ => format!("⏸  Step {}: git {} - not run", i + 1, step.command),
            };
            summary.push_str(&line);
            summary.push('\n');
        }
        summary.push_str(&format!("Workflow {}.", self.state));
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(commands: &[&str]) -> WorkflowPlan {
        WorkflowPlan {
            explanation: "test plan".to_string(),
            steps: commands
                .iter()
                .map(|c| PlannedStep::new(*c, "reason", "outcome"))
                .collect(),
        }
    }

    #[test]
    fn set_plan_waits_for_confirmation_at_first_step() {
        let mut wf = Workflow::planning("make a branch", Some("main".to_string()));
        assert_eq!(wf.state, WorkflowState::Planning);

        wf.set_plan(plan(&["git branch feature", "checkout feature"]));
        assert_eq!(wf.state, WorkflowState::AwaitingConfirmation);
        assert_eq!(wf.progress(), (0, 2));
        assert_eq!(wf.current_step().unwrap().command, "branch feature");
    }

    #[test]
    fn finish_step_advances_then_completes() {
        let mut wf = Workflow::planning("two steps", None);
        wf.set_plan(plan(&["status", "log -1"]));

        wf.finish_step(VerificationResult::success("ok"));
        assert_eq!(wf.state, WorkflowState::AwaitingConfirmation);
        assert_eq!(wf.cursor, 1);
        assert_eq!(wf.steps[0].status, StepStatus::Succeeded);

        wf.finish_step(VerificationResult::success("ok"));
        assert_eq!(wf.state, WorkflowState::Complete);
        assert!(wf.is_finished());
        assert!(wf.current_step().is_none());
    }

    #[test]
    fn failed_step_keeps_cursor() {
        let mut wf = Workflow::planning("fail", None);
        wf.set_plan(plan(&["checkout nope", "status"]));

        wf.finish_step(VerificationResult::execution_failure("pathspec did not match"));
        assert_eq!(wf.state, WorkflowState::Failed);
        assert_eq!(wf.cursor, 0);
        assert_eq!(wf.steps[0].status, StepStatus::Failed);
        assert!(wf.local_summary().contains("❌ Step 1: git checkout nope"));
        assert!(wf.local_summary().contains("Step 2: git status - not run"));
    }

    #[test]
    fn state_serializes_as_snake_case() {
        let json = serde_json::to_string(&WorkflowState::AwaitingConfirmation).unwrap();
        assert_eq!(json, "\"awaiting_confirmation\"");
    }
}
