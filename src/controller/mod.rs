//! Drives one workflow from request to summary, persisting after every
//! state transition so an interrupted run can be continued.

mod prompt;

pub use prompt::{Prompter, TerminalPrompter};

use anyhow::{anyhow, Result};
use chrono::Utc;

use crate::ai::Planner;
use crate::config::Config;
use crate::error::AgentError;
use crate::executor::validation::CommandValidator;
use crate::executor::CommandOutput;
use crate::git::{indent, GitManager};
use crate::session::{CommandRecord, Session, SessionStore};
use crate::theme::Theme;
use crate::verify::{VerificationOutcome, VerificationResult, Verifier};
use crate::workflow::{Workflow, WorkflowState};

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every step ran and verified.
    Completed {
        workflow_id: String,
        executed: usize,
        summary: String,
    },
    /// The planner answered without proposing commands.
    Answered { explanation: String },
    /// The user declined `step` (1-based); the workflow waits there.
    Declined { step: usize, command: String },
    Failed {
        step: usize,
        command: String,
        verification: VerificationResult,
        output: Option<CommandOutput>,
    },
}

impl RunOutcome {
    /// The error the binary reports for this outcome, if any.
    pub fn error(&self) -> Option<AgentError> {
        match self {
            Self::Failed {
                command,
                verification,
                output,
                ..
            } => Some(match verification.outcome {
                VerificationOutcome::ExecutionFailure => AgentError::Execution {
                    command: command.clone(),
                    exit_code: output.as_ref().map(|o| o.exit_code).unwrap_or(-1),
                    stderr: output
                        .as_ref()
                        .map(|o| o.text().to_string())
                        .unwrap_or_else(|| verification.explanation.clone()),
                },
                _ => AgentError::Verification {
                    command: command.clone(),
                    explanation: verification.explanation.clone(),
                },
            }),
            _ => None,
        }
    }
}

pub struct Controller<P, U> {
    repo: GitManager,
    store: SessionStore,
    session: Session,
    config: Config,
    theme: Theme,
    planner: P,
    prompter: U,
    validator: CommandValidator,
    auto_approve: bool,
}

impl<P: Planner, U: Prompter> Controller<P, U> {
    pub fn new(repo: GitManager, config: Config, planner: P, prompter: U) -> Result<Self> {
        let store = SessionStore::for_git_dir(repo.git_dir());
        let session = store.load_or_create(repo.repo_path())?;
        let auto_approve = !config.security.require_confirmation;

        Ok(Self {
            theme: Theme::named(&config.display.theme),
            validator: CommandValidator::new(&config.security),
            repo,
            store,
            session,
            config,
            planner,
            prompter,
            auto_approve,
        })
    }

    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = self.auto_approve || auto_approve;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn repo(&self) -> &GitManager {
        &self.repo
    }

    pub fn planner(&self) -> &P {
        &self.planner
    }

    pub fn prompter(&self) -> &U {
        &self.prompter
    }

    /// Plans `request` and runs it, replacing any unfinished workflow.
    pub async fn run_request(&mut self, request: &str) -> Result<RunOutcome> {
        let request = request.trim();
        if request.is_empty() {
            return Err(anyhow!("Empty request"));
        }
        self.start_workflow(request, None)?;
        self.drive().await
    }

    /// Continues the unfinished workflow from its persisted state.
    pub async fn resume(&mut self) -> Result<RunOutcome> {
        let workflow = self
            .session
            .workflow
            .as_mut()
            .filter(|w| !w.is_finished())
            .ok_or_else(|| anyhow!("No unfinished workflow to continue"))?;

        if workflow.state == WorkflowState::Executing {
            // Nothing was captured, so the step is confirmed again
            if let Some(step) = workflow.current_step_mut() {
                step.reset_attempt();
            }
            workflow.transition(WorkflowState::AwaitingConfirmation);
        }
        println!(
            "{} {} (step {}/{}, {})",
            self.theme.header.apply("Resuming:"),
            workflow.request,
            (workflow.cursor + 1).min(workflow.steps.len().max(1)),
            workflow.steps.len(),
            workflow.state
        );
        self.save()?;
        self.drive().await
    }

    fn start_workflow(&mut self, request: &str, previous_failure: Option<String>) -> Result<()> {
        if let Some(old) = self.session.pending_workflow() {
            tracing::warn!("Discarding unfinished workflow {}", old.id);
            println!(
                "{} unfinished workflow \"{}\" is replaced by the new request",
                self.theme.warning.apply("Warning:"),
                old.request
            );
        }
        let branch = self.repo.current_branch()?;
        let mut workflow = Workflow::planning(request, branch);
        workflow.previous_failure = previous_failure;
        self.session.workflow = Some(workflow);
        self.save()
    }

    fn save(&mut self) -> Result<()> {
        self.store.save(&mut self.session)
    }

    fn workflow(&self) -> Result<&Workflow> {
        self.session
            .workflow
            .as_ref()
            .ok_or_else(|| anyhow!("No active workflow"))
    }

    fn workflow_mut(&mut self) -> Result<&mut Workflow> {
        self.session
            .workflow
            .as_mut()
            .ok_or_else(|| anyhow!("No active workflow"))
    }

    async fn drive(&mut self) -> Result<RunOutcome> {
        loop {
            match self.workflow()?.state {
                WorkflowState::Planning => {
                    if let Some(outcome) = self.plan().await? {
                        return Ok(outcome);
                    }
                }
                WorkflowState::AwaitingConfirmation => {
                    if let Some(outcome) = self.confirm()? {
                        return Ok(outcome);
                    }
                }
                WorkflowState::Executing => self.execute()?,
                WorkflowState::Verifying => self.verify()?,
                WorkflowState::Complete => return self.complete().await,
                WorkflowState::Failed => {
                    let outcome = self.failed()?;
                    if self.auto_approve {
                        return Ok(outcome);
                    }
                    let verification = match &outcome {
                        RunOutcome::Failed { verification, .. } => verification.clone(),
                        _ => return Ok(outcome),
                    };
                    match self.prompter.follow_up(&verification)? {
                        Some(request) if !request.trim().is_empty() => {
                            let note = self.workflow()?.failure_note();
                            self.start_workflow(request.trim(), Some(note))?;
                        }
                        _ => return Ok(outcome),
                    }
                }
            }
        }
    }

    fn context(&self) -> Result<String> {
        let workflow = self.workflow()?;
        let mut context = self
            .repo
            .context(self.config.workflow.context_log_entries)?
            .render();
        if let Some(branch) = &workflow.original_branch {
            context.push_str(&format!("Original branch: {}\n", branch));
        }
        if let Some(previous) = &workflow.previous_failure {
            context.push_str(&format!(
                "This request follows up a failed workflow:\n{}\n",
                indent(previous)
            ));
        }
        context.push_str(&format!(
            "Recent gitagent commands:\n{}\n",
            self.session.render_history(self.config.workflow.history_in_context)
        ));
        Ok(context)
    }

    async fn plan(&mut self) -> Result<Option<RunOutcome>> {
        let request = self.workflow()?.request.clone();
        let context = self.context()?;
        println!("{} {}", self.theme.header.apply("Planning:"), request);

        let mut plan = self
            .planner
            .plan(&request, &context)
            .await
            .map_err(AgentError::from)?;

        let report = self.validator.validate_plan(&plan.steps);
        if report.has_errors() {
            return Err(AgentError::Planning(format!(
                "the proposed plan was rejected: {}",
                report.error_summary()
            ))
            .into());
        }
        for warning in &report.warnings {
            tracing::debug!("step {}: {}", warning.step_index + 1, warning.message);
        }
        for index in report.dangerous_steps() {
            if let Some(step) = plan.steps.get_mut(index) {
                step.is_dangerous = true;
            }
        }
        for step in plan.steps.iter_mut() {
            step.command = self
                .validator
                .normalize(&step.command)
                .map_err(|e| AgentError::Planning(e.to_string()))?;
        }

        if plan.steps.is_empty() {
            let explanation = plan.explanation.clone();
            let workflow = self.workflow_mut()?;
            workflow.set_plan(plan);
            workflow.transition(WorkflowState::Complete);
            self.save()?;
            println!("{}", self.theme.explanation.apply(&explanation));
            return Ok(Some(RunOutcome::Answered { explanation }));
        }

        self.workflow_mut()?.set_plan(plan);
        self.save()?;
        println!("{}", self.workflow()?.preview(&self.theme));
        Ok(None)
    }

    fn confirm(&mut self) -> Result<Option<RunOutcome>> {
        let (index, total) = self.workflow()?.progress();
        let step = self
            .workflow()?
            .current_step()
            .cloned()
            .ok_or_else(|| anyhow!("Workflow cursor {} is past its {} steps", index, total))?;

        println!(
            "\n{} {}",
            self.theme.header.apply(&format!("Step {}/{}:", index + 1, total)),
            self.theme.command.apply(&format!("git {}", step.command))
        );
        println!("  {}", step.rationale);
        println!("  {} {}", self.theme.muted.apply("Expected:"), step.expected_outcome);
        if step.is_dangerous {
            println!(
                "  {}",
                self.theme.warning.apply("⚠️  This step is potentially destructive!")
            );
        }

        let approved = self.auto_approve || self.prompter.confirm(&step, index, total)?;
        if !approved {
            println!(
                "{}",
                self.theme
                    .muted
                    .apply("Step declined. Run `gitagent continue` to pick up here.")
            );
            return Ok(Some(RunOutcome::Declined {
                step: index + 1,
                command: step.command,
            }));
        }

        let snapshot = self.repo.snapshot()?;
        let workflow = self.workflow_mut()?;
        if let Some(step) = workflow.current_step_mut() {
            step.reset_attempt();
            step.snapshot = Some(snapshot);
        }
        workflow.transition(WorkflowState::Executing);
        self.save()?;
        Ok(None)
    }

    fn execute(&mut self) -> Result<()> {
        let command = self
            .workflow()?
            .current_step()
            .map(|s| s.command.clone())
            .ok_or_else(|| anyhow!("No step to execute"))?;

        let output = self
            .repo
            .executor()
            .run(&command)
            .map_err(|e| AgentError::Environment(format!("Could not run git: {}", e)))?;

        let text = output.text();
        if !text.is_empty() {
            println!("{}", self.theme.muted.apply(text));
        }
        if self.config.display.show_execution_time {
            println!(
                "{}",
                self.theme
                    .muted
                    .apply(&format!("(completed in {} ms)", output.duration_ms))
            );
        }

        let workflow = self.workflow_mut()?;
        if let Some(step) = workflow.current_step_mut() {
            step.output = Some(output);
        }
        workflow.transition(WorkflowState::Verifying);
        self.save()
    }

    fn verify(&mut self) -> Result<()> {
        let workflow = self.workflow()?;
        let workflow_id = workflow.id.clone();
        let step_number = workflow.cursor + 1;
        let step = workflow
            .current_step()
            .cloned()
            .ok_or_else(|| anyhow!("No step to verify"))?;
        let output = step
            .output
            .clone()
            .ok_or_else(|| anyhow!("Step {} has no captured output", step_number))?;
        let before = match step.snapshot.clone() {
            Some(snapshot) => snapshot,
            None => {
                tracing::warn!("Step {} has no stored snapshot; using the current state", step_number);
                self.repo.snapshot()?
            }
        };

        let result = Verifier::new(&self.repo).verify(
            &step.command,
            &output,
            &before,
            &step.verification_commands,
        )?;

        let line = format!("{}: {}", result.outcome, result.explanation);
        if result.is_success() {
            println!("{} {}", self.theme.success.apply("✓"), self.theme.success.apply(&line));
        } else {
            println!("{} {}", self.theme.failure.apply("✗"), self.theme.failure.apply(&line));
        }

        self.session.record(CommandRecord {
            workflow_id,
            step: step_number,
            command: step.command.clone(),
            exit_code: output.exit_code,
            verification: result.clone(),
            summary: step.rationale.clone(),
            executed_at: Utc::now(),
        });
        self.workflow_mut()?.finish_step(result);
        self.save()
    }

    fn failed(&self) -> Result<RunOutcome> {
        let workflow = self.workflow()?;
        let step = workflow
            .current_step()
            .ok_or_else(|| anyhow!("Failed workflow has no current step"))?;
        let verification = step
            .verification
            .clone()
            .unwrap_or_else(|| VerificationResult::execution_failure("Step did not complete"));

        println!(
            "{} {}",
            self.theme.failure.apply("Workflow stopped:"),
            verification.explanation
        );
        if let Some(branch) = &workflow.original_branch {
            println!(
                "{}",
                self.theme
                    .muted
                    .apply(&format!("The workflow started on branch '{}'.", branch))
            );
        }

        Ok(RunOutcome::Failed {
            step: workflow.cursor + 1,
            command: step.command.clone(),
            verification,
            output: step.output.clone(),
        })
    }

    async fn complete(&mut self) -> Result<RunOutcome> {
        let workflow = self.workflow()?;
        let workflow_id = workflow.id.clone();
        let executed = workflow.steps.len();

        let summary = if self.config.workflow.summarize_with_llm {
            match self.planner.summarize(workflow).await {
                Ok(summary) if !summary.is_empty() => summary,
                Ok(_) => workflow.local_summary(),
                Err(e) => {
                    tracing::warn!("LLM summary unavailable: {}", e);
                    workflow.local_summary()
                }
            }
        } else {
            workflow.local_summary()
        };

        println!("\n{}\n{}", self.theme.header.apply("Summary:"), summary);
        Ok(RunOutcome::Completed {
            workflow_id,
            executed,
            summary,
        })
    }
}
