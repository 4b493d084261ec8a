use crate::ai::{AIError, Planner};
use crate::config::Config;
use crate::controller::{Controller, Prompter};
use crate::git::GitManager;
use crate::verify::VerificationResult;
use crate::workflow::{PlannedStep, Workflow, WorkflowPlan};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use tempfile::TempDir;


// Test utilities and helpers
pub(crate) struct TestUtils {
    dir: TempDir,
}

impl TestUtils {
    /// A fresh repository on `main` with one commit.
    pub fn new() -> Result<Self> {
        let utils = Self {
            dir: tempfile::tempdir()?,
        };
        utils.git(&["init", "--quiet"]);
        utils.git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        utils.git(&["config", "user.name", "Test User"]);
        utils.git(&["config", "user.email", "test@example.com"]);
        utils.git(&["config", "commit.gpgsign", "false"]);
        utils.write("README.md", "# test\n")?;
        utils.git(&["add", "README.md"]);
        utils.git(&["commit", "--quiet", "-m", "initial"]);
        Ok(utils)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Runs git directly, bypassing the crate.
    pub fn git(&self, args: &[&str]) -> std::process::Output {
        Command::new("git")
            .args(args)
            .current_dir(self.dir.path())
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .expect("git should be installed for tests")
    }

    pub fn branches(&self) -> Vec<String> {
        let output = self.git(&["for-each-ref", "--format=%(refname:short)", "refs/heads/"]);
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(String::from)
            .collect()
    }

    pub fn manager(&self) -> GitManager {
        GitManager::discover(self.path()).expect("temp repo should be discoverable")
    }

    pub fn config() -> Config {
        let mut config = Config::default();
        config.security.require_confirmation = true;
        config.display.show_execution_time = false;
        config.display.theme = "monochrome".to_string();
        config.workflow.summarize_with_llm = false;
        config
    }

    pub fn controller<U: Prompter>(
        &self,
        planner: ScriptedPlanner,
        prompter: U,
    ) -> Controller<ScriptedPlanner, U> {
        Controller::new(self.manager(), Self::config(), planner, prompter)
            .expect("controller should start")
    }

    pub fn plan(explanation: &str, commands: &[&str]) -> WorkflowPlan {
        WorkflowPlan {
            explanation: explanation.to_string(),
            steps: commands
                .iter()
                .map(|c| PlannedStep::new(*c, format!("run {}", c), "it works"))
                .collect(),
        }
    }
}

/// Hands out prepared plans in order and records what it was asked.
pub(crate) struct ScriptedPlanner {
    plans: Mutex<VecDeque<WorkflowPlan>>,
    requests: Mutex<Vec<String>>,
    contexts: Mutex<Vec<String>>,
    summary: Option<String>,
}

impl ScriptedPlanner {
    pub fn new(plans: Vec<WorkflowPlan>) -> Self {
        Self {
            plans: Mutex::new(plans.into()),
            requests: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
            summary: None,
        }
    }

    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = Some(summary.to_string());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn contexts(&self) -> Vec<String> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, request: &str, context: &str) -> Result<WorkflowPlan, AIError> {
        assert!(context.contains("Current branch:"), "context should describe the repo");
        self.requests.lock().unwrap().push(request.to_string());
        self.contexts.lock().unwrap().push(context.to_string());
        self.plans
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AIError::APIError("no scripted plan left".to_string()))
    }

    async fn summarize(&self, _workflow: &Workflow) -> Result<String, AIError> {
        self.summary
            .clone()
            .ok_or_else(|| AIError::NetworkError("offline".to_string()))
    }
}

/// Answers confirmations from a script and counts every question.
pub(crate) struct ScriptedPrompter {
    answers: VecDeque<bool>,
    follow_ups: VecDeque<Option<String>>,
    pub confirmations: usize,
    pub follow_up_calls: usize,
}

impl ScriptedPrompter {
    pub fn new(answers: &[bool]) -> Self {
        Self {
            answers: answers.iter().copied().collect(),
            follow_ups: VecDeque::new(),
            confirmations: 0,
            follow_up_calls: 0,
        }
    }

    pub fn with_follow_up(mut self, request: Option<&str>) -> Self {
        self.follow_ups.push_back(request.map(String::from));
        self
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&mut self, _step: &PlannedStep, _index: usize, _total: usize) -> Result<bool> {
        self.confirmations += 1;
        Ok(self.answers.pop_front().expect("unexpected confirmation prompt"))
    }

    fn follow_up(&mut self, _failure: &VerificationResult) -> Result<Option<String>> {
        self.follow_up_calls += 1;
        Ok(self.follow_ups.pop_front().flatten())
    }
}

/// Fails the test if the controller ever asks anything.
pub(crate) struct PanicPrompter;

impl Prompter for PanicPrompter {
    fn confirm(&mut self, step: &PlannedStep, _index: usize, _total: usize) -> Result<bool> {
        panic!("auto-approve asked to confirm `git {}`", step.command);
    }

    fn follow_up(&mut self, failure: &VerificationResult) -> Result<Option<String>> {
        panic!("auto-approve asked for a follow-up after: {}", failure.explanation);
    }
}
