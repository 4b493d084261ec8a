pub mod ai;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod git;
pub mod session;
pub mod theme;
pub mod verify;
pub mod workflow;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use ai::{LlmPlanner, Planner};
pub use config::Config;
pub use controller::{Controller, Prompter, RunOutcome, TerminalPrompter};
pub use error::AgentError;
pub use executor::{CommandOutput, GitExecutor};
pub use git::GitManager;
pub use session::{Session, SessionStore};
pub use verify::{VerificationOutcome, VerificationResult};
pub use workflow::{PlannedStep, Workflow, WorkflowState};
