use std::fmt;

use crate::ai::AIError;

/// The four ways a run can end badly. Each is shown to the user verbatim.
#[derive(Debug)]
pub enum AgentError {
    Planning(String),
    Execution {
        command: String,
        exit_code: i32,
        stderr: String,
    },
    Verification {
        command: String,
        explanation: String,
    },
    Environment(String),
}

impl AgentError {
    /// Process exit code used by the binary for this kind of failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Planning(_) => 2,
            Self::Execution { .. } => 3,
            Self::Verification { .. } => 4,
            Self::Environment(_) => 5,
        }
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planning(msg) => write!(f, "Planning failed: {}", msg),
            Self::Execution {
                command,
                exit_code,
                stderr,
            } => write!(
                f,
                "Execution failed: `git {}` exited with code {}: {}",
                command,
                exit_code,
                stderr.trim()
            ),
            Self::Verification {
                command,
                explanation,
            } => write!(
                f,
                "Verification failed for `git {}`: {}",
                command, explanation
            ),
            Self::Environment(msg) => write!(f, "Environment error: {}", msg),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<AIError> for AgentError {
    fn from(error: AIError) -> Self {
        AgentError::Planning(error.to_string())
    }
}
