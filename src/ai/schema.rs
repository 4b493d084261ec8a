use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Shape of the plan the model must return.
#[derive(Debug, Serialize, Deserialize, JsonSchema, Validate)]
pub struct PlanSchema {
    /// What the plan does, or the answer itself when no commands are needed.
    #[validate(length(min = 1, message = "Explanation cannot be empty"))]
    pub explanation: String,
    #[validate]
    #[serde(default)]
    pub steps: Vec<StepSchema>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema, Validate)]
pub struct StepSchema {
    /// A single git command, e.g. `git checkout -b feature`.
    #[validate(length(min = 1, message = "Command cannot be empty"))]
    pub command: String,
    #[validate(length(min = 1, message = "Rationale cannot be empty"))]
    pub rationale: String,
    #[validate(length(min = 1, message = "Expected outcome cannot be empty"))]
    pub expected_outcome: String,
    /// Read-only git commands that confirm the outcome.
    #[serde(default)]
    pub verification_commands: Vec<String>,
    #[serde(default)]
    pub is_dangerous: bool,
}
