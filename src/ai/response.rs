use serde::{Deserialize, Serialize};
use validator::Validate;

use super::error::AIError;
use super::schema::{PlanSchema, StepSchema};
use crate::workflow::{PlannedStep, WorkflowPlan};

pub const RESPONSE_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionedResponse {
    version: String,
    #[serde(flatten)]
    response: PlanSchema,
}

impl VersionedResponse {
    pub fn validate(&self) -> Result<(), AIError> {
        if self.version != RESPONSE_VERSION {
            return Err(AIError::ValidationError(format!(
                "Unsupported response version: {}. Expected {}",
                self.version, RESPONSE_VERSION
            )));
        }

        self.response.validate().map_err(|e| {
            AIError::ValidationError(format!("Response validation failed: {}", e))
        })?;

        Ok(())
    }

    pub fn into_plan(self) -> Result<WorkflowPlan, AIError> {
        self.validate()?;

        Ok(WorkflowPlan {
            explanation: self.response.explanation,
            steps: self
                .response
                .steps
                .into_iter()
                .map(PlannedStep::from)
                .collect(),
        })
    }
}

impl From<StepSchema> for PlannedStep {
    fn from(schema: StepSchema) -> Self {
        let step = PlannedStep::new(schema.command, schema.rationale, schema.expected_outcome)
            .with_verification_commands(
                schema
                    .verification_commands
                    .iter()
                    .map(|c| crate::executor::strip_git_prefix(c))
                    .filter(|c| !c.is_empty())
                    .collect(),
            );
        if schema.is_dangerous {
            step.dangerous()
        } else {
            step
        }
    }
}
