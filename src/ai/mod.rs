use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

mod error;
mod response;
mod schema;
#[cfg(test)]
mod tests;

pub use error::AIError;
pub use response::{VersionedResponse, RESPONSE_VERSION};
pub use schema::{PlanSchema, StepSchema};

use crate::config::{AIConfig, AIProvider};
use crate::workflow::{Workflow, WorkflowPlan};

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const INITIAL_RETRY_DELAY: u64 = 1000; // milliseconds
const MAX_RETRY_DELAY: u64 = 10000; // 10 seconds max delay

const PLAN_SYSTEM_PROMPT: &str = "You are gitagent, an assistant that turns requests into Git commands. \
Plan the smallest sequence of git commands that fulfils the request in the repository described to you.";

const SUMMARY_SYSTEM_PROMPT: &str = "You are gitagent. Summarize the outcome of a Git workflow for the user \
in a few short sentences. Mention failures plainly. Do not invent commands that were not run.";

/// Turns requests into plans and finished workflows into reports.
#[async_trait]
pub trait Planner {
    async fn plan(&self, request: &str, context: &str) -> Result<WorkflowPlan, AIError>;

    async fn summarize(&self, workflow: &Workflow) -> Result<String, AIError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(INITIAL_RETRY_DELAY),
            max_delay: Duration::from_millis(MAX_RETRY_DELAY),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }
}

async fn with_retries<T, F, Fut>(policy: &RetryPolicy, f: F) -> Result<T, AIError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, AIError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                tracing::warn!("LLM request failed: {}. Retrying in {:?}...", e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Planner backed by a hosted chat model.
pub struct LlmPlanner {
    client: reqwest::Client,
    config: AIConfig,
    api_key: String,
    retry: RetryPolicy,
}

impl LlmPlanner {
    pub fn new(config: &AIConfig) -> Result<Self, AIError> {
        let api_key = config.api_key().ok_or_else(|| {
            AIError::ValidationError(format!("{:?} API key not configured", config.provider))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            retry: RetryPolicy::new(config.max_retries),
            config: config.clone(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> &str {
        self.config.api_url.as_deref().unwrap_or(match self.config.provider {
            AIProvider::Anthropic => ANTHROPIC_URL,
            AIProvider::OpenAI => OPENAI_URL,
        })
    }

    /// One system + user exchange, retried on transport errors and rate limits.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, AIError> {
        with_retries(&self.retry, || async move {
            match self.config.provider {
                AIProvider::Anthropic => self.complete_anthropic(system, user).await,
                AIProvider::OpenAI => self.complete_openai(system, user).await,
            }
        })
        .await
    }

    async fn complete_anthropic(&self, system: &str, user: &str) -> Result<String, AIError> {
        let mut headers = HeaderMap::new();
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| AIError::ValidationError(format!("Invalid API key: {}", e)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = self
            .client
            .post(self.endpoint())
            .headers(headers)
            .json(&json!({
                "model": &self.config.model,
                "max_tokens": self.config.max_tokens,
                "temperature": self.config.temperature,
                "system": system,
                "messages": [{ "role": "user", "content": user }]
            }))
            .send()
            .await?;
        let body = read_body(response).await?;

        #[derive(Debug, Deserialize)]
        struct AnthropicResponse {
            #[serde(default)]
            content: Vec<AnthropicContent>,
        }

        #[derive(Debug, Deserialize)]
        struct AnthropicContent {
            #[serde(default)]
            text: String,
        }

        let parsed: AnthropicResponse = serde_json::from_str(&body).map_err(|e| {
            AIError::ParseError(format!("Failed to parse Anthropic response: {} - Raw response: {}", e, body))
        })?;
        let text: String = parsed.content.into_iter().map(|c| c.text).collect();
        if text.trim().is_empty() {
            return Err(AIError::ParseError(format!("Empty response from Anthropic: {}", body)));
        }
        Ok(text)
    }

    async fn complete_openai(&self, system: &str, user: &str) -> Result<String, AIError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| AIError::ValidationError(format!("Invalid API key: {}", e)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = self
            .client
            .post(self.endpoint())
            .headers(headers)
            .json(&json!({
                "model": &self.config.model,
                "max_tokens": self.config.max_tokens,
                "temperature": self.config.temperature,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user }
                ]
            }))
            .send()
            .await?;
        let body = read_body(response).await?;

        #[derive(Debug, Deserialize)]
        struct ChatResponse {
            #[serde(default)]
            choices: Vec<Choice>,
        }

        #[derive(Debug, Deserialize)]
        struct Choice {
            message: ChatMessage,
        }

        #[derive(Debug, Deserialize)]
        struct ChatMessage {
            #[serde(default)]
            content: Option<String>,
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            AIError::ParseError(format!("Failed to parse API response: {} - Raw response: {}", e, body))
        })?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AIError::ParseError(format!("Empty response from model: {}", body)))
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, request: &str, context: &str) -> Result<WorkflowPlan, AIError> {
        let prompt = format_plan_prompt(request, context)?;
        let text = self.complete(PLAN_SYSTEM_PROMPT, &prompt).await?;
        tracing::debug!("Raw planner response: {}", text);
        parse_plan(&text)
    }

    async fn summarize(&self, workflow: &Workflow) -> Result<String, AIError> {
        let prompt = format!(
            "Request: {}\nPlan: {}\n\nWhat happened:\n{}\n\nWrite the summary now.",
            workflow.request,
            workflow.explanation,
            workflow.local_summary()
        );
        let text = self.complete(SUMMARY_SYSTEM_PROMPT, &prompt).await?;
        Ok(text.trim().to_string())
    }
}

async fn read_body(response: reqwest::Response) -> Result<String, AIError> {
    match response.status() {
        StatusCode::OK => response
            .text()
            .await
            .map_err(|e| AIError::NetworkError(format!("Failed to read response body: {}", e))),
        StatusCode::TOO_MANY_REQUESTS => Err(AIError::RateLimitError("Rate limit exceeded".to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(AIError::AuthenticationError("Invalid API key".to_string()))
        }
        status => {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error response".to_string());
            Err(AIError::APIError(format!(
                "Unexpected status code: {} - Response: {}",
                status, error_body
            )))
        }
    }
}

/// Parses and validates a model reply into a plan.
pub fn parse_plan(text: &str) -> Result<WorkflowPlan, AIError> {
    let json_text = extract_json(text)?;
    let versioned: VersionedResponse = serde_json::from_str(&json_text).map_err(|e| {
        AIError::ParseError(format!(
            "Failed to parse plan JSON: {} - Response text: {}",
            e, json_text
        ))
    })?;
    versioned.into_plan()
}

/// Finds the first balanced JSON object carrying `version` and `steps`.
pub fn extract_json(text: &str) -> Result<String, AIError> {
    for (start, _) in text.match_indices('{') {
        let mut depth = 0;
        let mut in_string = false;
        let mut escape_next = false;

        for (i, c) in text[start..].char_indices() {
            if escape_next {
                escape_next = false;
                continue;
            }
            match c {
                '\\' if in_string => escape_next = true,
                '"' => in_string = !in_string,
                '{' if !in_string => depth += 1,
                '}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &text[start..=start + i];
                        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(candidate) {
                            if parsed.get("version").is_some() && parsed.get("steps").is_some() {
                                return Ok(candidate.to_string());
                            }
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    Err(AIError::ParseError(format!(
        "Could not find valid JSON response. Response text: {}",
        text.chars().take(200).collect::<String>()
    )))
}

pub fn format_plan_prompt(request: &str, context: &str) -> Result<String, AIError> {
    let schema = serde_json::to_string_pretty(&schemars::schema_for!(PlanSchema))?;

    Ok(format!(
        "Repository context:\n{context}\n\
         Request: {request}\n\
         \n\
         Rules:\n\
         1. One git command per step, no shell operators, pipes or redirection.\n\
         2. Never use interactive flags (rebase -i, add -p) or commands that open an editor.\n\
         3. Always pass a commit message with -m.\n\
         4. verification_commands must be read-only git commands (status, log, branch, diff).\n\
         5. Set is_dangerous for anything that discards work or rewrites published history.\n\
         6. If the request is a question that needs no commands, return an empty steps list and answer in explanation.\n\
         \n\
         Respond with a single JSON object with \"version\": \"{version}\" and the fields of this schema:\n\
         {schema}\n\
         \n\
         Example:\n\
         ```json\n\
         {{\n\
           \"version\": \"{version}\",\n\
           \"explanation\": \"Create the feature branch and switch to it\",\n\
           \"steps\": [\n\
             {{\n\
               \"command\": \"git checkout -b feature/login\",\n\
               \"rationale\": \"Start work on a new branch\",\n\
               \"expected_outcome\": \"Branch feature/login exists and is checked out\",\n\
               \"verification_commands\": [\"git branch --show-current\"],\n\
               \"is_dangerous\": false\n\
             }}\n\
           ]\n\
         }}\n\
         ```\n\
         Do not include any other text outside the JSON block.",
        context = context,
        request = request,
        version = RESPONSE_VERSION,
        schema = schema,
    ))
}
