use super::*;
use crate::config::{AIConfig, AIProvider};
use crate::verify::VerificationResult;
use mockito::{Matcher, Server, ServerGuard};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn plan_json() -> Value {
    json!({
        "version": "1.0",
        "explanation": "Create and switch to the feature branch",
        "steps": [{
            "command": "git checkout -b feature",
            "rationale": "Start a new line of work",
            "expected_outcome": "feature exists and is checked out",
            "verification_commands": ["git branch --show-current"],
            "is_dangerous": false
        }]
    })
}

fn anthropic_body(text: &str) -> String {
    json!({
        "id": "msg_01",
        "type": "message",
        "role": "assistant",
        "content": [{ "type": "text", "text": text }]
    })
    .to_string()
}

fn openai_body(text: &str) -> String {
    json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": "stop"
        }]
    })
    .to_string()
}

async fn setup(provider: AIProvider) -> (ServerGuard, AIConfig) {
    let server = Server::new_async().await;
    let path = match provider {
        AIProvider::Anthropic => "/v1/messages",
        AIProvider::OpenAI => "/v1/chat/completions",
    };
    let config = AIConfig {
        provider,
        model: "test-model".to_string(),
        max_tokens: 1000,
        anthropic_api_key: Some("test_key".to_string()),
        openai_api_key: Some("test_key".to_string()),
        api_url: Some(format!("{}{}", server.url(), path)),
        max_retries: 0,
        ..AIConfig::default()
    };
    (server, config)
}

#[tokio::test]
async fn test_anthropic_plan() {
    let (mut server, config) = setup(AIProvider::Anthropic).await;
    let reply = format!("Here is the plan:\n```json\n{}\n```", plan_json());
    let mock = server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "test_key")
        .match_header("anthropic-version", ANTHROPIC_VERSION)
        .match_body(Matcher::PartialJson(json!({ "model": "test-model" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(anthropic_body(&reply))
        .create_async()
        .await;

    let planner = LlmPlanner::new(&config).unwrap();
    let plan = planner.plan("start a feature branch", "Current branch: main").await.unwrap();

    assert_eq!(plan.explanation, "Create and switch to the feature branch");
    assert_eq!(plan.steps.len(), 1);
    assert_eq!(plan.steps[0].command, "checkout -b feature");
    assert_eq!(plan.steps[0].verification_commands, vec!["branch --show-current"]);
    assert!(!plan.steps[0].is_dangerous);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_openai_compatible_plan() {
    let (mut server, config) = setup(AIProvider::OpenAI).await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer test_key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(openai_body(&plan_json().to_string()))
        .create_async()
        .await;

    let planner = LlmPlanner::new(&config).unwrap();
    let plan = planner.plan("start a feature branch", "").await.unwrap();
    assert_eq!(plan.steps[0].command, "checkout -b feature");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_zero_step_answer() {
    let (mut server, config) = setup(AIProvider::Anthropic).await;
    let answer = json!({
        "version": "1.0",
        "explanation": "You are on main with a clean working tree.",
        "steps": []
    });
    let mock = server
        .mock("POST", "/v1/messages")
        .with_status(200)
        .with_body(anthropic_body(&answer.to_string()))
        .create_async()
        .await;

    let planner = LlmPlanner::new(&config).unwrap();
    let plan = planner.plan("what branch am I on?", "").await.unwrap();
    assert!(plan.steps.is_empty());
    assert_eq!(plan.explanation, "You are on main with a clean working tree.");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_invalid_version() {
    let (mut server, config) = setup(AIProvider::Anthropic).await;
    let mut body = plan_json();
    body["version"] = json!("2.0");
    let mock = server
        .mock("POST", "/v1/messages")
        .with_status(200)
        .with_body(anthropic_body(&body.to_string()))
        .create_async()
        .await;

    let result = LlmPlanner::new(&config).unwrap().plan("list files", "").await;
    assert!(matches!(result, Err(AIError::ValidationError(_))));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_empty_step_fields_fail_validation() {
    let (mut server, config) = setup(AIProvider::Anthropic).await;
    let mut body = plan_json();
    body["steps"][0]["rationale"] = json!("");
    let mock = server
        .mock("POST", "/v1/messages")
        .with_status(200)
        .with_body(anthropic_body(&body.to_string()))
        .create_async()
        .await;

    let result = LlmPlanner::new(&config).unwrap().plan("branch", "").await;
    assert!(matches!(result, Err(AIError::ValidationError(_))));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_authentication_error() {
    let (mut server, config) = setup(AIProvider::Anthropic).await;
    let mock = server
        .mock("POST", "/v1/messages")
        .with_status(401)
        .with_body(r#"{"error":{"type":"authentication_error"}}"#)
        .create_async()
        .await;

    let result = LlmPlanner::new(&config).unwrap().plan("status", "").await;
    assert!(matches!(result, Err(AIError::AuthenticationError(_))));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let (mut server, mut config) = setup(AIProvider::OpenAI).await;
    config.max_retries = 3;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(500)
        .with_body("upstream exploded")
        .expect(1)
        .create_async()
        .await;

    let result = LlmPlanner::new(&config).unwrap().plan("status", "").await;
    match result {
        Err(AIError::APIError(msg)) => assert!(msg.contains("upstream exploded")),
        other => panic!("expected API error, got {:?}", other),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_rate_limit_is_retried_then_surfaced() {
    let (mut server, config) = setup(AIProvider::Anthropic).await;
    let mock = server
        .mock("POST", "/v1/messages")
        .with_status(429)
        .expect(3)
        .create_async()
        .await;

    let planner = LlmPlanner::new(&config).unwrap().with_retry_policy(RetryPolicy {
        max_retries: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    });
    let result = planner.plan("status", "").await;
    assert!(matches!(result, Err(AIError::RateLimitError(_))));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_summarize_returns_trimmed_text() {
    let (mut server, config) = setup(AIProvider::Anthropic).await;
    let mock = server
        .mock("POST", "/v1/messages")
        .match_body(Matcher::Regex("make a branch".to_string()))
        .with_status(200)
        .with_body(anthropic_body("  Created branch feature.\n"))
        .create_async()
        .await;

    let mut workflow = Workflow::planning("make a branch", Some("main".to_string()));
    workflow.set_plan(WorkflowPlan {
        explanation: "create it".to_string(),
        steps: vec![crate::workflow::PlannedStep::new("branch feature", "new work", "exists")],
    });
    workflow.finish_step(VerificationResult::success("Branch 'feature' now exists"));

    let summary = LlmPlanner::new(&config).unwrap().summarize(&workflow).await.unwrap();
    assert_eq!(summary, "Created branch feature.");
    mock.assert_async().await;
}

#[test]
fn test_missing_api_key() {
    let config = AIConfig {
        anthropic_api_key: Some("   ".to_string()),
        ..AIConfig::default()
    };
    assert!(matches!(LlmPlanner::new(&config), Err(AIError::ValidationError(_))));
}

#[test]
fn test_json_extraction() {
    let text = r#"Sure! {"note": "ignore me"} and then {
        "version": "1.0",
        "explanation": "a } inside \"quotes\"",
        "steps": []
    } trailing"#;
    let json = extract_json(text).unwrap();
    assert!(json.starts_with('{'));
    assert!(json.contains("version"));
    assert!(json.ends_with('}'));

    assert!(matches!(extract_json("no json here"), Err(AIError::ParseError(_))));
    assert!(matches!(extract_json("{\"version\": \"1.0\""), Err(AIError::ParseError(_))));
}

#[test]
fn test_prompt_embeds_schema_and_context() {
    let prompt = format_plan_prompt("undo my last commit", "Current branch: main").unwrap();
    assert!(prompt.contains("Repository context:\nCurrent branch: main"));
    assert!(prompt.contains("Request: undo my last commit"));
    assert!(prompt.contains("\"expected_outcome\""));
    assert!(prompt.contains("\"version\": \"1.0\""));
}

#[test]
fn test_retry_delay_is_capped() {
    let policy = RetryPolicy::new(5);
    assert_eq!(policy.delay(0), Duration::from_millis(1000));
    assert_eq!(policy.delay(2), Duration::from_millis(4000));
    assert_eq!(policy.delay(6), Duration::from_millis(10000));
}
