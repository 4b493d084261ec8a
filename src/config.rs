use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    pub ai: AIConfig,
    pub security: SecurityConfig,
    pub display: DisplayConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AIConfig {
    pub provider: AIProvider,
    pub model: String,
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    /// Full endpoint URL; the provider's public endpoint is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

fn default_temperature() -> f32 {
    0.2
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    2
}

impl Default for AIConfig {
    fn default() -> Self {
        Self {
            provider: AIProvider::Anthropic,
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 2048,
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            anthropic_api_key: None,
            openai_api_key: None,
            api_url: None,
        }
    }
}

impl AIConfig {
    /// Key for the configured provider, if any.
    pub fn api_key(&self) -> Option<&str> {
        match self.provider {
            AIProvider::Anthropic => self.anthropic_api_key.as_deref(),
            AIProvider::OpenAI => self.openai_api_key.as_deref(),
        }
        .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum AIProvider {
    Anthropic,
    OpenAI,
}

impl FromStr for AIProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "groq" | "openai-compatible" => Ok(Self::OpenAI),
            other => Err(anyhow!("Unknown AI provider: {}", other)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SecurityConfig {
    pub require_confirmation: bool,
    pub dangerous_commands: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            require_confirmation: true,
            dangerous_commands: [
                "push --force",
                "push -f",
                "reset --hard",
                "clean -f",
                "clean -d",
                "branch -D",
                "filter-branch",
                "checkout -- .",
                "stash drop",
                "stash clear",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DisplayConfig {
    pub show_execution_time: bool,
    pub color_output: bool,
    #[serde(default = "default_theme")]
    pub theme: String,
}

fn default_theme() -> String {
    "dark".to_string()
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_execution_time: true,
            color_output: true,
            theme: default_theme(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Number of `git log` entries handed to the planner.
    pub context_log_entries: usize,
    /// Number of past session commands handed to the planner.
    pub history_in_context: usize,
    pub summarize_with_llm: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            context_log_entries: 5,
            history_in_context: 10,
            summarize_with_llm: true,
        }
    }
}

impl Config {
    pub fn create_default(path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(&Config::default())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Invalid config file {:?}", path))
    }

    /// Loads the config file, writing the defaults first when it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            Self::create_default(path)?;
            tracing::info!("Created default config file at {:?}", path);
        }
        Self::load(path)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies `GITAGENT_*` and provider key overrides read through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(provider) = lookup("GITAGENT_PROVIDER") {
            self.ai.provider = provider.parse()?;
        }
        if let Some(model) = lookup("GITAGENT_MODEL") {
            self.ai.model = model;
        }
        if let Some(url) = lookup("GITAGENT_API_URL") {
            self.ai.api_url = Some(url);
        }
        if let Some(max_tokens) = lookup("GITAGENT_MAX_TOKENS") {
            self.ai.max_tokens = max_tokens
                .trim()
                .parse()
                .with_context(|| format!("GITAGENT_MAX_TOKENS is not a number: {}", max_tokens))?;
        }
        if let Some(key) = lookup("ANTHROPIC_API_KEY") {
            self.ai.anthropic_api_key = Some(key);
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.ai.openai_api_key = Some(key);
        }
        Ok(())
    }
}

pub fn get_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("GITAGENT_CONFIG") {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    let proj_dirs = ProjectDirs::from("com", "gitagent", "gitagent")
        .ok_or_else(|| anyhow!("Could not determine config directory"))?;

    Ok(proj_dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_round_trips_through_disk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_or_create(&path)?;
        assert!(path.exists());
        assert_eq!(config.ai.provider, AIProvider::Anthropic);
        assert!(config.security.require_confirmation);
        assert_eq!(config.workflow.context_log_entries, 5);
        Ok(())
    }

    #[test]
    fn older_files_without_new_sections_still_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[ai]
provider = "OpenAI"
model = "llama-3.1-70b"
max_tokens = 1000

[security]
require_confirmation = false
dangerous_commands = []

[display]
show_execution_time = false
color_output = false
"#,
        )?;

        let config = Config::load(&path)?;
        assert_eq!(config.ai.provider, AIProvider::OpenAI);
        assert_eq!(config.ai.max_retries, 2);
        assert_eq!(config.display.theme, "dark");
        assert!(config.workflow.summarize_with_llm);
        Ok(())
    }

    #[test]
    fn environment_overrides_model_endpoint_and_keys() -> Result<()> {
        let env: HashMap<&str, &str> = [
            ("GITAGENT_PROVIDER", "groq"),
            ("GITAGENT_MODEL", "mixtral-8x7b"),
            ("GITAGENT_API_URL", "http://localhost:9999/v1/chat/completions"),
            ("GITAGENT_MAX_TOKENS", "512"),
            ("OPENAI_API_KEY", "sk-test"),
            ("ANTHROPIC_API_KEY", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()))?;

        assert_eq!(config.ai.provider, AIProvider::OpenAI);
        assert_eq!(config.ai.model, "mixtral-8x7b");
        assert_eq!(
            config.ai.api_url.as_deref(),
            Some("http://localhost:9999/v1/chat/completions")
        );
        assert_eq!(config.ai.max_tokens, 512);
        assert_eq!(config.ai.api_key(), Some("sk-test"));
        assert_eq!(config.ai.anthropic_api_key, None);
        Ok(())
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut config = Config::default();
        let result = config.apply_env_from(|key| {
            (key == "GITAGENT_PROVIDER").then(|| "mystery".to_string())
        });
        assert!(result.is_err());
    }
}
