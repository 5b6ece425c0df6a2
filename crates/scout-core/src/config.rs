//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Scout configuration, read from a JSON5 file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

// --- Typed provider config ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<ProviderConfig>>,
}

/// Configuration for a single LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// "openai", "openrouter" or "ollama".
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl ProviderConfig {
    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Prepended to every model request when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Upper bound on Model steps per run (default: 25).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cycles: Option<u32>,

    /// Deadline for one Model step, in seconds (default: 120).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_timeout_secs: Option<u64>,
}

/// What to do when the model asks for a tool that is not registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownToolPolicy {
    /// Answer the call with a "Tool not found" result.
    #[default]
    Report,
    /// Drop the call without producing a result.
    Skip,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Deadline for a single tool call, in seconds (default: 30).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub unknown_tool_policy: UnknownToolPolicy,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchConfig>,
}

/// Web search backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    /// URL for the search API (Tavily, Brave, SearXNG).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Results per search (default: 4).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

impl SearchConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_allow_origins: Vec<String>,
}

fn default_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "scout_agent=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    ///
    /// A missing file yields the default config.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse config text (JSON5), substituting `${ENV_VAR}` references.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let substituted = substitute_env_vars(raw);
        json5::from_str(&substituted).map_err(|e| crate::error::ScoutError::Config(e.to_string()))
    }

    /// Default config file location: `~/.scout/config.json`.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Expand `~` in a user-supplied config path.
    pub fn expand_path(raw: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(raw).as_ref())
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or(8000)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn cors_allow_origins(&self) -> &[String] {
        self.gateway
            .as_ref()
            .map(|g| g.cors_allow_origins.as_slice())
            .unwrap_or(&[])
    }

    /// Model name from the first provider, falling back to `gpt-4o`.
    pub fn default_model(&self) -> String {
        self.first_provider()
            .and_then(|p| p.default_model.clone())
            .unwrap_or_else(|| "gpt-4o".to_string())
    }

    pub fn system_prompt(&self) -> Option<String> {
        self.agent.as_ref().and_then(|a| a.system_prompt.clone())
    }

    pub fn max_tokens(&self) -> u32 {
        self.agent
            .as_ref()
            .and_then(|a| a.max_tokens)
            .unwrap_or(4096)
    }

    pub fn temperature(&self) -> Option<f64> {
        self.agent.as_ref().and_then(|a| a.temperature)
    }

    pub fn max_cycles(&self) -> u32 {
        self.agent
            .as_ref()
            .and_then(|a| a.max_cycles)
            .unwrap_or(25)
    }

    pub fn model_timeout_secs(&self) -> u64 {
        self.agent
            .as_ref()
            .and_then(|a| a.model_timeout_secs)
            .unwrap_or(120)
    }

    pub fn tool_timeout_secs(&self) -> u64 {
        self.tools
            .as_ref()
            .and_then(|t| t.timeout_secs)
            .unwrap_or(30)
    }

    pub fn unknown_tool_policy(&self) -> UnknownToolPolicy {
        self.tools
            .as_ref()
            .map(|t| t.unknown_tool_policy)
            .unwrap_or_default()
    }

    pub fn search(&self) -> Option<&SearchConfig> {
        self.tools.as_ref().and_then(|t| t.search.as_ref())
    }

    pub fn search_max_results(&self) -> usize {
        self.search()
            .and_then(|s| s.max_results)
            .unwrap_or(4)
    }

    /// Get the first provider config.
    pub fn first_provider(&self) -> Option<&ProviderConfig> {
        self.models
            .as_ref()
            .and_then(|m| m.providers.as_ref())
            .and_then(|p| p.first())
    }

    /// Get a config value by dotted path (e.g. "gateway.port", "agent.max_cycles").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(providers) = self.models.as_ref().and_then(|m| m.providers.as_ref()) {
            for p in providers {
                if !matches!(p.id.as_str(), "openai" | "openrouter" | "ollama") {
                    errors.push(format!("Unsupported provider '{}'", p.id));
                }
                if p.id != "ollama" && p.resolve_api_key().is_none() {
                    warnings.push(format!("Provider '{}' has no API key configured", p.id));
                }
            }
        } else if std::env::var("OPENAI_API_KEY").map_or(true, |k| k.is_empty()) {
            warnings.push("No provider configured and OPENAI_API_KEY is not set".to_string());
        }

        if self.max_cycles() == 0 {
            errors.push("agent.max_cycles must be at least 1".to_string());
        }
        if self.search_max_results() == 0 {
            errors.push("tools.search.max_results must be at least 1".to_string());
        }

        (warnings, errors)
    }

    /// Fail on any `validate()` error. Warnings are logged and ignored.
    pub fn ensure_valid(&self) -> crate::error::Result<()> {
        let (warnings, errors) = self.validate();
        for warning in &warnings {
            tracing::warn!("Config: {warning}");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(crate::error::ScoutError::Config(errors.join("; ")))
        }
    }
}

/// Base directory for Scout data: `~/.scout/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".scout")
}
