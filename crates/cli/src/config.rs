//! Configuration loading from mcp-agent.toml.

use std::path::Path;
use std::time::Duration;

use mcp::{ProviderConfig, SessionOptions};
use runtime::backend::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use serde::Deserialize;

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Top-level configuration.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Backend configuration.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Session tuning.
    #[serde(default)]
    pub session: SessionConfig,

    /// Tool providers to start, in order.
    #[serde(default, rename = "provider")]
    pub providers: Vec<ProviderConfig>,
}

/// Backend provider configuration.
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    /// Model to use.
    #[serde(default = "default_model")]
    pub model: String,

    /// API key. Falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            base_url: default_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Session configuration.
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Per-request timeout for provider exchanges. 0 disables it.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Number of history messages sent with each request.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_timeout_secs() -> u64 {
    mcp::DEFAULT_TIMEOUT.as_secs()
}

fn default_history_limit() -> usize {
    runtime::DEFAULT_HISTORY_LIMIT
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load the file if it exists, otherwise use defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (index, provider) in self.providers.iter().enumerate() {
            if provider.command.is_empty() {
                return Err(ConfigError::EmptyCommand(provider.name.clone()));
            }
            if self.providers[..index].iter().any(|p| p.name == provider.name) {
                return Err(ConfigError::DuplicateProvider(provider.name.clone()));
            }
        }
        Ok(())
    }

    /// Resolve the API key from config, then the environment.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        self.api_key_or(std::env::var(API_KEY_ENV).ok())
    }

    fn api_key_or(&self, from_env: Option<String>) -> Result<String, ConfigError> {
        self.backend
            .api_key
            .clone()
            .or(from_env)
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    /// Provider session options derived from `[session]`.
    pub fn session_options(&self) -> SessionOptions {
        let timeout = match self.session.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        SessionOptions {
            timeout,
            ..SessionOptions::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("API key not configured: set backend.api_key or OPENAI_API_KEY")]
    MissingApiKey,

    #[error("provider '{0}' has an empty command")]
    EmptyCommand(String),

    #[error("provider '{0}' is configured more than once")]
    DuplicateProvider(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[backend]
model = "gpt-4o-mini"
base_url = "http://localhost:11434/v1"

[session]
timeout_secs = 30

[[provider]]
name = "slack"
command = ["npx", "-y", "@modelcontextprotocol/server-slack"]
env = { SLACK_BOT_TOKEN = "xoxb-test" }

[[provider]]
name = "filesystem"
command = ["mcp-server-filesystem", "/tmp"]
"#;

    #[test]
    fn parses_full_config() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.backend.model, "gpt-4o-mini");
        assert_eq!(config.backend.max_tokens, 1500);
        assert_eq!(config.session.history_limit, 10);

        let names: Vec<_> = config.providers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["slack", "filesystem"]);
        assert_eq!(config.providers[0].env["SLACK_BOT_TOKEN"], "xoxb-test");
        assert!(config.providers[1].env.is_empty());

        let options = config.session_options();
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.backend.model, DEFAULT_MODEL);
        assert_eq!(config.backend.base_url, DEFAULT_BASE_URL);
        assert!(config.providers.is_empty());
        assert_eq!(config.session_options().timeout, Some(mcp::DEFAULT_TIMEOUT));
    }

    #[test]
    fn zero_timeout_disables_it() {
        let config = Config::parse("[session]\ntimeout_secs = 0").unwrap();
        assert_eq!(config.session_options().timeout, None);
    }

    #[test]
    fn api_key_prefers_config_over_env() {
        let config = Config::parse("[backend]\napi_key = \"from-file\"").unwrap();
        assert_eq!(config.api_key_or(Some("from-env".into())).unwrap(), "from-file");

        let config = Config::default();
        assert_eq!(config.api_key_or(Some("from-env".into())).unwrap(), "from-env");
        assert!(matches!(config.api_key_or(None), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn rejects_empty_command() {
        let result = Config::parse("[[provider]]\nname = \"x\"\ncommand = []");
        assert!(matches!(result, Err(ConfigError::EmptyCommand(name)) if name == "x"));
    }

    #[test]
    fn rejects_duplicate_names() {
        let toml = "[[provider]]\nname = \"a\"\ncommand = [\"one\"]\n\n[[provider]]\nname = \"a\"\ncommand = [\"two\"]";
        assert!(matches!(
            Config::parse(toml),
            Err(ConfigError::DuplicateProvider(_))
        ));
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        assert!(matches!(Config::parse("[backend"), Err(ConfigError::Parse(_))));
    }
}
