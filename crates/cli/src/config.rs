//! Configuration loading from steward.toml.

use policy::Policy;
use runtime::AnthropicAuth;
use runtime::tools::McpServerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_INSTRUCTIONS: &str =
    "You are Steward, a helpful AI assistant. Be concise and direct. Use tools when they help.";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub session: SessionConfig,

    /// Tool policy: `[tools.categories]`, `[tools.sources]`, `[tools.overrides]`.
    #[serde(default)]
    pub tools: Policy,

    /// MCP servers to discover tools from.
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,

    /// Where the event log lives. Overridden by `STEWARD_DATA_DIR`.
    pub data_dir: Option<PathBuf>,
}

/// Backend provider configuration.
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    /// Provider name (currently only "anthropic" supported).
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model to use.
    #[serde(default = "default_model")]
    pub model: String,

    /// Standard Anthropic API key (sk-ant-api01-...).
    /// Mutually exclusive with oauth_token.
    pub api_key: Option<String>,

    /// Claude Code OAuth token (sk-ant-oat-...).
    /// Mutually exclusive with api_key.
    pub oauth_token: Option<String>,

    /// Set to false to keep the provider configured but unusable.
    #[serde(default = "enabled")]
    pub enabled: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            oauth_token: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Ceiling on model turns per session.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Prepended as a system message unless the history already has one.
    #[serde(default = "default_instructions")]
    pub custom_instructions: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            custom_instructions: default_instructions(),
        }
    }
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_steps() -> usize {
    runtime::DEFAULT_MAX_STEPS
}

fn default_instructions() -> String {
    DEFAULT_INSTRUCTIONS.to_string()
}

fn enabled() -> bool {
    true
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
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply environment fallbacks from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    /// `ANTHROPIC_API_KEY` fills a missing credential, `STEWARD_MODEL`
    /// replaces the model, `STEWARD_DATA_DIR` replaces the data directory.
    pub fn apply_env_with(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.backend.api_key.is_none() && self.backend.oauth_token.is_none() {
            self.backend.api_key = var("ANTHROPIC_API_KEY");
        }
        if let Some(model) = var("STEWARD_MODEL") {
            self.backend.model = model;
        }
        if let Some(dir) = var("STEWARD_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Build the authentication from config.
    ///
    /// Requires exactly one of api_key or oauth_token to be set.
    pub fn auth(&self) -> Result<AnthropicAuth, ConfigError> {
        match (&self.backend.api_key, &self.backend.oauth_token) {
            (Some(key), None) => Ok(AnthropicAuth::ApiKey(key.clone())),
            (None, Some(token)) => Ok(AnthropicAuth::ClaudeCodeOauth(token.clone())),
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousAuth),
            (None, None) => Err(ConfigError::MissingAuth),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("authentication not configured: set backend.api_key, backend.oauth_token or ANTHROPIC_API_KEY")]
    MissingAuth,

    #[error(
        "ambiguous authentication: set either backend.api_key OR backend.oauth_token, not both"
    )]
    AmbiguousAuth,

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy::{Status, ToolStatus};
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.backend.provider, "anthropic");
        assert_eq!(config.backend.model, DEFAULT_MODEL);
        assert!(config.backend.enabled);
        assert_eq!(config.session.max_steps, 25);
        assert_eq!(config.session.custom_instructions, DEFAULT_INSTRUCTIONS);
        assert_eq!(config.tools, Policy::default());
        assert!(config.mcp_servers.is_empty());
    }

    #[test]
    fn parses_full_config() {
        let config = Config::parse(
            r#"
            [backend]
            model = "claude-test"
            api_key = "sk-ant-api01-test"

            [session]
            max_steps = 5
            custom_instructions = "Answer in French."

            [tools.categories]
            filesystem = "requires_authorization"

            [tools.sources]
            github = "Disabled"

            [tools.overrides]
            read_file = "inherited"

            [[mcp_servers]]
            name = "github"
            command = "mcp-github"
            args = ["--read-only"]
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.model, "claude-test");
        assert_eq!(config.session.max_steps, 5);
        assert_eq!(
            config.tools.categories.get("filesystem"),
            Some(&Status::RequiresAuthorization)
        );
        assert_eq!(config.tools.sources.get("github"), Some(&Status::Disabled));
        assert_eq!(
            config.tools.overrides.get("read_file"),
            Some(&ToolStatus::Inherited)
        );
        assert_eq!(
            config.mcp_servers,
            vec![McpServerConfig {
                name: "github".into(),
                command: "mcp-github".into(),
                args: vec!["--read-only".into()],
            }]
        );
        assert!(matches!(config.auth(), Ok(AnthropicAuth::ApiKey(_))));
    }

    #[test]
    fn env_fills_missing_values() {
        let mut config = Config::default();
        config.apply_env_with(|name| match name {
            "ANTHROPIC_API_KEY" => Some("from-env".into()),
            "STEWARD_MODEL" => Some("claude-env".into()),
            "STEWARD_DATA_DIR" => Some("/tmp/steward".into()),
            _ => None,
        });
        assert_eq!(config.backend.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.backend.model, "claude-env");
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/steward")));
    }

    #[test]
    fn env_key_never_overrides_oauth() {
        let mut config = Config::parse("[backend]\noauth_token = \"sk-ant-oat-x\"").unwrap();
        config.apply_env_with(|_| Some("ignored".into()));
        assert!(matches!(config.auth(), Ok(AnthropicAuth::ClaudeCodeOauth(_))));
    }

    #[test]
    fn auth_requires_exactly_one_credential() {
        let config = Config::default();
        assert!(matches!(config.auth(), Err(ConfigError::MissingAuth)));

        let config =
            Config::parse("[backend]\napi_key = \"a\"\noauth_token = \"b\"").unwrap();
        assert!(matches!(config.auth(), Err(ConfigError::AmbiguousAuth)));
    }
}
