//! Client configuration loading from file and environment variables.

use serde::Deserialize;
use thiserror::Error;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Gateway connection settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Agent identity and behavior.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the session gateway lives.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// HTTP base URL; the duplex channel address is derived from it.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

/// Agent configuration. `agent_id` has no default: the session refuses to
/// start until one is configured.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent_id: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_instructions")]
    pub instructions: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "confab_session=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_instructions() -> String {
    "You are an AI voice assistant designed to have natural conversations with users. \
     Keep your responses conversational and easy to understand when spoken."
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            model: default_model(),
            instructions: default_instructions(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CONFAB_GATEWAY_URL` overrides `gateway.base_url`
/// - `CONFAB_AGENT_ID` overrides `agent.agent_id`
/// - `CONFAB_AGENT_MODEL` overrides `agent.model`
/// - `CONFAB_AGENT_INSTRUCTIONS` overrides `agent.instructions`
/// - `CONFAB_LOG_LEVEL` overrides `logging.level`
/// - `CONFAB_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(base_url) = std::env::var("CONFAB_GATEWAY_URL") {
        config.gateway.base_url = base_url;
    }
    if let Ok(agent_id) = std::env::var("CONFAB_AGENT_ID") {
        config.agent.agent_id = agent_id;
    }
    if let Ok(model) = std::env::var("CONFAB_AGENT_MODEL") {
        config.agent.model = model;
    }
    if let Ok(instructions) = std::env::var("CONFAB_AGENT_INSTRUCTIONS") {
        config.agent.instructions = instructions;
    }
    if let Ok(level) = std::env::var("CONFAB_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("CONFAB_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}
