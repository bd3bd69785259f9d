//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/trajectory/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/trajectory/` (~/.config/trajectory/)
//! - Data: `$XDG_DATA_HOME/trajectory/` (~/.local/share/trajectory/)
//! - State/Logs: `$XDG_STATE_HOME/trajectory/` (~/.local/state/trajectory/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "trajectory";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// LLM configuration for rule-guided classification (optional).
    ///
    /// When absent, only the heuristic tier runs.
    #[serde(default)]
    pub llm: Option<LlmConfig>,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Indicator history queries
    #[serde(default)]
    pub history: HistoryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// LLM provider configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Provider type
    pub provider: LlmProvider,
    /// Model to use
    pub model: String,
    /// API endpoint (optional, uses default for provider)
    pub endpoint: Option<String>,
    /// API key (can also use env var)
    pub api_key: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl LlmConfig {
    /// Resolve the credential for this provider.
    ///
    /// Ollama needs none; hosted providers fall back to their env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        match self.provider {
            LlmProvider::Ollama => None,
            LlmProvider::Claude => self
                .api_key
                .clone()
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok()),
            LlmProvider::OpenAI => self
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok()),
        }
    }

    /// Whether this provider can be called with the resolved credential.
    pub fn has_credential(&self) -> bool {
        matches!(self.provider, LlmProvider::Ollama) || self.resolve_api_key().is_some()
    }
}

fn default_llm_timeout() -> u64 {
    8
}

/// Supported LLM providers
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    Claude,
    OpenAI,
}

impl LlmProvider {
    /// Returns the default endpoint for this provider
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "http://localhost:11434",
            LlmProvider::Claude => "https://api.anthropic.com",
            LlmProvider::OpenAI => "https://api.openai.com",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "ollama",
            LlmProvider::Claude => "claude",
            LlmProvider::OpenAI => "openai",
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address the analysis endpoint listens on
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

/// Indicator history configuration
#[derive(Debug, Deserialize)]
pub struct HistoryConfig {
    /// How many indicators a "recent indicators" query returns by default
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            recent_limit: default_recent_limit(),
        }
    }
}

fn default_recent_limit() -> usize {
    5
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/trajectory/config.toml` (~/.config/trajectory/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join(APP_DIR).join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join(APP_DIR)
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join(APP_DIR)
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/trajectory/data.db` (~/.local/share/trajectory/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("trajectory.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.llm.is_none());
        assert_eq!(config.server.bind, "127.0.0.1:8787");
        assert_eq!(config.history.recent_limit, 5);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[llm]
provider = "openai"
model = "gpt-4o-mini"
endpoint = "https://gateway.example.com"
api_key = "sk-test"

[server]
bind = "0.0.0.0:9000"

[history]
recent_limit = 10

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        let llm = config.llm.unwrap();
        assert_eq!(llm.provider, LlmProvider::OpenAI);
        assert_eq!(llm.model, "gpt-4o-mini");
        assert_eq!(llm.timeout_secs, 8);
        assert!(llm.has_credential());
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.history.recent_limit, 10);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_llm_provider_endpoints() {
        assert_eq!(
            LlmProvider::Ollama.default_endpoint(),
            "http://localhost:11434"
        );
        assert_eq!(
            LlmProvider::Claude.default_endpoint(),
            "https://api.anthropic.com"
        );
    }

    #[test]
    fn test_ollama_needs_no_credential() {
        let llm = LlmConfig {
            provider: LlmProvider::Ollama,
            model: "llama3.2".to_string(),
            endpoint: None,
            api_key: None,
            timeout_secs: 8,
        };
        assert!(llm.resolve_api_key().is_none());
        assert!(llm.has_credential());
    }

    #[test]
    fn test_load_from_rejects_invalid_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[llm\nprovider = ").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
