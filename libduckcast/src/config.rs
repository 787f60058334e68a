//! Configuration management for Duckcast
//!
//! Configuration comes from a TOML file. When the file cannot be read, the
//! generation settings are taken from environment variables instead and
//! every other section keeps its defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::content::StrategyKind;
use crate::credentials::mask_key;
use crate::error::{ConfigError, DuckcastError, Result};
use crate::generation::gemini::ALLOWED_MODELS;
use crate::scheduling::SleepWindow;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    pub generation: GenerationConfig,

    #[serde(default)]
    pub identities: IdentitiesConfig,

    #[serde(default)]
    pub posting: PostingConfig,

    #[serde(default)]
    pub broadcast: BroadcastConfig,

    #[serde(default)]
    pub content: ContentConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub api_keys: Vec<String>,
    pub max_requests_per_key: u32,
    pub retry_backoff_ms: u64,
    pub health_probe_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    /// Override for the service endpoint, mainly for tests
    pub base_url: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model_name: "gemini-2.5-flash-lite".to_string(),
            temperature: 0.7,
            max_tokens: None,
            api_keys: Vec::new(),
            max_requests_per_key: 15,
            retry_backoff_ms: 1000,
            health_probe_timeout_secs: 10,
            health_check_interval_secs: 600,
            base_url: None,
        }
    }
}

// Keys never reach logs in full
impl std::fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.api_keys.iter().map(|k| mask_key(k)).collect();
        f.debug_struct("GenerationConfig")
            .field("model_name", &self.model_name)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_keys", &keys)
            .field("max_requests_per_key", &self.max_requests_per_key)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("health_probe_timeout_secs", &self.health_probe_timeout_secs)
            .field("health_check_interval_secs", &self.health_check_interval_secs)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitiesConfig {
    /// JSON file of the form `{"bots": [{user_name, password, display_name}]}`
    pub file: String,
    /// Environment variable (and `.env` key) holding the invite code
    pub invite_code_env: String,
    pub dotenv_file: String,
    pub base_url: String,
}

impl Default for IdentitiesConfig {
    fn default() -> Self {
        Self {
            file: "~/.config/duckcast/bots.json".to_string(),
            invite_code_env: "INVITE_CODE".to_string(),
            dotenv_file: ".env".to_string(),
            base_url: "http://localhost:3000".to_string(),
        }
    }
}

impl IdentitiesConfig {
    pub fn file_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.file).to_string())
    }

    pub fn dotenv_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.dotenv_file).to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostingConfig {
    pub publish_timeout_secs: u64,
    /// Limit in Unicode scalar values
    pub max_post_chars: usize,
    pub max_generation_attempts: usize,
    pub replies_per_post: usize,
    pub reply_retry_delay_secs: u64,
    pub cycle_failure_delay_secs: u64,
    pub sleep: SleepWindow,
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            publish_timeout_secs: 15,
            max_post_chars: 255,
            max_generation_attempts: 5,
            replies_per_post: 2,
            reply_retry_delay_secs: 10,
            cycle_failure_delay_secs: 20,
            sleep: SleepWindow::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub action_timeout_secs: u64,
    pub overall_timeout_secs: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            action_timeout_secs: 15,
            overall_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub strategy: StrategyKind,
    pub topic: String,
    pub persona: String,
    /// Text file of headlines, one per line, read by the news strategy
    pub headlines_file: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Basic,
            topic: "open source software".to_string(),
            persona: "a friendly technology enthusiast".to_string(),
            headlines_file: "~/.config/duckcast/headlines.txt".to_string(),
        }
    }
}

impl ContentConfig {
    pub fn headlines_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.headlines_file).to_string())
    }
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn invalid(field: &str, reason: impl Into<String>) -> DuckcastError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
    .into()
}

/// Split a comma separated key list, dropping blanks
fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(name, format!("could not parse '{}'", value)))
}

impl Config {
    /// Load configuration from the default location, falling back to the
    /// environment when the file cannot be read
    ///
    /// # Errors
    ///
    /// A file that exists but does not parse or validate is an error on its
    /// own. When neither the file nor the environment yields a config,
    /// `ConfigError::NoSource` carries both causes.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_or_env(&config_path)
    }

    /// Load from `path`, falling back to the environment if it cannot be read
    pub fn load_or_env(path: &Path) -> Result<Self> {
        match Self::load_from_path(path) {
            Ok(config) => Ok(config),
            Err(DuckcastError::Config(ConfigError::ReadError(file_error))) => {
                tracing::debug!(
                    path = %path.display(),
                    error = %file_error,
                    "Config file unavailable, reading environment"
                );
                Self::from_env().map_err(|env_error| {
                    ConfigError::NoSource {
                        file: format!("{}: {}", path.display(), file_error),
                        env: env_error.to_string(),
                    }
                    .into()
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let mut config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from environment variables
    ///
    /// `GOOGLE_API_KEYS` (comma separated) is required. `LLM_MODEL`,
    /// `LLM_TEMPERATURE`, `LLM_MAX_TOKENS`, `MAX_REQUESTS_PER_KEY`,
    /// `LOG_LEVEL` and `ENVIRONMENT` are optional.
    pub fn from_env() -> Result<Self> {
        let keys = std::env::var("GOOGLE_API_KEYS")
            .map_err(|_| ConfigError::MissingField("GOOGLE_API_KEYS".to_string()))?;

        let mut generation = GenerationConfig {
            api_keys: parse_key_list(&keys),
            ..Default::default()
        };
        if let Ok(model) = std::env::var("LLM_MODEL") {
            generation.model_name = model;
        }
        if let Ok(value) = std::env::var("LLM_TEMPERATURE") {
            generation.temperature = parse_env("LLM_TEMPERATURE", &value)?;
        }
        if let Ok(value) = std::env::var("LLM_MAX_TOKENS") {
            generation.max_tokens = Some(parse_env("LLM_MAX_TOKENS", &value)?);
        }
        if let Ok(value) = std::env::var("MAX_REQUESTS_PER_KEY") {
            generation.max_requests_per_key = parse_env("MAX_REQUESTS_PER_KEY", &value)?;
        }

        let mut config = Config {
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| default_environment()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| default_log_level()),
            generation,
            identities: IdentitiesConfig::default(),
            posting: PostingConfig::default(),
            broadcast: BroadcastConfig::default(),
            content: ContentConfig::default(),
        };
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn normalize(&mut self) {
        self.log_level = self.log_level.trim().to_lowercase();
        for key in &mut self.generation.api_keys {
            *key = key.trim().to_string();
        }
    }

    /// Check every value against its allowed range
    pub fn validate(&self) -> Result<()> {
        let generation = &self.generation;

        if !ALLOWED_MODELS.contains(&generation.model_name.as_str()) {
            return Err(invalid(
                "generation.model_name",
                format!(
                    "'{}' is not one of: {}",
                    generation.model_name,
                    ALLOWED_MODELS.join(", ")
                ),
            ));
        }
        if !(0.0..=2.0).contains(&generation.temperature) {
            return Err(invalid(
                "generation.temperature",
                "must be between 0.0 and 2.0",
            ));
        }
        if generation.api_keys.is_empty() {
            return Err(invalid(
                "generation.api_keys",
                "at least one API key must be provided",
            ));
        }
        if generation.api_keys.iter().any(|k| k.is_empty()) {
            return Err(invalid("generation.api_keys", "API keys cannot be blank"));
        }
        if !(1..=100).contains(&generation.max_requests_per_key) {
            return Err(invalid(
                "generation.max_requests_per_key",
                "must be between 1 and 100",
            ));
        }
        if generation.health_probe_timeout_secs == 0 {
            return Err(invalid(
                "generation.health_probe_timeout_secs",
                "must be at least 1",
            ));
        }

        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(invalid(
                "log_level",
                format!("must be one of: {}", LOG_LEVELS.join(", ")),
            ));
        }

        let posting = &self.posting;
        if posting.max_post_chars == 0 {
            return Err(invalid("posting.max_post_chars", "must be at least 1"));
        }
        if posting.max_generation_attempts == 0 {
            return Err(invalid(
                "posting.max_generation_attempts",
                "must be at least 1",
            ));
        }
        if posting.publish_timeout_secs == 0 {
            return Err(invalid("posting.publish_timeout_secs", "must be at least 1"));
        }

        if self.broadcast.action_timeout_secs == 0 || self.broadcast.overall_timeout_secs == 0 {
            return Err(invalid("broadcast", "timeouts must be at least 1 second"));
        }

        if self.content.topic.trim().is_empty() {
            return Err(invalid("content.topic", "cannot be empty"));
        }
        if self.content.strategy == StrategyKind::News
            && self.content.headlines_file.trim().is_empty()
        {
            return Err(invalid(
                "content.headlines_file",
                "required by the news strategy",
            ));
        }

        Ok(())
    }
}

/// Resolve the configuration file path (XDG config dir unless overridden)
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("DUCKCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("duckcast").join("config.toml"))
}
