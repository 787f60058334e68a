//! Error types for Duckcast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DuckcastError>;

#[derive(Error, Debug)]
pub enum DuckcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Generated content exceeds {limit} character limit after {attempts} attempts")]
    ContentTooLong { limit: usize, attempts: usize },

    #[error("Headline source error: {0}")]
    Headlines(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl DuckcastError {
    /// Returns the appropriate exit code for this error
    ///
    /// Only setup failures ever reach the process boundary; the posting loop
    /// absorbs everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            DuckcastError::InvalidInput(_) => 3,
            _ => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("No usable configuration source: file ({file}); environment ({env})")]
    NoSource { file: String, env: String },
}

/// Failures talking to the text-generation service
///
/// Cloneable so the invoker can keep the last failure after reporting it
/// against the credential that produced it.
#[derive(Error, Debug, Clone)]
pub enum GenerationError {
    #[error("Credential rejected: {0}")]
    Authentication(String),

    #[error("Quota or rate limit hit: {0}")]
    RateLimited(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("No healthy credential available")]
    NoHealthyCredential,

    #[error("All credentials failed after {attempts} attempts. Last error: {last_error}")]
    AllCredentialsExhausted {
        attempts: usize,
        last_error: Box<GenerationError>,
    },
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Already engaged: {0}")]
    AlreadyEngaged(String),

    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Failed to read identity file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse identity file: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("No valid identities found in {0}")]
    NoValidEntries(String),

    #[error("Invite code not found (checked ${0} and .env)")]
    MissingInviteCode(String),

    #[error("Identity pool cannot be empty")]
    EmptyPool,

    #[error("Login failed for {username}: {source}")]
    Login {
        username: String,
        #[source]
        source: PlatformError,
    },
}
