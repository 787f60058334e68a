//! Text-generation service abstraction
//!
//! The credential pool and the resilient invoker only ever talk to the
//! generation service through [`GenerationClient`]. Every call carries the
//! credential to use, so a single client instance serves the whole pool.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::GenerationError;
use crate::types::PromptMessage;

pub mod gemini;

// Mock client is available for all builds (not just tests) to support integration tests
pub mod mock;

pub type GenerationResult<T> = std::result::Result<T, GenerationError>;

/// Client for a text-generation service that authenticates per request
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate free-form text for the given prompt
    ///
    /// # Errors
    ///
    /// Errors are tied to the credential used: rejected keys, exhausted
    /// quota and transient transport failures all surface here so the caller
    /// can record them against `api_key`.
    async fn generate(
        &self,
        api_key: &SecretString,
        messages: &[PromptMessage],
    ) -> GenerationResult<String>;

    /// Generate a response constrained to a JSON schema
    async fn generate_structured(
        &self,
        api_key: &SecretString,
        messages: &[PromptMessage],
        schema: &serde_json::Value,
    ) -> GenerationResult<serde_json::Value>;

    /// Minimal request used by credential health checks
    async fn probe(&self, api_key: &SecretString) -> GenerationResult<()> {
        self.generate(api_key, &[PromptMessage::user("test")])
            .await
            .map(|_| ())
    }

    /// Short identifier for logs (e.g. "gemini", "mock")
    fn name(&self) -> &str;
}
