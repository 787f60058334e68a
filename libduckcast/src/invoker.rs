//! Generation calls with credential rotation
//!
//! Every attempt takes a fresh credential from the pool, so a key that is
//! throttled or revoked is stepped around instead of retried. The attempt
//! budget is the number of healthy keys when the call starts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::credentials::{Credential, CredentialPool};
use crate::error::GenerationError;
use crate::generation::{GenerationClient, GenerationResult};
use crate::types::PromptMessage;

/// Pause between attempts
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Calls the generation service, rotating credentials on failure
pub struct ResilientInvoker {
    pool: Arc<CredentialPool>,
    client: Arc<dyn GenerationClient>,
    backoff: Duration,
}

impl ResilientInvoker {
    pub fn new(pool: Arc<CredentialPool>, client: Arc<dyn GenerationClient>) -> Self {
        Self {
            pool,
            client,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// Generate text, returning it trimmed
    ///
    /// # Errors
    ///
    /// - `NoHealthyCredential` if no key is usable at all, even after
    ///   re-probing the unhealthy keys whose last check is stale
    /// - `AllCredentialsExhausted` if every attempt failed; carries the last
    ///   underlying error
    pub async fn invoke(&self, messages: &[PromptMessage]) -> GenerationResult<String> {
        let messages = Arc::new(messages.to_vec());
        let text = self
            .with_rotation("text", |client, credential| {
                let messages = Arc::clone(&messages);
                async move { client.generate(credential.secret(), &messages).await }
            })
            .await?;
        Ok(text.trim().to_string())
    }

    /// Generate a JSON value that follows `schema`
    ///
    /// Same retry and failure semantics as [`invoke`](Self::invoke).
    pub async fn invoke_structured(
        &self,
        messages: &[PromptMessage],
        schema: &serde_json::Value,
    ) -> GenerationResult<serde_json::Value> {
        let messages = Arc::new(messages.to_vec());
        let schema = Arc::new(schema.clone());
        self.with_rotation("structured", |client, credential| {
            let messages = Arc::clone(&messages);
            let schema = Arc::clone(&schema);
            async move {
                client
                    .generate_structured(credential.secret(), &messages, &schema)
                    .await
            }
        })
        .await
    }

    /// True while at least one credential is healthy
    pub async fn health_check(&self) -> bool {
        self.available_count().await > 0
    }

    pub async fn available_count(&self) -> usize {
        self.pool.available_count().await
    }

    async fn with_rotation<T, F, Fut>(&self, kind: &str, call: F) -> GenerationResult<T>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn GenerationClient>, Credential) -> Fut,
        Fut: Future<Output = GenerationResult<T>> + Send + 'static,
    {
        let mut max_attempts = self.pool.available_count().await;
        if max_attempts == 0 {
            let recovered = self.pool.recover_stale().await;
            if recovered > 0 {
                info!(recovered, "Credentials recovered after all were unhealthy");
            }
            max_attempts = self.pool.available_count().await;
        }
        if max_attempts == 0 {
            return Err(GenerationError::NoHealthyCredential);
        }

        let mut last_error = None;
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            let credential = match self.pool.acquire().await {
                Ok(credential) => credential,
                // Keys can turn unhealthy under a concurrent caller mid-budget
                Err(e) if last_error.is_none() => return Err(e),
                Err(_) => break,
            };
            attempts = attempt;

            // Run the call on its own task so a slow provider never stalls the caller's task
            let task = tokio::spawn(call(Arc::clone(&self.client), credential.clone()));
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(GenerationError::Request(format!(
                    "Generation task failed: {}",
                    e
                ))),
            };

            match outcome {
                Ok(value) => {
                    debug!(
                        credential = %credential.masked(),
                        attempt,
                        "{} generation request succeeded", kind
                    );
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        credential = %credential.masked(),
                        error = %e,
                        "{} generation request failed on attempt {}/{}",
                        kind, attempt, max_attempts
                    );
                    self.pool.report_error(&credential, &e).await;
                    last_error = Some(e);

                    if attempt < max_attempts {
                        sleep(self.backoff).await;
                    }
                }
            }
        }

        Err(GenerationError::AllCredentialsExhausted {
            attempts,
            last_error: Box::new(last_error.unwrap_or(GenerationError::NoHealthyCredential)),
        })
    }
}
