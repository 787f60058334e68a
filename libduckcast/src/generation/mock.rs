//! Mock generation client for testing
//!
//! Simulates a generation service that can succeed, fail for particular
//! keys, replay a scripted sequence of outcomes, and add latency. Every call
//! records the key it was made with so tests can verify rotation.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use super::{GenerationClient, GenerationResult};
use crate::error::GenerationError;
use crate::types::PromptMessage;

/// Configuration for mock generation behavior
#[derive(Debug, Clone)]
pub struct MockGenerationConfig {
    /// Text returned when nothing is scripted
    pub default_response: String,

    /// JSON returned by structured calls when nothing is scripted
    pub structured_response: serde_json::Value,

    /// Keys whose calls and probes always fail
    pub failing_keys: Vec<String>,

    /// Outcomes consumed in order before falling back to the defaults
    pub scripted: Arc<Mutex<VecDeque<GenerationResult<String>>>>,

    /// Whether health probes succeed for keys not listed in `failing_keys`
    pub probe_succeeds: Arc<Mutex<bool>>,

    /// Delay before completing generation calls
    pub delay: Duration,

    /// Key used by every generate/generate_structured call, in order
    pub calls: Arc<Mutex<Vec<String>>>,

    /// Key used by every probe, in order
    pub probe_calls: Arc<Mutex<Vec<String>>>,

    /// Prompts received, in order
    pub prompts: Arc<Mutex<Vec<Vec<PromptMessage>>>>,
}

impl Default for MockGenerationConfig {
    fn default() -> Self {
        Self {
            default_response: "Mock generated content".to_string(),
            structured_response: serde_json::json!({ "post": "Mock structured content" }),
            failing_keys: Vec::new(),
            scripted: Arc::new(Mutex::new(VecDeque::new())),
            probe_succeeds: Arc::new(Mutex::new(true)),
            delay: Duration::from_millis(0),
            calls: Arc::new(Mutex::new(Vec::new())),
            probe_calls: Arc::new(Mutex::new(Vec::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock generation service
#[derive(Debug, Clone)]
pub struct MockGenerationClient {
    config: MockGenerationConfig,
}

impl MockGenerationClient {
    pub fn new(config: MockGenerationConfig) -> Self {
        Self { config }
    }

    /// Create a client that always answers with `response`
    pub fn success(response: &str) -> Self {
        Self::new(MockGenerationConfig {
            default_response: response.to_string(),
            ..Default::default()
        })
    }

    /// Create a client that rejects the given keys and accepts all others
    pub fn failing_keys(keys: &[&str]) -> Self {
        Self::new(MockGenerationConfig {
            failing_keys: keys.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        })
    }

    /// Create a client that replays `outcomes` before using the defaults
    pub fn scripted(outcomes: Vec<GenerationResult<String>>) -> Self {
        Self::new(MockGenerationConfig {
            scripted: Arc::new(Mutex::new(outcomes.into())),
            ..Default::default()
        })
    }

    /// Create a client with a delay on every generation call
    pub fn with_delay(delay: Duration) -> Self {
        Self::new(MockGenerationConfig {
            delay,
            ..Default::default()
        })
    }

    /// Queue another outcome
    pub fn push_outcome(&self, outcome: GenerationResult<String>) {
        self.config.scripted.lock().unwrap().push_back(outcome);
    }

    /// Change whether probes succeed from now on
    pub fn set_probe_succeeds(&self, succeeds: bool) {
        *self.config.probe_succeeds.lock().unwrap() = succeeds;
    }

    /// Keys used by generation calls, in order
    pub fn calls(&self) -> Vec<String> {
        self.config.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.config.calls.lock().unwrap().len()
    }

    /// Keys used by probes, in order
    pub fn probe_calls(&self) -> Vec<String> {
        self.config.probe_calls.lock().unwrap().clone()
    }

    /// Prompts received by generation calls, in order
    pub fn prompts(&self) -> Vec<Vec<PromptMessage>> {
        self.config.prompts.lock().unwrap().clone()
    }

    fn key_fails(&self, key: &str) -> bool {
        self.config.failing_keys.iter().any(|k| k == key)
    }

    async fn next_outcome(
        &self,
        api_key: &SecretString,
        messages: &[PromptMessage],
    ) -> Option<GenerationResult<String>> {
        let key = api_key.expose_secret().to_string();
        self.config.calls.lock().unwrap().push(key.clone());
        self.config.prompts.lock().unwrap().push(messages.to_vec());

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if self.key_fails(&key) {
            return Some(Err(GenerationError::Authentication(format!(
                "Mock key {} rejected",
                key
            ))));
        }

        self.config.scripted.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl GenerationClient for MockGenerationClient {
    async fn generate(
        &self,
        api_key: &SecretString,
        messages: &[PromptMessage],
    ) -> GenerationResult<String> {
        match self.next_outcome(api_key, messages).await {
            Some(outcome) => outcome,
            None => Ok(self.config.default_response.clone()),
        }
    }

    async fn generate_structured(
        &self,
        api_key: &SecretString,
        messages: &[PromptMessage],
        _schema: &serde_json::Value,
    ) -> GenerationResult<serde_json::Value> {
        match self.next_outcome(api_key, messages).await {
            Some(Ok(text)) => serde_json::from_str(&text)
                .map_err(|e| GenerationError::InvalidResponse(e.to_string())),
            Some(Err(e)) => Err(e),
            None => Ok(self.config.structured_response.clone()),
        }
    }

    async fn probe(&self, api_key: &SecretString) -> GenerationResult<()> {
        let key = api_key.expose_secret().to_string();
        self.config.probe_calls.lock().unwrap().push(key.clone());

        if self.key_fails(&key) || !*self.config.probe_succeeds.lock().unwrap() {
            return Err(GenerationError::Authentication(format!(
                "Mock probe failed for {}",
                key
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
