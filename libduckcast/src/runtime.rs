//! Wiring of the long-running service
//!
//! Leaves are built first (credential pool, logged-in identities), then the
//! components that depend on them. Everything is owned here behind `Arc`s.

use secrecy::SecretString;
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::broadcast::ActionBroadcaster;
use crate::config::Config;
use crate::content::{build_strategy, ReplyStrategy};
use crate::credentials::CredentialPool;
use crate::error::Result;
use crate::generation::gemini::GeminiClient;
use crate::generation::GenerationClient;
use crate::identities::{load_identity_file, load_invite_code, IdentityConfig, IdentityPool};
use crate::invoker::ResilientInvoker;
use crate::orchestrator::PostingOrchestrator;
use crate::platforms::rest::RestConnector;
use crate::platforms::Connector;
use crate::types::{CredentialStats, PromptMessage};

const SMOKE_TEST_PROMPT: &str = "Say hello in exactly 5 words.";

/// Snapshot of the running service, logged as JSON at startup
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStats {
    pub environment: String,
    pub generation_client: String,
    pub model: String,
    pub temperature: f32,
    pub available_credentials: usize,
    pub total_credentials: usize,
    pub credentials: Vec<CredentialStats>,
    pub identities: usize,
}

pub struct Runtime {
    config: Config,
    client: Arc<dyn GenerationClient>,
    credentials: Arc<CredentialPool>,
    invoker: Arc<ResilientInvoker>,
    identities: Arc<IdentityPool>,
    broadcaster: Arc<ActionBroadcaster>,
    orchestrator: Arc<PostingOrchestrator>,
}

impl Runtime {
    /// Build the runtime against the real services described by `config`
    ///
    /// Loads the identity file and invite code, then logs every identity in.
    pub async fn build(config: Config) -> Result<Self> {
        let client: Arc<dyn GenerationClient> = Arc::new(GeminiClient::new(&config.generation)?);
        let connector = RestConnector::new(&config.identities.base_url)?;

        let identity_configs = load_identity_file(&config.identities.file_path())?;
        let invite_code = load_invite_code(
            &config.identities.invite_code_env,
            Some(&config.identities.dotenv_path()),
        )?;

        Self::with_services(config, client, &connector, &identity_configs, &invite_code).await
    }

    /// Build the runtime over caller-supplied service clients
    pub async fn with_services(
        config: Config,
        client: Arc<dyn GenerationClient>,
        connector: &dyn Connector,
        identity_configs: &[IdentityConfig],
        invite_code: &SecretString,
    ) -> Result<Self> {
        let credentials = Arc::new(CredentialPool::from_config(
            &config.generation,
            Arc::clone(&client),
        )?);
        let invoker = Arc::new(
            ResilientInvoker::new(Arc::clone(&credentials), Arc::clone(&client))
                .with_backoff(Duration::from_millis(config.generation.retry_backoff_ms)),
        );
        info!(
            client = client.name(),
            credentials = config.generation.api_keys.len(),
            "Credential pool ready"
        );

        let identities =
            Arc::new(IdentityPool::connect(connector, identity_configs, invite_code).await?);
        info!(identities = identities.len(), "Identity pool ready");

        let broadcaster = Arc::new(ActionBroadcaster::from_config(
            Arc::clone(&identities),
            &config.broadcast,
        ));

        let max_chars = config.posting.max_post_chars;
        let orchestrator = Arc::new(PostingOrchestrator::new(
            Arc::clone(&identities),
            Arc::clone(&broadcaster),
            build_strategy(Arc::clone(&invoker), &config.content, max_chars),
            Box::new(ReplyStrategy::new(
                Arc::clone(&invoker),
                &config.content,
                max_chars,
            )),
            &config.posting,
        ));

        Ok(Self {
            config,
            client,
            credentials,
            invoker,
            identities,
            broadcaster,
            orchestrator,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<CredentialPool> {
        &self.credentials
    }

    pub fn invoker(&self) -> &Arc<ResilientInvoker> {
        &self.invoker
    }

    pub fn identities(&self) -> &Arc<IdentityPool> {
        &self.identities
    }

    pub fn broadcaster(&self) -> &Arc<ActionBroadcaster> {
        &self.broadcaster
    }

    pub fn orchestrator(&self) -> &Arc<PostingOrchestrator> {
        &self.orchestrator
    }

    /// Flag that stops the posting loop when set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.orchestrator.shutdown_handle()
    }

    /// Check that generation works end to end
    ///
    /// Failures are logged, not returned; a credential that is down now may
    /// recover before the first cycle needs it.
    pub async fn smoke_test(&self) -> bool {
        let healthy = self.invoker.health_check().await;
        info!(healthy, "Generation health");
        if !healthy {
            warn!("No healthy generation credentials");
            return false;
        }

        match self
            .invoker
            .invoke(&[PromptMessage::user(SMOKE_TEST_PROMPT)])
            .await
        {
            Ok(response) => {
                info!(response = %response, "Generation smoke test passed");
                true
            }
            Err(e) => {
                warn!(error = %e, "Generation smoke test failed");
                false
            }
        }
    }

    pub async fn stats(&self) -> RuntimeStats {
        let credentials = self.credentials.stats().await;
        RuntimeStats {
            environment: self.config.environment.clone(),
            generation_client: self.client.name().to_string(),
            model: self.config.generation.model_name.clone(),
            temperature: self.config.generation.temperature,
            available_credentials: credentials.iter().filter(|c| c.is_healthy).count(),
            total_credentials: credentials.len(),
            credentials,
            identities: self.identities.len(),
        }
    }

    /// Run the posting loop until shutdown
    pub async fn run(&self) -> Result<()> {
        self.orchestrator.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;
    use crate::error::{DuckcastError, IdentityError};
    use crate::generation::mock::MockGenerationClient;
    use crate::platforms::mock::MockConnector;

    fn config() -> Config {
        let mut config: Config = toml::from_str(
            r#"
environment = "test"

[generation]
api_keys = ["key-a", "key-b"]
max_requests_per_key = 2
retry_backoff_ms = 1
"#,
        )
        .unwrap();
        config.posting.sleep = crate::scheduling::SleepWindow::Fixed(Duration::from_millis(1));
        config
    }

    fn identities() -> Vec<IdentityConfig> {
        vec![
            IdentityConfig::new("alice", "pw", "Alice"),
            IdentityConfig::new("bob", "pw", "Bob"),
        ]
    }

    async fn runtime(client: MockGenerationClient, connector: &MockConnector) -> Result<Runtime> {
        Runtime::with_services(
            config(),
            Arc::new(client),
            connector,
            &identities(),
            &SecretString::from("invite".to_string()),
        )
        .await
    }

    #[tokio::test]
    async fn test_with_services_builds_everything() {
        let connector = MockConnector::new();
        let runtime = runtime(MockGenerationClient::success("hi"), &connector)
            .await
            .unwrap();

        assert_eq!(runtime.identities().len(), 2);
        assert_eq!(runtime.credentials().len().await, 2);
        assert_eq!(connector.sessions().len(), 2);
        assert_eq!(runtime.config().environment, "test");
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let connector = MockConnector::new();
        let runtime = runtime(MockGenerationClient::success("hi"), &connector)
            .await
            .unwrap();

        let stats = runtime.stats().await;
        assert_eq!(stats.environment, "test");
        assert_eq!(stats.generation_client, "mock");
        assert_eq!(stats.model, GenerationConfig::default().model_name);
        assert_eq!(stats.available_credentials, 2);
        assert_eq!(stats.total_credentials, 2);
        assert_eq!(stats.identities, 2);

        let json = serde_json::to_string(&stats).unwrap();
        assert!(!json.contains("key-a"));
        assert!(json.contains("...ey-a"));
    }

    #[tokio::test]
    async fn test_smoke_test() {
        let client = MockGenerationClient::success("Hello there my good friend");
        let connector = MockConnector::new();
        let runtime = runtime(client.clone(), &connector).await.unwrap();

        assert!(runtime.smoke_test().await);
        assert_eq!(client.prompts()[0][0].content, SMOKE_TEST_PROMPT);
    }

    #[tokio::test]
    async fn test_smoke_test_failure_is_not_fatal() {
        let connector = MockConnector::new();
        let runtime = runtime(MockGenerationClient::failing_keys(&["key-a", "key-b"]), &connector)
            .await
            .unwrap();

        assert!(!runtime.smoke_test().await);
        // Still usable afterwards
        assert_eq!(runtime.identities().len(), 2);
    }

    #[tokio::test]
    async fn test_login_failure_aborts_build() {
        let connector = MockConnector::new().with_failing_users(&["bob"]);
        let result = runtime(MockGenerationClient::success("hi"), &connector).await;
        assert!(matches!(
            result,
            Err(DuckcastError::Identity(IdentityError::Login { .. }))
        ));
    }

    #[tokio::test]
    async fn test_one_cycle_through_runtime() {
        let connector = MockConnector::new();
        let runtime = runtime(MockGenerationClient::success("a post"), &connector)
            .await
            .unwrap();

        runtime.orchestrator().run_once().await.unwrap();

        let sessions = connector.sessions();
        let posts: usize = sessions.iter().map(|s| s.posts().len()).sum();
        assert_eq!(posts, 3);
    }
}
