//! Mock posting service for testing
//!
//! Sessions record everything they are asked to do and can be configured to
//! fail, stall or succeed, so the identity pool, broadcaster and orchestrator
//! can be exercised without network access.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use super::{Connector, PlatformResult, Session};
use crate::error::PlatformError;
use crate::identities::IdentityConfig;
use crate::types::Profile;

/// Configuration for mock session behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub username: String,
    pub display_name: String,

    pub post_succeeds: bool,
    pub like_succeeds: bool,
    pub repost_succeeds: bool,

    /// Error returned when posting fails
    pub post_error: Option<PlatformError>,

    /// Error returned when a like or repost fails
    pub engage_error: Option<PlatformError>,

    /// Number of upcoming post calls that fail before posting recovers
    pub failing_posts: Arc<Mutex<usize>>,

    /// Delay before completing any operation
    pub delay: Duration,

    /// Content and parent of every accepted post
    pub posts: Arc<Mutex<Vec<(String, Option<String>)>>>,

    pub post_call_count: Arc<Mutex<usize>>,
    pub likes: Arc<Mutex<Vec<String>>>,
    pub reposts: Arc<Mutex<Vec<String>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            username: "mock".to_string(),
            display_name: "Mock".to_string(),
            post_succeeds: true,
            like_succeeds: true,
            repost_succeeds: true,
            post_error: None,
            engage_error: None,
            failing_posts: Arc::new(Mutex::new(0)),
            delay: Duration::from_millis(0),
            posts: Arc::new(Mutex::new(Vec::new())),
            post_call_count: Arc::new(Mutex::new(0)),
            likes: Arc::new(Mutex::new(Vec::new())),
            reposts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockConfig {
    /// Same behavior for another account, with its own counters
    fn for_account(&self, username: &str, display_name: &str) -> Self {
        Self {
            username: username.to_string(),
            display_name: display_name.to_string(),
            post_succeeds: self.post_succeeds,
            like_succeeds: self.like_succeeds,
            repost_succeeds: self.repost_succeeds,
            post_error: self.post_error.clone(),
            engage_error: self.engage_error.clone(),
            failing_posts: Arc::new(Mutex::new(*self.failing_posts.lock().unwrap())),
            delay: self.delay,
            ..Default::default()
        }
    }
}

/// Mock session for testing
///
/// Clones share their recorded state, so a test can keep a handle while the
/// code under test owns another.
#[derive(Debug, Clone)]
pub struct MockSession {
    config: MockConfig,
}

impl MockSession {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// A session where every operation succeeds
    pub fn success(username: &str) -> Self {
        Self::new(MockConfig {
            username: username.to_string(),
            display_name: username.to_string(),
            ..Default::default()
        })
    }

    /// A session whose posts always fail
    pub fn post_failure(username: &str, error: PlatformError) -> Self {
        Self::new(MockConfig {
            username: username.to_string(),
            display_name: username.to_string(),
            post_succeeds: false,
            post_error: Some(error),
            ..Default::default()
        })
    }

    /// A session whose likes and reposts always fail
    pub fn engage_failure(username: &str, error: PlatformError) -> Self {
        Self::new(MockConfig {
            username: username.to_string(),
            display_name: username.to_string(),
            like_succeeds: false,
            repost_succeeds: false,
            engage_error: Some(error),
            ..Default::default()
        })
    }

    /// A session whose first `count` posts fail with a network error
    pub fn with_failing_posts(username: &str, count: usize) -> Self {
        Self::new(MockConfig {
            username: username.to_string(),
            display_name: username.to_string(),
            failing_posts: Arc::new(Mutex::new(count)),
            ..Default::default()
        })
    }

    /// A session that waits `delay` before every operation
    pub fn with_delay(username: &str, delay: Duration) -> Self {
        Self::new(MockConfig {
            username: username.to_string(),
            display_name: username.to_string(),
            delay,
            ..Default::default()
        })
    }

    pub fn username(&self) -> &str {
        &self.config.username
    }

    /// Content and parent id of every accepted post
    pub fn posts(&self) -> Vec<(String, Option<String>)> {
        self.config.posts.lock().unwrap().clone()
    }

    pub fn post_call_count(&self) -> usize {
        *self.config.post_call_count.lock().unwrap()
    }

    /// Post ids this session liked
    pub fn likes(&self) -> Vec<String> {
        self.config.likes.lock().unwrap().clone()
    }

    /// Post ids this session reposted
    pub fn reposts(&self) -> Vec<String> {
        self.config.reposts.lock().unwrap().clone()
    }

    async fn simulate_latency(&self) {
        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }
    }

    fn engage_error(&self, action: &str) -> PlatformError {
        self.config
            .engage_error
            .clone()
            .unwrap_or_else(|| PlatformError::Posting(format!("Mock {} failed", action)))
    }
}

#[async_trait]
impl Session for MockSession {
    async fn who_am_i(&self) -> PlatformResult<Profile> {
        self.simulate_latency().await;
        Ok(Profile {
            username: self.config.username.clone(),
            display_name: self.config.display_name.clone(),
        })
    }

    async fn post(&self, content: &str, parent_id: Option<&str>) -> PlatformResult<String> {
        *self.config.post_call_count.lock().unwrap() += 1;
        self.simulate_latency().await;

        {
            let mut failing = self.config.failing_posts.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(PlatformError::Network("Mock transient failure".to_string()));
            }
        }

        if !self.config.post_succeeds {
            return Err(self
                .config
                .post_error
                .clone()
                .unwrap_or_else(|| PlatformError::Posting("Mock posting failed".to_string())));
        }

        self.config
            .posts
            .lock()
            .unwrap()
            .push((content.to_string(), parent_id.map(str::to_string)));

        Ok(format!("{}-{}", self.config.username, uuid::Uuid::new_v4()))
    }

    async fn like(&self, post_id: &str) -> PlatformResult<()> {
        self.simulate_latency().await;
        if !self.config.like_succeeds {
            return Err(self.engage_error("like"));
        }
        self.config.likes.lock().unwrap().push(post_id.to_string());
        Ok(())
    }

    async fn repost(&self, post_id: &str) -> PlatformResult<()> {
        self.simulate_latency().await;
        if !self.config.repost_succeeds {
            return Err(self.engage_error("repost"));
        }
        self.config.reposts.lock().unwrap().push(post_id.to_string());
        Ok(())
    }
}

/// Mock connector handing out [`MockSession`]s
///
/// Every session is built from a template configuration, renamed to the
/// identity that logged in. Created sessions are kept for inspection.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    template: MockConfig,
    failing_users: Vec<String>,
    sessions: Arc<Mutex<Vec<MockSession>>>,
    invite_codes: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `template` for the behavior of every session
    pub fn with_template(mut self, template: MockConfig) -> Self {
        self.template = template;
        self
    }

    /// Reject logins for these usernames
    pub fn with_failing_users(mut self, users: &[&str]) -> Self {
        self.failing_users = users.iter().map(|u| u.to_string()).collect();
        self
    }

    /// Sessions created so far, in login order
    pub fn sessions(&self) -> Vec<MockSession> {
        self.sessions.lock().unwrap().clone()
    }

    /// Invite codes presented at login
    pub fn invite_codes(&self) -> Vec<String> {
        self.invite_codes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn login(
        &self,
        identity: &IdentityConfig,
        invite_code: &SecretString,
    ) -> PlatformResult<Box<dyn Session>> {
        self.invite_codes
            .lock()
            .unwrap()
            .push(invite_code.expose_secret().to_string());

        if self.failing_users.contains(&identity.user_name) {
            return Err(PlatformError::Authentication(format!(
                "Mock login rejected for {}",
                identity.user_name
            )));
        }

        let session = MockSession::new(
            self.template
                .for_account(&identity.user_name, &identity.display_name),
        );
        self.sessions.lock().unwrap().push(session.clone());
        Ok(Box::new(session))
    }
}
