//! Posting-service abstraction
//!
//! A [`Connector`] logs an identity in once at startup and yields a
//! [`Session`]; every later interaction (publishing, likes, reposts) goes
//! through that session. Sessions are shared across concurrently running
//! engagement tasks, so they must be `Send + Sync`.
//!
//! # Examples
//!
//! ```no_run
//! use libduckcast::platforms::{Connector, rest::RestConnector};
//! use libduckcast::identities::IdentityConfig;
//! use secrecy::SecretString;
//!
//! # async fn example() -> Result<(), libduckcast::error::PlatformError> {
//! let connector = RestConnector::new("https://social.example")?;
//! let identity = IdentityConfig::new("alice", "hunter2", "Alice");
//! let invite = SecretString::from("invite-code".to_string());
//!
//! let session = connector.login(&identity, &invite).await?;
//! let post_id = session.post("Hello from duckcast", None).await?;
//! session.like(&post_id).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::PlatformError;
use crate::identities::IdentityConfig;
use crate::types::{EngagementAction, Profile};

// Mock sessions are available for all builds (not just tests) to support integration tests
pub mod mock;
pub mod rest;

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// An authenticated session for one posting identity
#[async_trait]
pub trait Session: Send + Sync {
    /// Look up the account this session is logged in as
    async fn who_am_i(&self) -> PlatformResult<Profile>;

    /// Publish `content`, as a reply when `parent_id` is given
    ///
    /// Returns the identifier the service assigned to the new post.
    async fn post(&self, content: &str, parent_id: Option<&str>) -> PlatformResult<String>;

    /// Like a post
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::AlreadyEngaged` when the service reports the
    /// post was already liked by this identity.
    async fn like(&self, post_id: &str) -> PlatformResult<()>;

    /// Repost a post
    async fn repost(&self, post_id: &str) -> PlatformResult<()>;

    /// Apply an engagement action
    async fn engage(&self, action: EngagementAction, post_id: &str) -> PlatformResult<()> {
        match action {
            EngagementAction::Like => self.like(post_id).await,
            EngagementAction::Repost => self.repost(post_id).await,
        }
    }
}

/// Logs identities into the posting service
#[async_trait]
pub trait Connector: Send + Sync {
    async fn login(
        &self,
        identity: &IdentityConfig,
        invite_code: &SecretString,
    ) -> PlatformResult<Box<dyn Session>>;
}
