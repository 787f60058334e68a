//! Core types for Duckcast

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who a posting session is logged in as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub display_name: String,
}

/// A post or reply that the posting service accepted
///
/// Only kept long enough to correlate a publish with the engagement
/// broadcast that follows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPost {
    pub id: String,
    pub author: String,
    pub parent_id: Option<String>,
    pub content: String,
}

impl PublishedPost {
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }
}

/// Secondary engagement an identity can apply to a post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementAction {
    Like,
    Repost,
}

impl std::fmt::Display for EngagementAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngagementAction::Like => write!(f, "like"),
            EngagementAction::Repost => write!(f, "repost"),
        }
    }
}

/// Outcome of one engagement broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastResult {
    /// Actions that completed successfully
    pub succeeded: usize,
    /// Actions that were scheduled
    pub attempted: usize,
    pub likes: usize,
    pub reposts: usize,
}

impl BroadcastResult {
    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }
}

/// Message role understood by the generation service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One message of a generation prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Point-in-time view of one generation credential, safe to log
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStats {
    /// Last four characters of the key, e.g. "...a1b2"
    pub key_suffix: String,
    pub usage_count: u32,
    pub max_usage: u32,
    pub is_healthy: bool,
    pub error_count: u32,
    pub last_used: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_health_check: Option<DateTime<Utc>>,
}
