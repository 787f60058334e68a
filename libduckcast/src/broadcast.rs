//! Engagement fan-out across every identity
//!
//! Each identity likes the target post, and every identity other than the
//! author also reposts it. All actions run concurrently, each under its own
//! deadline, with one more deadline over the whole batch. Failures are
//! logged and counted, never returned.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::BroadcastConfig;
use crate::error::PlatformError;
use crate::identities::IdentityPool;
use crate::types::{BroadcastResult, EngagementAction};

pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_OVERALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of one engagement action
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub identity: String,
    pub action: EngagementAction,
    /// Set when the action failed or timed out
    pub error: Option<PlatformError>,
}

impl ActionOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Issues likes and reposts from every identity at once
pub struct ActionBroadcaster {
    identities: Arc<IdentityPool>,
    action_timeout: Duration,
    overall_timeout: Duration,
}

impl ActionBroadcaster {
    pub fn new(identities: Arc<IdentityPool>) -> Self {
        Self {
            identities,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            overall_timeout: DEFAULT_OVERALL_TIMEOUT,
        }
    }

    pub fn from_config(identities: Arc<IdentityPool>, config: &BroadcastConfig) -> Self {
        Self::new(identities)
            .with_action_timeout(Duration::from_secs(config.action_timeout_secs))
            .with_overall_timeout(Duration::from_secs(config.overall_timeout_secs))
    }

    pub fn with_action_timeout(mut self, action_timeout: Duration) -> Self {
        self.action_timeout = action_timeout;
        self
    }

    pub fn with_overall_timeout(mut self, overall_timeout: Duration) -> Self {
        self.overall_timeout = overall_timeout;
        self
    }

    /// Like and repost `target_id` from every identity
    ///
    /// The author only likes. Actions still pending when the overall
    /// deadline passes are aborted and counted as failures.
    pub async fn broadcast(&self, target_id: &str, author: &str) -> BroadcastResult {
        let mut result = BroadcastResult::default();
        let mut tasks = JoinSet::new();

        for identity in self.identities.all_identities() {
            let mut actions = vec![EngagementAction::Like];
            if identity.username() != author {
                actions.push(EngagementAction::Repost);
            }

            for action in actions {
                result.attempted += 1;

                let session = Arc::clone(identity.session());
                let username = identity.username().to_string();
                let post_id = target_id.to_string();
                let action_timeout = self.action_timeout;

                tasks.spawn(async move {
                    let outcome = match timeout(action_timeout, session.engage(action, &post_id))
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => Err(PlatformError::Timeout {
                            operation: format!("{} {}", action, post_id),
                            seconds: action_timeout.as_secs(),
                        }),
                    };
                    ActionOutcome {
                        identity: username,
                        action,
                        error: outcome.err(),
                    }
                });
            }
        }

        let deadline = Instant::now() + self.overall_timeout;
        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(outcome))) => Self::record(&mut result, &outcome, target_id),
                Ok(Some(Err(e))) => warn!(error = %e, "Engagement task failed"),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        post_id = %target_id,
                        pending = tasks.len(),
                        "Broadcast deadline reached, abandoning pending actions"
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        info!(
            post_id = %target_id,
            likes = result.likes,
            reposts = result.reposts,
            "Broadcast complete: {}/{} actions succeeded",
            result.succeeded,
            result.attempted
        );
        result
    }

    fn record(result: &mut BroadcastResult, outcome: &ActionOutcome, target_id: &str) {
        match &outcome.error {
            None => {
                result.succeeded += 1;
                match outcome.action {
                    EngagementAction::Like => result.likes += 1,
                    EngagementAction::Repost => result.reposts += 1,
                }
                debug!(
                    identity = %outcome.identity,
                    post_id = %target_id,
                    "{} succeeded", outcome.action
                );
            }
            Some(e) => {
                warn!(
                    identity = %outcome.identity,
                    post_id = %target_id,
                    error = %e,
                    "{} failed", outcome.action
                );
            }
        }
    }
}
