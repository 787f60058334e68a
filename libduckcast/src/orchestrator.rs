//! The posting loop
//!
//! One cycle generates a post, publishes it from the next identity in
//! rotation, broadcasts engagement, sleeps, then runs the reply sub-cycle
//! for the same post. A failed cycle is classified, logged, and followed by
//! a fixed delay; the loop itself only ends on shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::broadcast::ActionBroadcaster;
use crate::config::PostingConfig;
use crate::content::ContentStrategy;
use crate::error::{DuckcastError, PlatformError, Result};
use crate::identities::{Identity, IdentityPool};
use crate::scheduling::SleepWindow;
use crate::types::PublishedPost;

/// Longest uninterrupted sleep before the shutdown flag is checked again
const SHUTDOWN_POLL: Duration = Duration::from_secs(1);

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Generating,
    Publishing,
    Broadcasting,
    Sleeping,
    ReplyGenerating,
    ReplyPublishing,
    ReplyBroadcasting,
}

/// Coarse classification of a failed cycle, for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleFailure {
    Generation,
    Publish,
    Content,
    Other,
}

impl CycleFailure {
    pub fn classify(error: &DuckcastError) -> Self {
        match error {
            DuckcastError::Generation(_) => CycleFailure::Generation,
            DuckcastError::Platform(_) => CycleFailure::Publish,
            DuckcastError::ContentTooLong { .. }
            | DuckcastError::Headlines(_)
            | DuckcastError::InvalidInput(_) => CycleFailure::Content,
            _ => CycleFailure::Other,
        }
    }
}

impl std::fmt::Display for CycleFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleFailure::Generation => write!(f, "generation"),
            CycleFailure::Publish => write!(f, "publish"),
            CycleFailure::Content => write!(f, "content"),
            CycleFailure::Other => write!(f, "other"),
        }
    }
}

/// Drives generate, publish, broadcast and reply cycles until shutdown
pub struct PostingOrchestrator {
    identities: Arc<IdentityPool>,
    broadcaster: Arc<ActionBroadcaster>,
    post_strategy: Box<dyn ContentStrategy>,
    reply_strategy: Box<dyn ContentStrategy>,

    publish_timeout: Duration,
    max_post_chars: usize,
    max_generation_attempts: usize,
    replies_per_post: usize,
    reply_retry_delay: Duration,
    failure_delay: Duration,
    sleep_window: SleepWindow,

    shutdown: Arc<AtomicBool>,
    state: watch::Sender<CycleState>,
}

impl PostingOrchestrator {
    pub fn new(
        identities: Arc<IdentityPool>,
        broadcaster: Arc<ActionBroadcaster>,
        post_strategy: Box<dyn ContentStrategy>,
        reply_strategy: Box<dyn ContentStrategy>,
        config: &PostingConfig,
    ) -> Self {
        let (state, _) = watch::channel(CycleState::Idle);
        Self {
            identities,
            broadcaster,
            post_strategy,
            reply_strategy,
            publish_timeout: Duration::from_secs(config.publish_timeout_secs),
            max_post_chars: config.max_post_chars,
            max_generation_attempts: config.max_generation_attempts,
            replies_per_post: config.replies_per_post,
            reply_retry_delay: Duration::from_secs(config.reply_retry_delay_secs),
            failure_delay: Duration::from_secs(config.cycle_failure_delay_secs),
            sleep_window: config.sleep,
            shutdown: Arc::new(AtomicBool::new(false)),
            state,
        }
    }

    pub fn with_publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    pub fn with_reply_retry_delay(mut self, delay: Duration) -> Self {
        self.reply_retry_delay = delay;
        self
    }

    pub fn with_failure_delay(mut self, delay: Duration) -> Self {
        self.failure_delay = delay;
        self
    }

    pub fn with_sleep_window(mut self, window: SleepWindow) -> Self {
        self.sleep_window = window;
        self
    }

    /// Share an externally owned shutdown flag
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    /// Flag that stops the loop when set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Watch the loop's state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<CycleState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> CycleState {
        *self.state.borrow()
    }

    fn set_state(&self, state: CycleState) {
        debug!(?state, "Cycle state");
        self.state.send_replace(state);
    }

    /// Run cycles until shutdown is requested
    ///
    /// Cycle failures never end the loop.
    pub async fn run(&self) -> Result<()> {
        info!(
            identities = self.identities.len(),
            strategy = self.post_strategy.name(),
            "Starting posting loop"
        );

        while !self.is_shutdown() {
            if let Err(e) = self.run_once().await {
                let kind = CycleFailure::classify(&e);
                error!(
                    kind = %kind,
                    error = %e,
                    "Posting cycle failed, restarting in {}",
                    humantime::format_duration(self.failure_delay)
                );
                self.set_state(CycleState::Idle);
                self.pause(self.failure_delay).await;
            }
        }

        self.set_state(CycleState::Idle);
        info!("Posting loop stopped");
        Ok(())
    }

    /// Run a single cycle: post, broadcast, sleep, then the replies
    pub async fn run_once(&self) -> Result<()> {
        self.set_state(CycleState::Generating);
        let content = self
            .generate_within_limit(self.post_strategy.as_ref(), None)
            .await?;
        if self.is_shutdown() {
            return Ok(());
        }

        self.set_state(CycleState::Publishing);
        let identity = self.identities.next_identity().await;
        let post = self.publish(&identity, &content, None).await?;
        let label = self.identities.describe_current().await;
        info!(
            identity = %label,
            post_id = %post.id,
            "Published post"
        );

        self.set_state(CycleState::Broadcasting);
        self.broadcaster.broadcast(&post.id, &post.author).await;

        self.sleep_between_steps().await;

        for reply_number in 1..=self.replies_per_post {
            if self.is_shutdown() {
                return Ok(());
            }

            self.set_state(CycleState::ReplyGenerating);
            let reply_text = self
                .generate_within_limit(self.reply_strategy.as_ref(), Some(&post))
                .await?;

            self.set_state(CycleState::ReplyPublishing);
            let Some(reply) = self.publish_reply(&reply_text, &post).await else {
                return Ok(());
            };
            info!(
                identity = %reply.author,
                post_id = %reply.id,
                parent_id = %post.id,
                "Published reply {}/{}",
                reply_number,
                self.replies_per_post
            );

            self.set_state(CycleState::ReplyBroadcasting);
            self.broadcaster.broadcast(&reply.id, &reply.author).await;

            self.sleep_between_steps().await;
        }

        self.set_state(CycleState::Idle);
        Ok(())
    }

    /// Ask `strategy` for text until it fits the character limit
    async fn generate_within_limit(
        &self,
        strategy: &dyn ContentStrategy,
        parent: Option<&PublishedPost>,
    ) -> Result<String> {
        for attempt in 1..=self.max_generation_attempts {
            let text = strategy.compose(parent).await?;
            let chars = text.chars().count();
            if chars <= self.max_post_chars {
                return Ok(text);
            }
            warn!(
                strategy = strategy.name(),
                chars,
                limit = self.max_post_chars,
                "Generated content too long, regenerating (attempt {}/{})",
                attempt,
                self.max_generation_attempts
            );
        }

        Err(DuckcastError::ContentTooLong {
            limit: self.max_post_chars,
            attempts: self.max_generation_attempts,
        })
    }

    async fn publish(
        &self,
        identity: &Identity,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<PublishedPost> {
        let id = match timeout(
            self.publish_timeout,
            identity.session().post(content, parent_id),
        )
        .await
        {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(PlatformError::Timeout {
                    operation: "publish".to_string(),
                    seconds: self.publish_timeout.as_secs(),
                }
                .into())
            }
        };

        Ok(PublishedPost {
            id,
            author: identity.username().to_string(),
            parent_id: parent_id.map(str::to_string),
            content: content.to_string(),
        })
    }

    /// Publish a reply, retrying with the next identity until it succeeds
    ///
    /// Returns `None` only when shutdown is requested first.
    async fn publish_reply(&self, content: &str, parent: &PublishedPost) -> Option<PublishedPost> {
        let mut attempt = 0u32;
        loop {
            if self.is_shutdown() {
                return None;
            }
            attempt += 1;

            let identity = self.identities.next_identity().await;
            match self.publish(&identity, content, Some(&parent.id)).await {
                Ok(reply) => return Some(reply),
                Err(e) => {
                    warn!(
                        identity = %identity.username(),
                        parent_id = %parent.id,
                        error = %e,
                        attempt,
                        "Reply publish failed, retrying in {}",
                        humantime::format_duration(self.reply_retry_delay)
                    );
                    self.pause(self.reply_retry_delay).await;
                }
            }
        }
    }

    async fn sleep_between_steps(&self) {
        self.set_state(CycleState::Sleeping);
        let duration = self.sleep_window.sample();
        debug!("Sleeping for {}", humantime::format_duration(duration));
        self.pause(duration).await;
    }

    /// Sleep for `duration`, waking early when shutdown is requested
    async fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_shutdown() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            sleep((deadline - now).min(SHUTDOWN_POLL)).await;
        }
    }
}
