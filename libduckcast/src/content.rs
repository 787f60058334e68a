//! Content strategies
//!
//! A strategy turns a persona and a topic into prompt messages and asks the
//! invoker for text. Posts use the strategy selected in `[content]`; replies
//! always use [`ReplyStrategy`]. The news strategy reacts to a headline taken
//! from a [`HeadlineSource`].

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::ContentConfig;
use crate::error::{DuckcastError, GenerationError, Result};
use crate::headlines::{FileHeadlineSource, HeadlineSource};
use crate::invoker::ResilientInvoker;
use crate::types::{PromptMessage, PublishedPost};

/// Which strategy writes top-level posts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Basic,
    Viral,
    News,
}

/// Produces the text of a post or reply
#[async_trait]
pub trait ContentStrategy: Send + Sync {
    /// Write a post, or a reply to `parent` when given
    async fn compose(&self, parent: Option<&PublishedPost>) -> Result<String>;

    fn name(&self) -> &str;
}

fn system_prompt(persona: &str, max_chars: usize) -> PromptMessage {
    PromptMessage::system(format!(
        "You are {}. You write short social media posts. \
         Never exceed {} characters. Answer with the post text only.",
        persona, max_chars
    ))
}

/// Plain-text posts about the configured topic
pub struct BasicStrategy {
    invoker: Arc<ResilientInvoker>,
    persona: String,
    topic: String,
    max_chars: usize,
}

impl BasicStrategy {
    pub fn new(invoker: Arc<ResilientInvoker>, config: &ContentConfig, max_chars: usize) -> Self {
        Self {
            invoker,
            persona: config.persona.clone(),
            topic: config.topic.clone(),
            max_chars,
        }
    }

    fn messages(&self) -> Vec<PromptMessage> {
        vec![
            system_prompt(&self.persona, self.max_chars),
            PromptMessage::user(format!("Write a new post about {}.", self.topic)),
        ]
    }
}

#[async_trait]
impl ContentStrategy for BasicStrategy {
    async fn compose(&self, _parent: Option<&PublishedPost>) -> Result<String> {
        Ok(self.invoker.invoke(&self.messages()).await?)
    }

    fn name(&self) -> &str {
        "basic"
    }
}

/// Attention-grabbing posts built from structured output
///
/// The service answers with `{"post": ..., "hashtags": [...]}` and the
/// hashtags are appended to the post text.
pub struct ViralStrategy {
    invoker: Arc<ResilientInvoker>,
    persona: String,
    topic: String,
    max_chars: usize,
}

impl ViralStrategy {
    pub fn new(invoker: Arc<ResilientInvoker>, config: &ContentConfig, max_chars: usize) -> Self {
        Self {
            invoker,
            persona: config.persona.clone(),
            topic: config.topic.clone(),
            max_chars,
        }
    }

    pub fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "post": { "type": "string" },
                "hashtags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["post"]
        })
    }

    fn messages(&self) -> Vec<PromptMessage> {
        vec![
            system_prompt(&self.persona, self.max_chars),
            PromptMessage::user(format!(
                "Write a punchy, shareable post about {} that invites people to react. \
                 Suggest up to three hashtags separately.",
                self.topic
            )),
        ]
    }
}

/// Join the structured answer into post text
fn render_structured(value: &serde_json::Value) -> std::result::Result<String, GenerationError> {
    let post = value
        .get("post")
        .and_then(|p| p.as_str())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            GenerationError::InvalidResponse("Structured answer has no \"post\" field".to_string())
        })?;

    let hashtags: Vec<String> = value
        .get("hashtags")
        .and_then(|h| h.as_array())
        .map(|tags| {
            tags.iter()
                .filter_map(|t| t.as_str())
                .map(|t| t.trim().trim_start_matches('#'))
                .filter(|t| !t.is_empty())
                .map(|t| format!("#{}", t))
                .collect()
        })
        .unwrap_or_default();

    if hashtags.is_empty() {
        Ok(post.to_string())
    } else {
        Ok(format!("{} {}", post, hashtags.join(" ")))
    }
}

#[async_trait]
impl ContentStrategy for ViralStrategy {
    async fn compose(&self, _parent: Option<&PublishedPost>) -> Result<String> {
        let value = self
            .invoker
            .invoke_structured(&self.messages(), &Self::schema())
            .await?;
        Ok(render_structured(&value)?)
    }

    fn name(&self) -> &str {
        "viral"
    }
}

/// Posts reacting to a current headline
///
/// One headline is picked at random from the source on every post.
pub struct NewsStrategy {
    invoker: Arc<ResilientInvoker>,
    source: Arc<dyn HeadlineSource>,
    persona: String,
    topic: String,
    max_chars: usize,
}

impl NewsStrategy {
    pub fn new(
        invoker: Arc<ResilientInvoker>,
        source: Arc<dyn HeadlineSource>,
        config: &ContentConfig,
        max_chars: usize,
    ) -> Self {
        Self {
            invoker,
            source,
            persona: config.persona.clone(),
            topic: config.topic.clone(),
            max_chars,
        }
    }

    fn messages(&self, headline: &str) -> Vec<PromptMessage> {
        vec![
            system_prompt(&self.persona, self.max_chars),
            PromptMessage::user(format!(
                "Today's headline: \"{}\"\n\n\
                 Write a post reacting to it in your own words, tying it back to {} \
                 where it fits. Do not copy the headline verbatim.",
                headline, self.topic
            )),
        ]
    }
}

#[async_trait]
impl ContentStrategy for NewsStrategy {
    async fn compose(&self, _parent: Option<&PublishedPost>) -> Result<String> {
        let headlines = self.source.fetch().await?;
        let headline = headlines
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| {
                DuckcastError::Headlines(format!(
                    "No headlines available from {} source",
                    self.source.name()
                ))
            })?;

        Ok(self.invoker.invoke(&self.messages(&headline)).await?)
    }

    fn name(&self) -> &str {
        "news"
    }
}

/// Replies that respond to a parent post
pub struct ReplyStrategy {
    invoker: Arc<ResilientInvoker>,
    persona: String,
    max_chars: usize,
}

impl ReplyStrategy {
    pub fn new(invoker: Arc<ResilientInvoker>, config: &ContentConfig, max_chars: usize) -> Self {
        Self {
            invoker,
            persona: config.persona.clone(),
            max_chars,
        }
    }
}

#[async_trait]
impl ContentStrategy for ReplyStrategy {
    async fn compose(&self, parent: Option<&PublishedPost>) -> Result<String> {
        let parent = parent.ok_or_else(|| {
            DuckcastError::InvalidInput("A reply needs a parent post".to_string())
        })?;

        let messages = vec![
            system_prompt(&self.persona, self.max_chars),
            PromptMessage::user(format!(
                "Write a reply to this post by @{}:\n\n{}",
                parent.author, parent.content
            )),
        ];
        Ok(self.invoker.invoke(&messages).await?)
    }

    fn name(&self) -> &str {
        "reply"
    }
}

/// Build the strategy used for top-level posts
pub fn build_strategy(
    invoker: Arc<ResilientInvoker>,
    config: &ContentConfig,
    max_chars: usize,
) -> Box<dyn ContentStrategy> {
    match config.strategy {
        StrategyKind::Basic => Box::new(BasicStrategy::new(invoker, config, max_chars)),
        StrategyKind::Viral => Box::new(ViralStrategy::new(invoker, config, max_chars)),
        StrategyKind::News => {
            let source = Arc::new(FileHeadlineSource::new(config.headlines_path()));
            Box::new(NewsStrategy::new(invoker, source, config, max_chars))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialPool;
    use crate::generation::mock::MockGenerationClient;
    use crate::generation::GenerationClient;
    use crate::headlines::StaticHeadlineSource;
    use crate::types::Role;
    use std::io::Write;
    use std::time::Duration;

    fn invoker(client: MockGenerationClient) -> Arc<ResilientInvoker> {
        let client: Arc<dyn GenerationClient> = Arc::new(client);
        let pool = CredentialPool::new(vec!["key".to_string()], 10, Arc::clone(&client)).unwrap();
        Arc::new(
            ResilientInvoker::new(Arc::new(pool), client).with_backoff(Duration::from_millis(1)),
        )
    }

    fn content_config(strategy: StrategyKind) -> ContentConfig {
        ContentConfig {
            strategy,
            topic: "urban gardening".to_string(),
            persona: "a cheerful gardener".to_string(),
            headlines_file: "/nonexistent/headlines.txt".to_string(),
        }
    }

    fn parent() -> PublishedPost {
        PublishedPost {
            id: "p1".to_string(),
            author: "alice".to_string(),
            parent_id: None,
            content: "Tomatoes are ripening early this year".to_string(),
        }
    }

    #[tokio::test]
    async fn test_basic_strategy_prompts_with_topic_and_persona() {
        let client = MockGenerationClient::success("Grow your own basil!");
        let strategy = BasicStrategy::new(
            invoker(client.clone()),
            &content_config(StrategyKind::Basic),
            255,
        );

        let text = strategy.compose(None).await.unwrap();
        assert_eq!(text, "Grow your own basil!");

        let prompts = client.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0][0].role, Role::System);
        assert!(prompts[0][0].content.contains("a cheerful gardener"));
        assert!(prompts[0][0].content.contains("255"));
        assert!(prompts[0][1].content.contains("urban gardening"));
    }

    #[tokio::test]
    async fn test_viral_strategy_appends_hashtags() {
        let client = MockGenerationClient::scripted(vec![Ok(
            r##"{"post": "Dig in!", "hashtags": ["garden", "#spring", " "]}"##.to_string(),
        )]);
        let strategy = ViralStrategy::new(
            invoker(client),
            &content_config(StrategyKind::Viral),
            255,
        );

        assert_eq!(
            strategy.compose(None).await.unwrap(),
            "Dig in! #garden #spring"
        );
    }

    #[tokio::test]
    async fn test_viral_strategy_without_hashtags() {
        let strategy = ViralStrategy::new(
            invoker(MockGenerationClient::success("unused")),
            &content_config(StrategyKind::Viral),
            255,
        );
        assert_eq!(
            strategy.compose(None).await.unwrap(),
            "Mock structured content"
        );
    }

    #[test]
    fn test_render_structured_requires_post() {
        let result = render_structured(&serde_json::json!({ "hashtags": ["a"] }));
        assert!(matches!(result, Err(GenerationError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_reply_strategy_quotes_parent() {
        let client = MockGenerationClient::success("Mine too!");
        let strategy = ReplyStrategy::new(
            invoker(client.clone()),
            &content_config(StrategyKind::Basic),
            255,
        );

        let text = strategy.compose(Some(&parent())).await.unwrap();
        assert_eq!(text, "Mine too!");

        let prompt = &client.prompts()[0][1].content;
        assert!(prompt.contains("@alice"));
        assert!(prompt.contains("Tomatoes are ripening early"));
    }

    #[tokio::test]
    async fn test_reply_strategy_requires_parent() {
        let client = MockGenerationClient::success("x");
        let strategy = ReplyStrategy::new(
            invoker(client.clone()),
            &content_config(StrategyKind::Basic),
            255,
        );

        let result = strategy.compose(None).await;
        assert!(matches!(result, Err(DuckcastError::InvalidInput(_))));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_news_strategy_reacts_to_headline() {
        let client = MockGenerationClient::success("Finally, more green space!");
        let source = Arc::new(StaticHeadlineSource::new(&["City council approves rooftop gardens"]));
        let strategy = NewsStrategy::new(
            invoker(client.clone()),
            source,
            &content_config(StrategyKind::News),
            255,
        );

        let text = strategy.compose(None).await.unwrap();
        assert_eq!(text, "Finally, more green space!");

        let prompt = &client.prompts()[0][1].content;
        assert!(prompt.contains("City council approves rooftop gardens"));
        assert!(prompt.contains("urban gardening"));
    }

    #[tokio::test]
    async fn test_news_strategy_without_headlines() {
        let client = MockGenerationClient::success("x");
        let strategy = NewsStrategy::new(
            invoker(client.clone()),
            Arc::new(StaticHeadlineSource::default()),
            &content_config(StrategyKind::News),
            255,
        );

        let result = strategy.compose(None).await;
        assert!(matches!(result, Err(DuckcastError::Headlines(_))));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_news_strategy_reads_headline_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# scraped hourly\nLocal market adds seed swap").unwrap();
        let mut config = content_config(StrategyKind::News);
        config.headlines_file = file.path().display().to_string();

        let client = MockGenerationClient::success("Swap those seeds!");
        let strategy = build_strategy(invoker(client.clone()), &config, 255);
        assert_eq!(strategy.name(), "news");
        assert_eq!(strategy.compose(None).await.unwrap(), "Swap those seeds!");
        assert!(client.prompts()[0][1]
            .content
            .contains("Local market adds seed swap"));
    }

    #[tokio::test]
    async fn test_build_strategy_selects_by_kind() {
        let invoker = invoker(MockGenerationClient::success("x"));
        let basic = build_strategy(Arc::clone(&invoker), &content_config(StrategyKind::Basic), 255);
        let viral = build_strategy(Arc::clone(&invoker), &content_config(StrategyKind::Viral), 255);
        let news = build_strategy(invoker, &content_config(StrategyKind::News), 255);
        assert_eq!(basic.name(), "basic");
        assert_eq!(viral.name(), "viral");
        assert_eq!(news.name(), "news");
    }

    #[test]
    fn test_strategy_kind_parses_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            strategy: StrategyKind,
        }
        let wrapper: Wrapper = toml::from_str(r#"strategy = "viral""#).unwrap();
        assert_eq!(wrapper.strategy, StrategyKind::Viral);
        let wrapper: Wrapper = toml::from_str(r#"strategy = "news""#).unwrap();
        assert_eq!(wrapper.strategy, StrategyKind::News);
    }
}
