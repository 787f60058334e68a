//! Headline sources for news-driven posts
//!
//! Collecting headlines happens outside duckcast. Whatever gathers them
//! writes a plain text file, one headline per line, and
//! [`FileHeadlineSource`] re-reads it on every fetch so updates are picked up
//! without a restart.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{DuckcastError, Result};

/// Supplies the current set of headlines
#[async_trait]
pub trait HeadlineSource: Send + Sync {
    /// Current headlines, most relevant first. May be empty.
    async fn fetch(&self) -> Result<Vec<String>>;

    fn name(&self) -> &str;
}

/// Parse a headline file: one per line, blank lines and `#` comments skipped
fn parse_headlines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Reads headlines from a text file
#[derive(Debug, Clone)]
pub struct FileHeadlineSource {
    path: PathBuf,
}

impl FileHeadlineSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HeadlineSource for FileHeadlineSource {
    async fn fetch(&self) -> Result<Vec<String>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            DuckcastError::Headlines(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        let headlines = parse_headlines(&content);
        debug!(
            path = %self.path.display(),
            count = headlines.len(),
            "Loaded headlines"
        );
        Ok(headlines)
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Fixed list of headlines, for tests and one-off runs
#[derive(Debug, Clone, Default)]
pub struct StaticHeadlineSource {
    headlines: Vec<String>,
}

impl StaticHeadlineSource {
    pub fn new(headlines: &[&str]) -> Self {
        Self {
            headlines: headlines.iter().map(|h| h.to_string()).collect(),
        }
    }
}

#[async_trait]
impl HeadlineSource for StaticHeadlineSource {
    async fn fetch(&self) -> Result<Vec<String>> {
        Ok(self.headlines.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_headlines_skips_blanks_and_comments() {
        let content = "# collected this morning\nCity opens new park\n\n   \n  Rain expected all week  \n";
        assert_eq!(
            parse_headlines(content),
            vec!["City opens new park", "Rain expected all week"]
        );
    }

    #[tokio::test]
    async fn test_file_source_rereads_on_every_fetch() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "First headline").unwrap();
        let source = FileHeadlineSource::new(file.path());

        assert_eq!(source.fetch().await.unwrap(), vec!["First headline"]);

        writeln!(file, "Second headline").unwrap();
        assert_eq!(source.fetch().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let source = FileHeadlineSource::new("/nonexistent/duckcast/headlines.txt");
        let result = source.fetch().await;
        assert!(matches!(result, Err(DuckcastError::Headlines(_))));
    }

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticHeadlineSource::new(&["a", "b"]);
        assert_eq!(source.fetch().await.unwrap(), vec!["a", "b"]);
        assert!(StaticHeadlineSource::default().fetch().await.unwrap().is_empty());
    }
}
