//! Sleep windows between posting cycles
//!
//! A window is written either as a fixed duration ("50s", "2m") or as a
//! random range ("random:30s-70s"); durations use humantime syntax.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{DuckcastError, Result};

const MAX_SLEEP: Duration = Duration::from_secs(24 * 3600);

/// How long to pause between cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SleepWindow {
    Fixed(Duration),
    /// Uniformly sampled between the two bounds, inclusive
    Random { min: Duration, max: Duration },
}

impl Default for SleepWindow {
    fn default() -> Self {
        SleepWindow::Random {
            min: Duration::from_secs(30),
            max: Duration::from_secs(70),
        }
    }
}

impl SleepWindow {
    /// Parse a window such as "50s" or "random:30s-70s"
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the string is empty, a duration does not
    /// parse, the minimum exceeds the maximum, or a bound is over one day.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(DuckcastError::InvalidInput(
                "Sleep window cannot be empty".to_string(),
            ));
        }

        let window = match input.strip_prefix("random:") {
            Some(range) => {
                let (min_str, max_str) = parse_random_range(range)?;
                let min = parse_duration(min_str)?;
                let max = parse_duration(max_str)?;
                if min > max {
                    return Err(DuckcastError::InvalidInput(
                        "Minimum must not exceed maximum".to_string(),
                    ));
                }
                SleepWindow::Random { min, max }
            }
            None => SleepWindow::Fixed(parse_duration(input)?),
        };

        if window.max() > MAX_SLEEP {
            return Err(DuckcastError::InvalidInput(format!(
                "Sleep window must not exceed {}",
                humantime::format_duration(MAX_SLEEP)
            )));
        }

        Ok(window)
    }

    /// Draw one sleep duration from the window
    pub fn sample(&self) -> Duration {
        match *self {
            SleepWindow::Fixed(duration) => duration,
            SleepWindow::Random { min, max } => {
                let min_ms = min.as_millis() as u64;
                let max_ms = max.as_millis() as u64;
                Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
            }
        }
    }

    pub fn max(&self) -> Duration {
        match *self {
            SleepWindow::Fixed(duration) => duration,
            SleepWindow::Random { max, .. } => max,
        }
    }
}

impl fmt::Display for SleepWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SleepWindow::Fixed(duration) => write!(f, "{}", humantime::format_duration(*duration)),
            SleepWindow::Random { min, max } => write!(
                f,
                "random:{}-{}",
                humantime::format_duration(*min),
                humantime::format_duration(*max)
            ),
        }
    }
}

impl TryFrom<String> for SleepWindow {
    type Error = DuckcastError;

    fn try_from(value: String) -> Result<Self> {
        SleepWindow::parse(&value)
    }
}

impl From<SleepWindow> for String {
    fn from(window: SleepWindow) -> Self {
        window.to_string()
    }
}

fn parse_duration(input: &str) -> Result<Duration> {
    humantime::parse_duration(input.trim()).map_err(|e| {
        DuckcastError::InvalidInput(format!("Could not parse duration '{}': {}", input, e))
    })
}

/// Split "MIN-MAX" into (MIN, MAX)
fn parse_random_range(range: &str) -> Result<(&str, &str)> {
    let parts: Vec<&str> = range.split('-').collect();
    if parts.len() != 2 {
        return Err(DuckcastError::InvalidInput(
            "Random format must be MIN-MAX".to_string(),
        ));
    }
    Ok((parts[0], parts[1]))
}
