//! Generation-service credential pool
//!
//! Tracks usage, health and errors for every API key and hands out the
//! least-used healthy key under its usage cap. Selection and the usage
//! increment happen under one lock, so concurrent callers can never push a
//! key past the cap.
//!
//! # Selection rules
//!
//! - A key is selectable when it is healthy and `usage_count < max_usage`.
//! - Among selectable keys the lowest `usage_count` wins; ties go to the key
//!   listed first.
//! - When nothing is selectable, every usage counter is reset to zero once
//!   and selection is retried among healthy keys.
//! - Three recorded errors mark a key unhealthy until a health probe succeeds.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::GenerationConfig;
use crate::error::{ConfigError, GenerationError, Result};
use crate::generation::GenerationClient;
use crate::types::CredentialStats;

/// Errors recorded against a key before it is taken out of rotation
pub const UNHEALTHY_ERROR_THRESHOLD: u32 = 3;

/// How long an unhealthy key is left alone between automatic re-probes
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(600);

/// Deadline for a single health probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Render the last four characters of a key for logs
pub fn mask_key(key: &str) -> String {
    let tail: Vec<char> = key.chars().rev().take(4).collect();
    let tail: String = tail.into_iter().rev().collect();
    format!("...{}", tail)
}

struct CredentialRecord {
    secret: Arc<SecretString>,
    masked: String,
    usage_count: u32,
    last_used: Option<DateTime<Utc>>,
    is_healthy: bool,
    error_count: u32,
    last_error: Option<String>,
    last_health_check: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    fn new(key: String) -> Self {
        let masked = mask_key(&key);
        Self {
            secret: Arc::new(SecretString::from(key)),
            masked,
            usage_count: 0,
            last_used: None,
            is_healthy: true,
            error_count: 0,
            last_error: None,
            last_health_check: None,
        }
    }

    fn checked_within(&self, interval: Duration) -> bool {
        match self.last_health_check {
            Some(last) => (Utc::now() - last)
                .to_std()
                .map_or(true, |elapsed| elapsed < interval),
            None => false,
        }
    }
}

/// A key handed out by [`CredentialPool::acquire`]
///
/// Cheap to clone; the secret itself is shared, not copied.
#[derive(Clone)]
pub struct Credential {
    index: usize,
    secret: Arc<SecretString>,
    masked: String,
}

impl Credential {
    /// Position of the key in the configured list
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    /// Masked form for logs, e.g. "...a1b2"
    pub fn masked(&self) -> &str {
        &self.masked
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("key", &self.masked)
            .finish()
    }
}

/// Pool of generation-service credentials with quota and health tracking
pub struct CredentialPool {
    records: Mutex<Vec<CredentialRecord>>,
    max_usage: u32,
    client: Arc<dyn GenerationClient>,
    health_check_interval: Duration,
    probe_timeout: Duration,
}

impl CredentialPool {
    /// Create a pool over `keys`, each usable `max_usage` times between resets
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `keys` is empty or `max_usage` is zero.
    pub fn new(
        keys: Vec<String>,
        max_usage: u32,
        client: Arc<dyn GenerationClient>,
    ) -> Result<Self> {
        if keys.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "generation.api_keys".to_string(),
                reason: "at least one API key must be provided".to_string(),
            }
            .into());
        }
        if max_usage == 0 {
            return Err(ConfigError::InvalidValue {
                field: "generation.max_requests_per_key".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }

        let records = keys.into_iter().map(CredentialRecord::new).collect();
        Ok(Self {
            records: Mutex::new(records),
            max_usage,
            client,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        })
    }

    /// Create a pool from the generation section of the config
    pub fn from_config(config: &GenerationConfig, client: Arc<dyn GenerationClient>) -> Result<Self> {
        Ok(Self::new(config.api_keys.clone(), config.max_requests_per_key, client)?
            .with_health_check_interval(Duration::from_secs(config.health_check_interval_secs))
            .with_probe_timeout(Duration::from_secs(config.health_probe_timeout_secs)))
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn max_usage(&self) -> u32 {
        self.max_usage
    }

    /// Total number of keys, healthy or not
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    fn select(records: &[CredentialRecord], cap: Option<u32>) -> Option<usize> {
        records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_healthy && cap.map_or(true, |cap| r.usage_count < cap))
            .min_by_key(|(_, r)| r.usage_count)
            .map(|(index, _)| index)
    }

    /// Hand out the least-used healthy key under the cap
    ///
    /// # Errors
    ///
    /// Returns `GenerationError::NoHealthyCredential` when no key is healthy,
    /// even after the usage reset.
    pub async fn acquire(&self) -> std::result::Result<Credential, GenerationError> {
        let mut records = self.records.lock().await;

        let index = match Self::select(&records, Some(self.max_usage)) {
            Some(index) => index,
            None => {
                for record in records.iter_mut() {
                    record.usage_count = 0;
                }
                info!("Reset usage counters for all {} credentials", records.len());
                Self::select(&records, None).ok_or(GenerationError::NoHealthyCredential)?
            }
        };

        let record = &mut records[index];
        record.usage_count += 1;
        record.last_used = Some(Utc::now());

        debug!(
            credential = %record.masked,
            usage = record.usage_count,
            max_usage = self.max_usage,
            "Selected credential"
        );

        Ok(Credential {
            index,
            secret: Arc::clone(&record.secret),
            masked: record.masked.clone(),
        })
    }

    /// Record a failed call made with `credential`
    pub async fn report_error(&self, credential: &Credential, error: &GenerationError) {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(credential.index) else {
            return;
        };

        record.error_count += 1;
        record.last_error = Some(error.to_string());

        if record.error_count >= UNHEALTHY_ERROR_THRESHOLD && record.is_healthy {
            record.is_healthy = false;
            warn!(
                credential = %record.masked,
                errors = record.error_count,
                "Credential marked as unhealthy"
            );
        }
    }

    /// Probe `credential` against the generation service
    ///
    /// An unhealthy key that was already probed within the health-check
    /// interval is not probed again; the call just reports it unhealthy.
    /// Returns the key's health after the check.
    pub async fn health_check(&self, credential: &Credential) -> bool {
        self.probe_record(credential.index, false).await
    }

    /// Report whether `credential` is healthy, re-probing it if its last
    /// check is older than the health-check interval
    pub async fn is_healthy(&self, credential: &Credential) -> bool {
        let stale = {
            let records = self.records.lock().await;
            match records.get(credential.index) {
                Some(record) => !record.checked_within(self.health_check_interval),
                None => return false,
            }
        };

        if stale {
            self.probe_record(credential.index, true).await
        } else {
            let records = self.records.lock().await;
            records
                .get(credential.index)
                .map_or(false, |record| record.is_healthy)
        }
    }

    async fn probe_record(&self, index: usize, force: bool) -> bool {
        let (secret, masked) = {
            let records = self.records.lock().await;
            let Some(record) = records.get(index) else {
                return false;
            };

            if !force && !record.is_healthy && record.checked_within(self.health_check_interval) {
                debug!(credential = %record.masked, "Skipping health check, checked recently");
                return false;
            }
            (Arc::clone(&record.secret), record.masked.clone())
        };

        // The lock is released while the probe is in flight
        let outcome = match timeout(self.probe_timeout, self.client.probe(&secret)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GenerationError::Timeout(self.probe_timeout.as_secs())),
        };

        let mut records = self.records.lock().await;
        let record = &mut records[index];
        record.last_health_check = Some(Utc::now());

        match outcome {
            Ok(()) => {
                record.is_healthy = true;
                record.error_count = 0;
                debug!(credential = %masked, "Health check passed");
                true
            }
            Err(e) => {
                record.is_healthy = false;
                record.error_count += 1;
                record.last_error = Some(e.to_string());
                warn!(credential = %masked, error = %e, "Health check failed");
                false
            }
        }
    }

    /// Number of currently healthy keys
    pub async fn available_count(&self) -> usize {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.is_healthy)
            .count()
    }

    /// Concurrently re-probe every unhealthy key
    ///
    /// Returns how many keys came back healthy. A failing probe only affects
    /// its own key.
    pub async fn refresh_unhealthy(&self) -> usize {
        self.probe_unhealthy(false).await
    }

    /// Re-probe the unhealthy keys that were not checked within the
    /// health-check interval
    ///
    /// Used when no key is healthy, so a pool that was emptied by a burst of
    /// errors recovers without probing the same dead key on every call.
    pub async fn recover_stale(&self) -> usize {
        self.probe_unhealthy(true).await
    }

    async fn probe_unhealthy(&self, stale_only: bool) -> usize {
        let unhealthy: Vec<usize> = {
            let records = self.records.lock().await;
            records
                .iter()
                .enumerate()
                .filter(|(_, r)| !r.is_healthy)
                .filter(|(_, r)| !stale_only || !r.checked_within(self.health_check_interval))
                .map(|(index, _)| index)
                .collect()
        };

        if unhealthy.is_empty() {
            return 0;
        }

        info!("Attempting to refresh {} unhealthy credentials", unhealthy.len());
        let results = join_all(unhealthy.iter().map(|&index| self.probe_record(index, true))).await;
        let recovered = results.into_iter().filter(|healthy| *healthy).count();
        info!("Recovered {}/{} credentials", recovered, unhealthy.len());
        recovered
    }

    /// Snapshot of every key's counters, safe to log
    pub async fn stats(&self) -> Vec<CredentialStats> {
        self.records
            .lock()
            .await
            .iter()
            .map(|r| CredentialStats {
                key_suffix: r.masked.clone(),
                usage_count: r.usage_count,
                max_usage: self.max_usage,
                is_healthy: r.is_healthy,
                error_count: r.error_count,
                last_used: r.last_used,
                last_error: r.last_error.clone(),
                last_health_check: r.last_health_check,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests;
