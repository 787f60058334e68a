//! Posting identities
//!
//! Identities are loaded from a JSON file, logged in once at startup and then
//! handed out in strict rotation. The pool also exposes the full ordered set
//! for engagement broadcasts.

use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::IdentityError;
use crate::platforms::{Connector, Session};
use crate::types::Profile;

/// Login details for one posting identity
#[derive(Debug)]
pub struct IdentityConfig {
    pub user_name: String,
    pub password: SecretString,
    pub display_name: String,
}

impl IdentityConfig {
    pub fn new(user_name: &str, password: &str, display_name: &str) -> Self {
        Self {
            user_name: user_name.to_string(),
            password: SecretString::from(password.to_string()),
            display_name: display_name.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct IdentityFile {
    #[serde(default)]
    bots: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct IdentityEntry {
    user_name: String,
    password: String,
    display_name: String,
}

/// Load identities from a `{"bots": [...]}` JSON file
///
/// Entries that are missing a field, or have a blank one, are skipped with a
/// warning.
///
/// # Errors
///
/// Fails if the file cannot be read or parsed, or if no entry is usable.
pub fn load_identity_file(path: &Path) -> Result<Vec<IdentityConfig>, IdentityError> {
    let content = std::fs::read_to_string(path)?;
    let file: IdentityFile = serde_json::from_str(&content)?;

    let mut identities = Vec::new();
    for (position, raw) in file.bots.into_iter().enumerate() {
        let entry: IdentityEntry = match serde_json::from_value(raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(entry = position, error = %e, "Skipping invalid identity entry");
                continue;
            }
        };

        if entry.user_name.trim().is_empty()
            || entry.password.is_empty()
            || entry.display_name.trim().is_empty()
        {
            warn!(entry = position, "Skipping identity entry with blank fields");
            continue;
        }

        identities.push(IdentityConfig {
            user_name: entry.user_name.trim().to_string(),
            password: SecretString::from(entry.password),
            display_name: entry.display_name.trim().to_string(),
        });
    }

    if identities.is_empty() {
        return Err(IdentityError::NoValidEntries(path.display().to_string()));
    }

    info!("Loaded {} identities from {}", identities.len(), path.display());
    Ok(identities)
}

/// Look up the invite code required at login
///
/// Checks the `env_var` environment variable first, then a `KEY=value` line in
/// `dotenv_path` (surrounding quotes are stripped).
pub fn load_invite_code(
    env_var: &str,
    dotenv_path: Option<&Path>,
) -> Result<SecretString, IdentityError> {
    if let Ok(value) = std::env::var(env_var) {
        let value = value.trim();
        if !value.is_empty() {
            return Ok(SecretString::from(value.to_string()));
        }
    }

    if let Some(path) = dotenv_path {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Some(value) = find_dotenv_value(&content, env_var) {
                return Ok(SecretString::from(value));
            }
        }
    }

    Err(IdentityError::MissingInviteCode(env_var.to_string()))
}

fn find_dotenv_value(content: &str, key: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.strip_prefix("export ").unwrap_or(line).split_once('='))
        .find(|(name, _)| name.trim() == key)
        .map(|(_, value)| {
            value
                .trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .to_string()
        })
        .filter(|value| !value.is_empty())
}

/// A logged-in identity
///
/// Cheap to clone; the session is shared.
#[derive(Clone)]
pub struct Identity {
    profile: Profile,
    session: Arc<dyn Session>,
}

impl Identity {
    pub fn new(profile: Profile, session: Arc<dyn Session>) -> Self {
        Self { profile, session }
    }

    pub fn username(&self) -> &str {
        &self.profile.username
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("username", &self.profile.username)
            .field("display_name", &self.profile.display_name)
            .finish()
    }
}

struct Cursor {
    next: usize,
    current: Option<usize>,
}

/// Fixed set of logged-in identities handed out round-robin
pub struct IdentityPool {
    identities: Vec<Identity>,
    cursor: Mutex<Cursor>,
}

impl IdentityPool {
    /// # Errors
    ///
    /// Returns `IdentityError::EmptyPool` when `identities` is empty.
    pub fn new(identities: Vec<Identity>) -> Result<Self, IdentityError> {
        if identities.is_empty() {
            return Err(IdentityError::EmptyPool);
        }
        Ok(Self {
            identities,
            cursor: Mutex::new(Cursor {
                next: 0,
                current: None,
            }),
        })
    }

    /// Log every configured identity in and build a pool from the sessions
    ///
    /// Login happens once, in order. The first failure aborts construction.
    pub async fn connect(
        connector: &dyn Connector,
        configs: &[IdentityConfig],
        invite_code: &SecretString,
    ) -> Result<Self, IdentityError> {
        let mut identities = Vec::with_capacity(configs.len());

        for config in configs {
            let login_error = |source| IdentityError::Login {
                username: config.user_name.clone(),
                source,
            };

            let session: Arc<dyn Session> = Arc::from(
                connector
                    .login(config, invite_code)
                    .await
                    .map_err(login_error)?,
            );
            let profile = session.who_am_i().await.map_err(login_error)?;

            info!(
                identity = %profile.username,
                display_name = %profile.display_name,
                "Logged in"
            );
            identities.push(Identity::new(profile, session));
        }

        Self::new(identities)
    }

    /// Next identity in rotation
    ///
    /// The cursor advances on every call, whatever the caller then does with
    /// the identity.
    pub async fn next_identity(&self) -> Identity {
        let mut cursor = self.cursor.lock().await;
        let index = cursor.next;
        cursor.current = Some(index);
        cursor.next = (index + 1) % self.identities.len();
        self.identities[index].clone()
    }

    /// Every identity, in configured order
    pub fn all_identities(&self) -> &[Identity] {
        &self.identities
    }

    /// Label of the identity most recently returned by `next_identity`
    pub async fn describe_current(&self) -> String {
        let cursor = self.cursor.lock().await;
        match cursor.current {
            Some(index) => format!(
                "Identity #{} ({})",
                index + 1,
                self.identities[index].username()
            ),
            None => "No identity selected yet".to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::{MockConnector, MockSession};
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn identity(name: &str) -> Identity {
        Identity::new(
            Profile {
                username: name.to_string(),
                display_name: name.to_uppercase(),
            },
            Arc::new(MockSession::success(name)),
        )
    }

    fn pool(names: &[&str]) -> IdentityPool {
        IdentityPool::new(names.iter().map(|n| identity(n)).collect()).unwrap()
    }

    fn write_temp(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_round_robin_wraps() {
        let pool = pool(&["a", "b", "c"]);
        let mut order = Vec::new();
        for _ in 0..7 {
            order.push(pool.next_identity().await.username().to_string());
        }
        assert_eq!(order, vec!["a", "b", "c", "a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_describe_current() {
        let pool = pool(&["alice", "bob"]);
        assert_eq!(pool.describe_current().await, "No identity selected yet");

        pool.next_identity().await;
        assert_eq!(pool.describe_current().await, "Identity #1 (alice)");

        pool.next_identity().await;
        assert_eq!(pool.describe_current().await, "Identity #2 (bob)");
    }

    #[tokio::test]
    async fn test_all_identities_is_stable() {
        let pool = pool(&["a", "b"]);
        pool.next_identity().await;
        let names: Vec<_> = pool.all_identities().iter().map(|i| i.username()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(pool.len(), 2);
        assert!(!pool.is_empty());
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(matches!(
            IdentityPool::new(vec![]),
            Err(IdentityError::EmptyPool)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_rotation_visits_each_identity_evenly() {
        let pool = Arc::new(pool(&["a", "b", "c"]));
        let mut handles = Vec::new();
        for _ in 0..30 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool.next_identity().await.username().to_string()
            }));
        }

        let mut counts = std::collections::HashMap::new();
        for handle in handles {
            *counts.entry(handle.await.unwrap()).or_insert(0) += 1;
        }
        assert_eq!(counts["a"], 10);
        assert_eq!(counts["b"], 10);
        assert_eq!(counts["c"], 10);
    }

    #[tokio::test]
    async fn test_connect_logs_in_every_identity() {
        let connector = MockConnector::new();
        let configs = vec![
            IdentityConfig::new("alice", "pw1", "Alice"),
            IdentityConfig::new("bob", "pw2", "Bob"),
        ];
        let invite = SecretString::from("invite".to_string());

        let pool = IdentityPool::connect(&connector, &configs, &invite)
            .await
            .unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.all_identities()[1].profile().display_name, "Bob");
        assert_eq!(connector.invite_codes().len(), 2);
    }

    #[tokio::test]
    async fn test_connect_fails_on_rejected_login() {
        let connector = MockConnector::new().with_failing_users(&["bob"]);
        let configs = vec![
            IdentityConfig::new("alice", "pw1", "Alice"),
            IdentityConfig::new("bob", "pw2", "Bob"),
        ];
        let invite = SecretString::from("invite".to_string());

        let result = IdentityPool::connect(&connector, &configs, &invite).await;
        match result {
            Err(IdentityError::Login { username, .. }) => assert_eq!(username, "bob"),
            other => panic!("Expected login error, got {:?}", other.map(|p| p.len())),
        }
    }

    #[test]
    fn test_load_identity_file_skips_invalid_entries() {
        let file = write_temp(
            r#"{"bots": [
                {"user_name": "alice", "password": "pw", "display_name": "Alice"},
                {"user_name": "no-password", "display_name": "Broken"},
                {"user_name": "  ", "password": "pw", "display_name": "Blank"},
                {"user_name": "bob", "password": "pw", "display_name": "Bob"}
            ]}"#,
        );

        let identities = load_identity_file(file.path()).unwrap();
        let names: Vec<_> = identities.iter().map(|i| i.user_name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn test_load_identity_file_with_no_valid_entries() {
        let file = write_temp(r#"{"bots": [{"user_name": "x"}]}"#);
        assert!(matches!(
            load_identity_file(file.path()),
            Err(IdentityError::NoValidEntries(_))
        ));
    }

    #[test]
    fn test_load_identity_file_rejects_malformed_json() {
        let file = write_temp("not json");
        assert!(matches!(
            load_identity_file(file.path()),
            Err(IdentityError::ParseError(_))
        ));
    }

    #[test]
    fn test_identity_config_debug_hides_password() {
        let config = IdentityConfig::new("alice", "hunter2", "Alice");
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_find_dotenv_value() {
        let content = "# comment\nOTHER=1\nINVITE_CODE=\"abc-123\"\n";
        assert_eq!(
            find_dotenv_value(content, "INVITE_CODE"),
            Some("abc-123".to_string())
        );
        assert_eq!(
            find_dotenv_value("export INVITE_CODE='xyz'", "INVITE_CODE"),
            Some("xyz".to_string())
        );
        assert_eq!(find_dotenv_value("INVITE_CODE=", "INVITE_CODE"), None);
        assert_eq!(find_dotenv_value("OTHER=1", "INVITE_CODE"), None);
    }

    #[test]
    #[serial]
    fn test_invite_code_prefers_environment() {
        use secrecy::ExposeSecret;

        std::env::set_var("DUCKCAST_TEST_INVITE", "from-env");
        let dotenv = write_temp("DUCKCAST_TEST_INVITE=from-file\n");

        let code = load_invite_code("DUCKCAST_TEST_INVITE", Some(dotenv.path())).unwrap();
        assert_eq!(code.expose_secret(), "from-env");

        std::env::remove_var("DUCKCAST_TEST_INVITE");
    }

    #[test]
    #[serial]
    fn test_invite_code_falls_back_to_dotenv() {
        use secrecy::ExposeSecret;

        std::env::remove_var("DUCKCAST_TEST_INVITE");
        let dotenv = write_temp("DUCKCAST_TEST_INVITE='from-file'\n");

        let code = load_invite_code("DUCKCAST_TEST_INVITE", Some(dotenv.path())).unwrap();
        assert_eq!(code.expose_secret(), "from-file");
    }

    #[test]
    #[serial]
    fn test_missing_invite_code() {
        std::env::remove_var("DUCKCAST_TEST_INVITE");
        assert!(matches!(
            load_invite_code("DUCKCAST_TEST_INVITE", None),
            Err(IdentityError::MissingInviteCode(_))
        ));
    }
}
