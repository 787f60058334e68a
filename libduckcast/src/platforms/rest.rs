//! JSON REST client for the posting service
//!
//! Endpoints (relative to the configured base URL):
//!
//! | Operation | Request                          | Response `data`              |
//! |-----------|----------------------------------|------------------------------|
//! | login     | `POST /api/auth/login`           | `{ "token": "..." }`         |
//! | who am i  | `GET  /api/users/me`             | `{ "username", "display_name" }` |
//! | post      | `POST /api/posts`                | `{ "id": ... }`              |
//! | like      | `POST /api/posts/{id}/like`      | ignored (any 2xx, body optional) |
//! | repost    | `POST /api/posts/{id}/repost`    | ignored (any 2xx, body optional) |
//!
//! Responses that carry data wrap it in a `{ "data": ... }` envelope.
//! Authenticated calls carry the login token as a bearer token.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{Connector, PlatformResult, Session};
use crate::error::PlatformError;
use crate::identities::IdentityConfig;
use crate::types::Profile;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    display_name: &'a str,
    invite_code: &'a str,
}

#[derive(Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Serialize)]
struct PostRequest<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct PostData {
    id: serde_json::Value,
}

/// Map a non-success HTTP status to a platform error
fn map_status(status: u16, body: &str, context: &str) -> PlatformError {
    let preview: String = body.chars().take(256).collect();
    match status {
        401 | 403 => PlatformError::Authentication(format!(
            "HTTP {} during {}: {}",
            status, context, preview
        )),
        409 => PlatformError::AlreadyEngaged(format!("{}: {}", context, preview)),
        429 => PlatformError::RateLimit(format!("HTTP 429 during {}: {}", context, preview)),
        _ => PlatformError::Posting(format!("HTTP {} during {}: {}", status, context, preview)),
    }
}

/// Post identifiers arrive as numbers or strings depending on the server
fn id_to_string(id: serde_json::Value) -> PlatformResult<String> {
    match id {
        serde_json::Value::String(s) if !s.is_empty() => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(PlatformError::InvalidResponse(format!(
            "Unexpected post id: {}",
            other
        ))),
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Send `request` and return the body of a successful response
async fn send_raw(request: RequestBuilder, context: &str) -> PlatformResult<String> {
    let response = request
        .send()
        .await
        .map_err(|e| PlatformError::Network(format!("{} failed: {}", context, e)))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| PlatformError::Network(format!("Failed to read {} response: {}", context, e)))?;

    if !status.is_success() {
        return Err(map_status(status.as_u16(), &body, context));
    }
    Ok(body)
}

async fn send<T: DeserializeOwned>(request: RequestBuilder, context: &str) -> PlatformResult<T> {
    let body = send_raw(request, context).await?;
    let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
        PlatformError::InvalidResponse(format!("{} returned unexpected body: {}", context, e))
    })?;
    Ok(envelope.data)
}

/// Logs identities in over HTTP
pub struct RestConnector {
    client: Client,
    base_url: String,
}

impl RestConnector {
    pub fn new(base_url: &str) -> PlatformResult<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }
}

#[async_trait]
impl Connector for RestConnector {
    async fn login(
        &self,
        identity: &IdentityConfig,
        invite_code: &SecretString,
    ) -> PlatformResult<Box<dyn Session>> {
        debug!(identity = %identity.user_name, "Logging in");

        let body = LoginRequest {
            username: &identity.user_name,
            password: identity.password.expose_secret(),
            display_name: &identity.display_name,
            invite_code: invite_code.expose_secret(),
        };

        let data: LoginData = send(
            self.client
                .post(join_url(&self.base_url, "/api/auth/login"))
                .json(&body),
            "login",
        )
        .await
        .map_err(|e| match e {
            PlatformError::Posting(msg) => PlatformError::Authentication(msg),
            other => other,
        })?;

        Ok(Box::new(RestSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: SecretString::from(data.token),
        }))
    }
}

/// Session backed by a bearer token from [`RestConnector::login`]
pub struct RestSession {
    client: Client,
    base_url: String,
    token: SecretString,
}

impl RestSession {
    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(self.token.expose_secret())
    }

    /// Likes and reposts only report success through the status code
    async fn post_action(&self, post_id: &str, action: &str) -> PlatformResult<()> {
        let url = join_url(&self.base_url, &format!("/api/posts/{}/{}", post_id, action));
        send_raw(self.authed(self.client.post(url)), action).await?;
        Ok(())
    }
}

#[async_trait]
impl Session for RestSession {
    async fn who_am_i(&self) -> PlatformResult<Profile> {
        let url = join_url(&self.base_url, "/api/users/me");
        send(self.authed(self.client.get(url)), "who_am_i").await
    }

    async fn post(&self, content: &str, parent_id: Option<&str>) -> PlatformResult<String> {
        let url = join_url(&self.base_url, "/api/posts");
        let body = PostRequest { content, parent_id };
        let data: PostData = send(self.authed(self.client.post(url).json(&body)), "post").await?;
        id_to_string(data.id)
    }

    async fn like(&self, post_id: &str) -> PlatformResult<()> {
        self.post_action(post_id, "like").await
    }

    async fn repost(&self, post_id: &str) -> PlatformResult<()> {
        self.post_action(post_id, "repost").await
    }
}
