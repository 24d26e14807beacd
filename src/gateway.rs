//! Remote completion gateway: the backend HTTP API.
//!
//! Endpoints:
//! - GET  /api/profile       → { name }
//! - GET  /api/chat/history  → { chatHistory: Turn[] }
//! - POST /api/chat          → { reply, imageUrl? }
//! - POST /api/login         → { token }
//! - POST /api/register      → success / { message }

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::error::ChatError;
use crate::token::TokenStore;
use crate::transcript::{Role, Turn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub reply: String,
    pub image_url: Option<String>,
}

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn profile(&self) -> Result<Profile, ChatError>;

    async fn history(&self) -> Result<Vec<Turn>, ChatError>;

    /// Send a prompt. Resolves to `Cancelled` as soon as `cancel` fires.
    async fn chat(&self, prompt: &str, cancel: CancellationToken) -> Result<ChatReply, ChatError>;

    async fn login(&self, email: &str, password: &str) -> Result<(), ChatError>;

    async fn register(&self, name: &str, email: &str, password: &str) -> Result<(), ChatError>;
}

pub struct HttpGateway {
    base_url: String,
    client: Client,
    tokens: TokenStore,
}

impl HttpGateway {
    pub fn new(config: &ApiConfig, tokens: TokenStore) -> Result<Self, ChatError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            tokens,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, ChatError> {
        let token = self.tokens.load().ok_or(ChatError::Unauthorized)?;
        Ok(builder.bearer_auth(token))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value, ChatError> {
        let resp = builder.send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ChatError::Unauthorized);
        }
        if !status.is_success() {
            let message = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v["message"].as_str().map(str::to_string))
                .unwrap_or_else(|| format!("server returned {status}"));
            warn!("Gateway error {status}: {message}");
            return Err(ChatError::NetworkFailure(message));
        }
        Ok(resp.json::<Value>().await?)
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn profile(&self) -> Result<Profile, ChatError> {
        let req = self.authorized(self.client.get(self.url("/api/profile")))?;
        let data = self.send(req).await?;
        let name = data["name"]
            .as_str()
            .ok_or_else(|| ChatError::InvalidReply("profile has no name".into()))?;
        Ok(Profile {
            name: name.to_string(),
        })
    }

    async fn history(&self) -> Result<Vec<Turn>, ChatError> {
        let req = self.authorized(self.client.get(self.url("/api/chat/history")))?;
        let data = self.send(req).await?;
        let turns = decode_history(&data)?;
        debug!("Fetched {} history turns", turns.len());
        Ok(turns)
    }

    async fn chat(&self, prompt: &str, cancel: CancellationToken) -> Result<ChatReply, ChatError> {
        let req = self.authorized(
            self.client
                .post(self.url("/api/chat"))
                .json(&json!({ "prompt": prompt })),
        )?;

        debug!("Sending prompt ({} chars)", prompt.len());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Chat request aborted");
                Err(ChatError::Cancelled)
            }
            data = self.send(req) => decode_chat_reply(&data?),
        }
    }

    async fn login(&self, email: &str, password: &str) -> Result<(), ChatError> {
        let req = self
            .client
            .post(self.url("/api/login"))
            .json(&json!({ "email": email, "password": password }));
        let data = self.send(req).await?;
        let token = data["token"]
            .as_str()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ChatError::InvalidReply("login response has no token".into()))?;
        self.tokens.save(token)?;
        info!("Logged in as {email}");
        Ok(())
    }

    async fn register(&self, name: &str, email: &str, password: &str) -> Result<(), ChatError> {
        let req = self.client.post(self.url("/api/register")).json(&json!({
            "name": name,
            "email": email,
            "password": password,
        }));
        self.send(req).await?;
        info!("Registered {email}");
        Ok(())
    }
}

/// Decode a `/api/chat` payload. A missing or non-string `reply` is an
/// invalid reply; it never reaches the reveal scheduler.
pub fn decode_chat_reply(data: &Value) -> Result<ChatReply, ChatError> {
    let reply = data
        .get("reply")
        .and_then(Value::as_str)
        .ok_or_else(|| ChatError::InvalidReply("response has no text reply".into()))?;
    let image_url = data
        .get("imageUrl")
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
        .map(str::to_string);

    Ok(ChatReply {
        reply: reply.to_string(),
        image_url,
    })
}

pub fn decode_history(data: &Value) -> Result<Vec<Turn>, ChatError> {
    let entries = data
        .get("chatHistory")
        .and_then(Value::as_array)
        .ok_or_else(|| ChatError::InvalidReply("response has no chatHistory".into()))?;

    let turns = entries
        .iter()
        .filter_map(|entry| {
            let role = match entry.get("role").and_then(Value::as_str) {
                Some("user") => Role::User,
                Some("ai") | Some("assistant") => Role::Assistant,
                other => {
                    debug!("Skipping history entry with role {other:?}");
                    return None;
                }
            };
            let content = entry.get("content").and_then(Value::as_str)?;
            Some(Turn {
                role,
                content: content.to_string(),
                image_url: entry
                    .get("imageUrl")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        })
        .collect();

    Ok(turns)
}
