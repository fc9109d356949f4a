//! HTTP transport seam. The client only ever sees `Transport`; production
//! uses reqwest, tests script replies in memory.

use crate::core::paths::node::USER_AGENT;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Basic-auth credentials for the node. Never rendered by `Debug`.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self { user: user.into(), password: password.into() }
    }

    /// Parse the `user:password` line of a cookie file
    pub fn from_cookie(content: &str) -> Option<Self> {
        let (user, password) = content.trim().split_once(':')?;
        Some(Self::new(user, password))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("user", &self.user).field("password", &"***").finish()
    }
}

/// One JSON-RPC POST
#[derive(Debug, Clone)]
pub struct HttpRequest<'a> {
    pub url: &'a str,
    pub credentials: &'a Credentials,
    pub body: String,
    /// `None` waits indefinitely (long scans and rescans)
    pub timeout: Option<Duration>,
}

/// Raw HTTP reply; status and body are interpreted by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn ok(body: impl Into<String>) -> Self { Self { status: 200, body: body.into() } }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("http request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Only refused or reset connections are worth retrying
    pub fn is_retryable(&self) -> bool { matches!(self, TransportError::Connect(_)) }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: HttpRequest<'_>) -> Result<HttpReply, TransportError>;
}

/// reqwest-backed transport, plain http only
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, request: HttpRequest<'_>) -> Result<HttpReply, TransportError> {
        let mut builder = self
            .client
            .post(request.url)
            .basic_auth(&request.credentials.user, Some(&request.credentials.password))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(request.body);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;
        Ok(HttpReply { status, body })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}
