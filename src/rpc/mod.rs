//! RPC - JSON-RPC client for the full node
//!
//! ```text
//! ┌────────────┐   call(method, params)   ┌───────────┐   POST + Basic auth   ┌──────┐
//! │  workflow  │ ───────────────────────► │ RpcClient │ ────────────────────► │ node │
//! └────────────┘ ◄─── Value / RpcError ── └───────────┘ ◄──── HttpReply ───── └──────┘
//!                                           │ retry on connect errors only
//!                                           │ 0.3s, 0.6s, 1.2s, ... (5 attempts)
//! ```
//!
//! One client per (node URL, wallet scope). Clients hold no state between
//! calls beyond connection parameters and the request id counter.

pub mod auth;
mod methods;
pub mod mock;
pub mod transport;
pub mod types;

pub use auth::Endpoint;
pub use transport::{Credentials, HttpReply, HttpRequest, HttpTransport, Transport, TransportError};

use crate::core::network::Network;
use crate::core::paths::rpc_codes;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-client timeout unless overridden
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const SNIPPET_CHARS: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("node error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("node response carries neither result nor error")]
    MissingResult,
    #[error("malformed node response (HTTP {status}): {snippet}")]
    MalformedResponse { status: u16, snippet: String },
    #[error("node rejected the RPC credentials (HTTP 401)")]
    Unauthorized,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no usable RPC credentials: {0}")]
    AuthUnavailable(String),
    #[error("invalid node URL: {0}")]
    InvalidUrl(String),
    #[error("unexpected {method} result: {detail}")]
    UnexpectedResult { method: String, detail: String },
}

impl RpcError {
    pub fn code(&self) -> Option<i64> {
        match self {
            RpcError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_code(&self, code: i64) -> bool { self.code() == Some(code) }
}

/// Connection-level retry schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self { attempts: 5, initial_backoff: Duration::from_millis(300) } }
}

impl RetryPolicy {
    pub fn new(attempts: u32, initial_backoff: Duration) -> Self {
        Self { attempts: attempts.max(1), initial_backoff }
    }

    /// Single attempt, used for probing
    pub fn none() -> Self { Self::new(1, Duration::ZERO) }
}

/// How to find and reach the node
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub url: Option<String>,
    pub network: Option<Network>,
    pub conf_file: Option<PathBuf>,
    pub wallet: Option<String>,
    /// `None` disables the timeout
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self { url: None, network: None, conf_file: None, wallet: None, timeout: Some(DEFAULT_TIMEOUT), retry: RetryPolicy::default() }
    }
}

impl ConnectOptions {
    pub fn new() -> Self { Self::default() }
    pub fn with_url(mut self, url: impl Into<String>) -> Self { self.url = Some(url.into()); self }
    pub fn with_network(mut self, network: Network) -> Self { self.network = Some(network); self }
    pub fn with_conf_file(mut self, path: impl Into<PathBuf>) -> Self { self.conf_file = Some(path.into()); self }
    pub fn with_wallet(mut self, name: impl Into<String>) -> Self { self.wallet = Some(name.into()); self }
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self { self.timeout = timeout; self }
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self { self.retry = retry; self }
}

/// JSON-RPC client bound to one endpoint and optional wallet scope
pub struct RpcClient {
    endpoint: Endpoint,
    wallet: Option<String>,
    url: String,
    transport: Arc<dyn Transport>,
    timeout: Option<Duration>,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl Clone for RpcClient {
    fn clone(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            wallet: self.wallet.clone(),
            url: self.url.clone(),
            transport: Arc::clone(&self.transport),
            timeout: self.timeout,
            retry: self.retry,
            next_id: AtomicU64::new(self.next_id.load(Ordering::Relaxed)),
        }
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("url", &self.display_url())
            .field("network", &self.endpoint.network)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    pub fn new(endpoint: Endpoint, transport: Arc<dyn Transport>) -> Self {
        Self {
            url: endpoint.url.clone(),
            endpoint,
            wallet: None,
            transport,
            timeout: Some(DEFAULT_TIMEOUT),
            retry: RetryPolicy::default(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Resolve credentials and build a client. Performs no network I/O.
    pub fn connect(opts: &ConnectOptions, transport: Arc<dyn Transport>) -> Result<Self, RpcError> {
        let endpoint = auth::resolve(opts)?;
        let client = Self::new(endpoint, transport).with_timeout(opts.timeout).with_retry(opts.retry);
        Ok(match &opts.wallet {
            Some(name) => client.for_wallet(name),
            None => client,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self { self.timeout = timeout; self }
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self { self.retry = retry; self }

    fn with_network(mut self, network: Network) -> Self { self.endpoint.network = network; self }

    /// Client routed to `/wallet/<name>`. The wallet must already be loaded.
    pub fn for_wallet(&self, name: &str) -> Self {
        let mut client = self.clone();
        client.url = format!("{}/wallet/{}", self.endpoint.url, name);
        client.wallet = Some(name.to_string());
        client
    }

    /// Same node, no wallet scope
    pub fn node(&self) -> Self {
        let mut client = self.clone();
        client.url = self.endpoint.url.clone();
        client.wallet = None;
        client
    }

    pub fn endpoint(&self) -> &Endpoint { &self.endpoint }
    pub fn network(&self) -> Network { self.endpoint.network }
    pub fn wallet(&self) -> Option<&str> { self.wallet.as_deref() }
    pub fn timeout(&self) -> Option<Duration> { self.timeout }

    /// URL with the password masked
    pub fn display_url(&self) -> String {
        match self.url.split_once("://") {
            Some((scheme, rest)) => format!("{scheme}://{}:***@{rest}", self.endpoint.credentials.user),
            None => self.url.clone(),
        }
    }

    /// Issue one JSON-RPC call. Connection failures are retried per the
    /// client's policy; node errors are returned untouched.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let body = json!({ "version": "1.1", "method": method, "params": params, "id": id }).to_string();
        debug!(url = %self.display_url(), method, id, "rpc call");

        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 1;
        let reply = loop {
            let request = HttpRequest {
                url: &self.url,
                credentials: &self.endpoint.credentials,
                body: body.clone(),
                timeout: self.timeout,
            };
            match self.transport.post(request).await {
                Ok(reply) => break reply,
                Err(err) if err.is_retryable() && attempt < self.retry.attempts => {
                    warn!(url = %self.display_url(), method, attempt, error = %err, "rpc connection failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        };

        parse_reply(reply)
    }

    /// `call` and deserialize the result
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, RpcError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::UnexpectedResult { method: method.to_string(), detail: e.to_string() })
    }
}

fn snippet(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(SNIPPET_CHARS).collect();
    if chars.next().is_some() { format!("{head}...") } else { head }
}

fn parse_reply(reply: HttpReply) -> Result<Value, RpcError> {
    if reply.status == 401 && reply.body.trim().is_empty() {
        return Err(RpcError::Unauthorized);
    }

    let value: Value = serde_json::from_str(&reply.body)
        .map_err(|_| RpcError::MalformedResponse { status: reply.status, snippet: snippet(&reply.body) })?;
    let Value::Object(mut map) = value else {
        return Err(RpcError::MissingResult);
    };

    match map.remove("error") {
        Some(Value::Null) | None => {}
        Some(Value::Object(err)) => {
            let code = err.get("code").and_then(Value::as_i64).unwrap_or(rpc_codes::MISC_ERROR);
            let message = err.get("message").and_then(Value::as_str).unwrap_or_default().to_string();
            return Err(RpcError::Rpc { code, message });
        }
        Some(other) => return Err(RpcError::Rpc { code: rpc_codes::MISC_ERROR, message: other.to_string() }),
    }

    map.remove("result").ok_or(RpcError::MissingResult)
}

/// Probe the explicit URL, or each network's default endpoint, with
/// `getblockchaininfo`. The returned client carries the chain the node reports.
pub async fn discover(
    opts: &ConnectOptions,
    transport: Arc<dyn Transport>,
) -> Result<(RpcClient, types::BlockchainInfo), RpcError> {
    let candidates: Vec<Option<Network>> = match (opts.network, &opts.url) {
        (Some(network), _) => vec![Some(network)],
        (None, Some(_)) => std::iter::once(None).chain(Network::ALL.map(Some)).collect(),
        (None, None) => Network::ALL.map(Some).to_vec(),
    };

    let mut last_error = RpcError::AuthUnavailable("no candidate endpoints".into());
    for network in candidates {
        let mut probe_opts = opts.clone().with_retry(RetryPolicy::none());
        probe_opts.network = network;
        probe_opts.wallet = None;

        let client = match RpcClient::connect(&probe_opts, Arc::clone(&transport)) {
            Ok(client) => client,
            Err(err) => {
                debug!(network = ?network, error = %err, "no credentials for candidate");
                last_error = err;
                continue;
            }
        };

        match client.get_blockchain_info().await {
            Ok(info) => {
                let chain = Network::from_chain(&info.chain).unwrap_or(client.network());
                info!(url = %client.display_url(), chain = %info.chain, blocks = info.blocks, "node discovered");
                return Ok((client.with_network(chain).with_retry(opts.retry), info));
            }
            Err(err) => {
                debug!(url = %client.display_url(), error = %err, "probe failed");
                let unreachable = matches!(err, RpcError::Transport(_));
                last_error = err;
                // Another network only changes which cookie is read, not where we connect
                if unreachable && opts.url.is_some() {
                    break;
                }
            }
        }
    }
    Err(last_error)
}
