//! In-memory node speaking the JSON-RPC wire shape, for tests and dry runs.
//!
//! Handlers are registered per method; every request is recorded so tests can
//! assert on what the workflow sent.

use super::transport::{HttpReply, HttpRequest, Transport, TransportError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

/// A request as the node saw it
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub url: String,
    pub method: String,
    pub params: Vec<Value>,
}

impl MockCall {
    /// Wallet name from a `/wallet/<name>` URL
    pub fn wallet(&self) -> Option<&str> {
        self.url.split_once("/wallet/").map(|(_, name)| name)
    }
}

#[derive(Debug, Clone)]
pub enum MockReply {
    Result(Value),
    Error(i64, String),
    Http(u16, String),
}

type Handler = Box<dyn Fn(&MockCall) -> MockReply + Send + Sync>;

#[derive(Default)]
pub struct MockNode {
    handlers: Mutex<HashMap<String, Handler>>,
    calls: Mutex<Vec<MockCall>>,
    refusals: Mutex<VecDeque<TransportError>>,
}

impl MockNode {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub fn on(&self, method: &str, handler: impl Fn(&MockCall) -> MockReply + Send + Sync + 'static) {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).insert(method.to_string(), Box::new(handler));
    }

    /// Always answer `method` with `result`
    pub fn respond(&self, method: &str, result: Value) {
        self.on(method, move |_| MockReply::Result(result.clone()));
    }

    /// Always answer `method` with a JSON-RPC error
    pub fn reject(&self, method: &str, code: i64, message: &str) {
        let message = message.to_string();
        self.on(method, move |_| MockReply::Error(code, message.clone()));
    }

    /// Fail the next `count` requests at the connection level
    pub fn refuse_connections(&self, count: usize) {
        self.refusals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend((0..count).map(|i| TransportError::Connect(format!("connection refused ({i})"))));
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<MockCall> {
        self.calls().into_iter().filter(|c| c.method == method).collect()
    }

    fn answer(&self, call: &MockCall) -> MockReply {
        let handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        match handlers.get(&call.method) {
            Some(handler) => handler(call),
            None => MockReply::Error(-32601, "Method not found".into()),
        }
    }
}

#[async_trait]
impl Transport for MockNode {
    async fn post(&self, request: HttpRequest<'_>) -> Result<HttpReply, TransportError> {
        if let Some(err) = self.refusals.lock().unwrap_or_else(PoisonError::into_inner).pop_front() {
            return Err(err);
        }

        let body: Value = serde_json::from_str(&request.body).map_err(|e| TransportError::Request(e.to_string()))?;
        let call = MockCall {
            url: request.url.to_string(),
            method: body["method"].as_str().unwrap_or_default().to_string(),
            params: body["params"].as_array().cloned().unwrap_or_default(),
        };
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call.clone());

        let id = body["id"].clone();
        let reply = match self.answer(&call) {
            MockReply::Result(result) => HttpReply::ok(json!({"result": result, "error": null, "id": id}).to_string()),
            MockReply::Error(code, message) => HttpReply {
                status: 500,
                body: json!({"result": null, "error": {"code": code, "message": message}, "id": id}).to_string(),
            },
            MockReply::Http(status, body) => HttpReply { status, body },
        };
        Ok(reply)
    }
}
