//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::watch;

use mcp_session_server::mcp::channel::{ChannelError, ENDPOINT_EVENT, PushChannel};
use mcp_session_server::mcp::config::McpServerConfig;
use mcp_session_server::mcp::error::{McpError, McpResult};
use mcp_session_server::mcp::protocol::ServerIdentity;
use mcp_session_server::mcp::{BearerAuth, MethodCall, MethodHandler, ServerInfo};

/// Method handler used across tests: echoes params for `echo`, replies `{}`
/// to `ping`, reports identity for `whoami`, and fails on `explode`.
pub struct EchoHandler;

#[async_trait]
impl MethodHandler for EchoHandler {
    fn can_handle(&self, method: &str) -> bool {
        matches!(method, "ping" | "echo" | "whoami" | "explode")
    }

    async fn handle(&self, call: MethodCall<'_>) -> McpResult<Value> {
        match call.method {
            "ping" => Ok(json!({})),
            "echo" => Ok(json!({ "echo": call.params.cloned().unwrap_or(Value::Null) })),
            "whoami" => Ok(json!({
                "sessionId": call.session_id,
                "auth": call.auth.map(|bytes| String::from_utf8_lossy(bytes).to_string()),
            })),
            "explode" => Err(McpError::Internal("boom".to_string())),
            other => Err(McpError::MethodNotFound(other.to_string())),
        }
    }
}

pub fn server_info() -> Arc<ServerInfo> {
    Arc::new(ServerInfo {
        identity: ServerIdentity {
            name: "test-server".to_string(),
            version: "0.0.1".to_string(),
        },
        capabilities: json!({ "tools": {} }),
        handler: Arc::new(EchoHandler),
        auth: Some(Arc::new(BearerAuth)),
    })
}

/// Config for HTTP tests: fast asks, lifetimes long enough that sessions
/// survive the test body.
pub fn http_config() -> McpServerConfig {
    McpServerConfig {
        request_timeout: Duration::from_millis(500),
        session_ttl: Duration::from_secs(60),
        initialize_timeout: Some(Duration::from_secs(10)),
        ..Default::default()
    }
}

/// Config with explicit lifetimes for lifecycle tests.
pub fn config_with(session_ttl: Duration, initialize_timeout: Duration) -> McpServerConfig {
    McpServerConfig {
        request_timeout: Duration::from_millis(500),
        session_ttl,
        initialize_timeout: Some(initialize_timeout),
        ..Default::default()
    }
}

/// Push channel that records emitted events for assertions.
pub struct RecordingChannel {
    events: Mutex<Vec<(String, String)>>,
    done: watch::Sender<bool>,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            done,
        })
    }

    pub fn events(&self) -> Vec<(String, String)> {
        self.events.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.done.borrow()
    }
}

#[async_trait]
impl PushChannel for RecordingChannel {
    async fn emit(&self, event: &str, payload: &Value) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), payload.to_string()));
        Ok(())
    }

    async fn emit_endpoint(&self, url: &str) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.events
            .lock()
            .unwrap()
            .push((ENDPOINT_EVENT.to_string(), url.to_string()));
        Ok(())
    }

    async fn close(&self) {
        self.done.send_replace(true);
    }

    async fn closed(&self) {
        let mut done_rx = self.done.subscribe();
        let _ = done_rx.wait_for(|done| *done).await;
    }
}
