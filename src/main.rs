use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use serde_json::{Value, json};
use tracing::info;

use mcp_session_server::actor::ActorSystem;
use mcp_session_server::mcp::config::McpServerConfig;
use mcp_session_server::mcp::error::{McpError, McpResult};
use mcp_session_server::mcp::http;
use mcp_session_server::mcp::protocol::{ProtocolVersion, ServerIdentity};
use mcp_session_server::mcp::{BearerAuth, MethodCall, MethodHandler, ServerInfo};

/// Built-in handler covering the protocol's utility surface. Embedders
/// replace this with their own dispatch.
struct PingHandler;

#[async_trait]
impl MethodHandler for PingHandler {
    fn can_handle(&self, method: &str) -> bool {
        method == "ping"
    }

    async fn handle(&self, call: MethodCall<'_>) -> McpResult<Value> {
        match call.method {
            "ping" => Ok(json!({})),
            other => Err(McpError::MethodNotFound(other.to_string())),
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "mcp-session-server",
    version,
    about = "Session-oriented MCP server runtime"
)]
struct Cli {
    /// Listen address, e.g. 0.0.0.0:8787
    #[arg(long, default_value = "127.0.0.1:8787", env = "MCP_LISTEN")]
    listen: String,

    /// Deadline in seconds for HTTP-to-session asks
    #[arg(long, default_value_t = 30, env = "MCP_REQUEST_TIMEOUT_SECS")]
    request_timeout_secs: u64,

    /// Idle timeout in seconds for initialized sessions
    #[arg(long, default_value_t = 300, env = "MCP_SESSION_TTL_SECS")]
    session_ttl_secs: u64,

    /// Max seconds a session may stay uninitialized (default: ttl/10)
    #[arg(long, env = "MCP_INITIALIZE_TIMEOUT_SECS")]
    initialize_timeout_secs: Option<u64>,

    /// Preferred wire variant for outbound endpoint URLs
    #[arg(long, default_value = "2025-03-26", env = "MCP_PROTOCOL_VERSION")]
    protocol_version: String,

    /// Optional URL prefix prepended to emitted endpoint URLs
    #[arg(long, default_value = "", env = "MCP_BASE_PATH")]
    base_path: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let protocol_version = ProtocolVersion::parse(&cli.protocol_version).ok_or_else(|| {
        anyhow::anyhow!(
            "unsupported protocol version {:?} (supported: {:?})",
            cli.protocol_version,
            ProtocolVersion::supported_strings()
        )
    })?;

    let config = McpServerConfig {
        request_timeout: Duration::from_secs(cli.request_timeout_secs),
        session_ttl: Duration::from_secs(cli.session_ttl_secs),
        initialize_timeout: cli.initialize_timeout_secs.map(Duration::from_secs),
        protocol_version,
        base_path: cli.base_path,
        ..Default::default()
    };

    let server = Arc::new(ServerInfo {
        identity: ServerIdentity {
            name: "mcp-session-server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        capabilities: json!({
            "tools": {},
            "resources": {},
            "prompts": {},
        }),
        handler: Arc::new(PingHandler),
        auth: Some(Arc::new(BearerAuth)),
    });

    info!(listen = %cli.listen, version = %protocol_version, "starting MCP session server");
    http::serve(&cli.listen, ActorSystem::new(), config, server).await
}
