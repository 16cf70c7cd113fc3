//! Per-session MCP lifecycle entity.
//!
//! Each client session is one state-machine entity moving through
//! Uninitialized -> Initialized -> Shutdown. The entity owns the negotiated
//! protocol version, the registry of push connections, and its own idle
//! policing: a one-shot initialize deadline while Uninitialized, a periodic
//! TTL check once Initialized.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rand::RngExt;
use rand::distr::Alphanumeric;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::actor::{
    ActorContext, ActorRef, ActorSystem, SpawnError, StateCell, StateHandler, StateMachine, Timer,
    Transition,
};
use crate::mcp::config::McpServerConfig;
use crate::mcp::connection::ConnectionMsg;
use crate::mcp::protocol::{
    INVALID_PARAMS, INVALID_REQUEST, InitializeParams, InitializeResult, JsonRpcResponse,
    ProtocolVersion, RpcError, WrappedRequest,
};
use crate::mcp::{MethodCall, ServerInfo};

pub const SESSION_ID_LEN: usize = 20;

/// Lifecycle methods owned by the runtime, never delegated.
pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_SHUTDOWN: &str = "shutdown";

/// Entity name of the session with this id.
pub fn session_name(session_id: &str) -> String {
    format!("{session_id}-session")
}

/// Entity name of the session's default client connection.
pub fn default_client_name(session_id: &str) -> String {
    format!("{session_id}-client")
}

/// Connection id of the session's primary SSE stream.
pub fn default_connection_id(session_id: &str) -> String {
    format!("{session_id}-channels-default")
}

/// 20-character alphanumeric id from the thread-local CSPRNG.
pub fn generate_session_id() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Shutdown,
}

pub enum SessionMsg {
    /// A connection entity announcing itself. The reply reports whether the
    /// registration was recorded.
    RegisterConnection {
        connection_id: String,
        connection: ActorRef<ConnectionMsg>,
        reply: oneshot::Sender<bool>,
    },
    /// A client request. `reply` present means the sender awaits the
    /// response; absent means the response is routed via
    /// `wrapped.respond_to`.
    Request {
        wrapped: WrappedRequest,
        reply: Option<oneshot::Sender<JsonRpcResponse>>,
    },
    /// One-shot: the initialize deadline elapsed.
    InitializeTimeout,
    /// Periodic: police the idle TTL.
    CheckTtl,
}

pub struct SessionData {
    session_id: String,
    config: McpServerConfig,
    server: Arc<ServerInfo>,
    protocol_version: Option<ProtocolVersion>,
    client_initialized: bool,
    last_activity: Instant,
    connections: HashMap<String, ActorRef<ConnectionMsg>>,
    initialize_deadline: Option<Timer>,
    ttl_ticks: Option<Timer>,
}

impl SessionData {
    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn expired(&self) -> bool {
        self.last_activity.elapsed() > self.config.session_ttl
    }

    /// Route a response: back to a waiting asker, or out through the named
    /// connection. An empty connection id discards the response.
    fn send_response(
        &self,
        response: JsonRpcResponse,
        respond_to: &str,
        reply: Option<oneshot::Sender<JsonRpcResponse>>,
    ) {
        if let Some(tx) = reply {
            let _ = tx.send(response);
            return;
        }
        if respond_to.is_empty() {
            debug!(session_id = %self.session_id, "response has no target; dropped");
            return;
        }
        match self.connections.get(respond_to) {
            Some(connection) => {
                if !connection.tell(ConnectionMsg::Deliver(response)) {
                    warn!(
                        session_id = %self.session_id,
                        connection_id = respond_to,
                        "connection mailbox gone; response dropped"
                    );
                }
            }
            None => warn!(
                session_id = %self.session_id,
                connection_id = respond_to,
                "unknown connection; response dropped"
            ),
        }
    }

    fn register_connection(
        &mut self,
        connection_id: String,
        connection: ActorRef<ConnectionMsg>,
        reply: oneshot::Sender<bool>,
    ) {
        debug!(session_id = %self.session_id, connection_id = %connection_id, "connection registered");
        self.connections.insert(connection_id, connection);
        self.touch();
        let _ = reply.send(true);
    }
}

struct UninitializedHandler;

#[async_trait]
impl StateHandler<SessionState, SessionData, SessionMsg> for UninitializedHandler {
    async fn on_enter(&mut self, ctx: &mut ActorContext<SessionMsg>, data: &mut SessionData) {
        let deadline = data.config.effective_initialize_timeout();
        data.initialize_deadline = Some(ctx.schedule_once(deadline, SessionMsg::InitializeTimeout));
    }

    async fn on_message(
        &mut self,
        _ctx: &mut ActorContext<SessionMsg>,
        msg: SessionMsg,
        data: &mut SessionData,
    ) -> anyhow::Result<Transition<SessionState>> {
        match msg {
            SessionMsg::RegisterConnection {
                connection_id,
                connection,
                reply,
            } => {
                data.register_connection(connection_id, connection, reply);
                Ok(Transition::Stay)
            }
            SessionMsg::Request { wrapped, reply }
                if wrapped.request.method == METHOD_INITIALIZE =>
            {
                handle_initialize(data, wrapped, reply)
            }
            SessionMsg::Request { wrapped, reply } => {
                data.send_response(
                    JsonRpcResponse::error(wrapped.request.id.clone(), RpcError::not_initialized()),
                    &wrapped.respond_to,
                    reply,
                );
                Ok(Transition::Stay)
            }
            SessionMsg::InitializeTimeout => {
                info!(session_id = %data.session_id, "no initialize before deadline; stopping session");
                Ok(Transition::Stop)
            }
            SessionMsg::CheckTtl => Ok(Transition::Stay),
        }
    }
}

fn handle_initialize(
    data: &mut SessionData,
    wrapped: WrappedRequest,
    reply: Option<oneshot::Sender<JsonRpcResponse>>,
) -> anyhow::Result<Transition<SessionState>> {
    let id = wrapped.request.id.clone();

    let params: InitializeParams = match wrapped
        .request
        .params
        .as_ref()
        .map(|p| serde_json::from_value(p.clone()))
    {
        Some(Ok(params)) => params,
        Some(Err(e)) => {
            data.send_response(
                JsonRpcResponse::error(id, RpcError::new(INVALID_PARAMS, e.to_string())),
                &wrapped.respond_to,
                reply,
            );
            return Ok(Transition::Stay);
        }
        None => {
            data.send_response(
                JsonRpcResponse::error(
                    id,
                    RpcError::new(INVALID_PARAMS, "initialize requires params"),
                ),
                &wrapped.respond_to,
                reply,
            );
            return Ok(Transition::Stay);
        }
    };

    let Some(version) = ProtocolVersion::parse(&params.protocol_version) else {
        data.send_response(
            JsonRpcResponse::error(id, RpcError::unsupported_protocol_version()),
            &wrapped.respond_to,
            reply,
        );
        return Ok(Transition::Stay);
    };

    data.protocol_version = Some(version);
    data.touch();

    let result = InitializeResult {
        protocol_version: version,
        server_info: data.server.identity.clone(),
        capabilities: data.server.capabilities.clone(),
        session_id: data.session_id.clone(),
    };
    data.send_response(
        JsonRpcResponse::success(id, serde_json::to_value(&result)?),
        &wrapped.respond_to,
        reply,
    );
    info!(
        session_id = %data.session_id,
        version = %version,
        client = params.client_info.as_ref().map(|c| c.name.as_str()).unwrap_or("unknown"),
        "session initialized"
    );
    Ok(Transition::Goto(SessionState::Initialized))
}

struct InitializedHandler;

#[async_trait]
impl StateHandler<SessionState, SessionData, SessionMsg> for InitializedHandler {
    async fn on_enter(&mut self, ctx: &mut ActorContext<SessionMsg>, data: &mut SessionData) {
        // The pending initialize deadline is obsolete; switch to TTL policing.
        data.initialize_deadline.take();
        data.touch();
        data.ttl_ticks = Some(
            ctx.schedule_interval(data.config.ttl_check_interval(), || SessionMsg::CheckTtl),
        );
    }

    async fn on_message(
        &mut self,
        _ctx: &mut ActorContext<SessionMsg>,
        msg: SessionMsg,
        data: &mut SessionData,
    ) -> anyhow::Result<Transition<SessionState>> {
        match msg {
            SessionMsg::RegisterConnection {
                connection_id,
                connection,
                reply,
            } => {
                data.register_connection(connection_id, connection, reply);
                Ok(Transition::Stay)
            }
            SessionMsg::Request { wrapped, reply } => {
                match wrapped.request.method.as_str() {
                    METHOD_SHUTDOWN => {
                        let id = wrapped.request.id.clone();
                        data.send_response(
                            JsonRpcResponse::success(id, serde_json::json!({})),
                            &wrapped.respond_to,
                            reply,
                        );
                        info!(
                            session_id = %data.session_id,
                            version = ?data.protocol_version,
                            client_initialized = data.client_initialized,
                            "session shut down"
                        );
                        Ok(Transition::Goto(SessionState::Shutdown))
                    }
                    METHOD_INITIALIZED => {
                        // Fire-and-forget: no reply even when asked.
                        data.client_initialized = true;
                        data.touch();
                        Ok(Transition::Stay)
                    }
                    METHOD_INITIALIZE => {
                        data.send_response(
                            JsonRpcResponse::error(
                                wrapped.request.id.clone(),
                                RpcError::new(INVALID_REQUEST, "Server already initialized"),
                            ),
                            &wrapped.respond_to,
                            reply,
                        );
                        Ok(Transition::Stay)
                    }
                    _ => delegate(data, wrapped, reply).await,
                }
            }
            SessionMsg::CheckTtl => {
                if data.expired() {
                    info!(session_id = %data.session_id, "idle past ttl; stopping session");
                    Ok(Transition::Stop)
                } else {
                    Ok(Transition::Stay)
                }
            }
            // Stale one-shot from before the transition.
            SessionMsg::InitializeTimeout => Ok(Transition::Stay),
        }
    }
}

async fn delegate(
    data: &mut SessionData,
    wrapped: WrappedRequest,
    reply: Option<oneshot::Sender<JsonRpcResponse>>,
) -> anyhow::Result<Transition<SessionState>> {
    let request = &wrapped.request;
    let id = request.id.clone();

    if !data.server.handler.can_handle(&request.method) {
        data.send_response(
            JsonRpcResponse::error(id, RpcError::method_not_found(&request.method)),
            &wrapped.respond_to,
            reply,
        );
        return Ok(Transition::Stay);
    }

    let call = MethodCall {
        session_id: &data.session_id,
        method: &request.method,
        params: request.params.as_ref(),
        auth: wrapped.auth.as_deref(),
    };
    let response = match data.server.handler.handle(call).await {
        Ok(result) => {
            data.touch();
            JsonRpcResponse::success(id, result)
        }
        Err(e) => {
            debug!(session_id = %data.session_id, method = %request.method, error = %e, "method handler failed");
            JsonRpcResponse::error(id, e.to_rpc_error())
        }
    };
    data.send_response(response, &wrapped.respond_to, reply);
    Ok(Transition::Stay)
}

struct ShutdownHandler;

#[async_trait]
impl StateHandler<SessionState, SessionData, SessionMsg> for ShutdownHandler {
    async fn on_message(
        &mut self,
        _ctx: &mut ActorContext<SessionMsg>,
        msg: SessionMsg,
        data: &mut SessionData,
    ) -> anyhow::Result<Transition<SessionState>> {
        match msg {
            SessionMsg::CheckTtl => {
                data.ttl_ticks.take();
                Ok(Transition::Stop)
            }
            other => {
                let kind = match &other {
                    SessionMsg::RegisterConnection { .. } => "register",
                    SessionMsg::Request { .. } => "request",
                    _ => "timer",
                };
                debug!(session_id = %data.session_id, kind, "message after shutdown ignored");
                Ok(Transition::Stay)
            }
        }
    }
}

/// Spawn the session entity under its deterministic name. The returned cell
/// exposes the current lifecycle state to inspectors.
pub fn spawn_session(
    system: &ActorSystem,
    session_id: &str,
    config: McpServerConfig,
    server: Arc<ServerInfo>,
) -> Result<(ActorRef<SessionMsg>, StateCell<SessionState>), SpawnError> {
    let data = SessionData {
        session_id: session_id.to_string(),
        config,
        server,
        protocol_version: None,
        client_initialized: false,
        last_activity: Instant::now(),
        connections: HashMap::new(),
        initialize_deadline: None,
        ttl_ticks: None,
    };
    let machine = StateMachine::new(SessionState::Uninitialized, data)
        .handler(SessionState::Uninitialized, UninitializedHandler)
        .handler(SessionState::Initialized, InitializedHandler)
        .handler(SessionState::Shutdown, ShutdownHandler);
    let cell = machine.state_cell();
    let session = system.spawn(session_name(session_id), machine)?;
    Ok((session, cell))
}
