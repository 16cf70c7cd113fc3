//! HTTP dispatch: parses JSON-RPC envelopes and bridges them onto session
//! and connection entities.
//!
//! Two wire variants are served concurrently: the streamable 2025-03-26
//! flavor (`POST /mcp` request/response, `GET /mcp` long-lived push keyed by
//! the `Mcp-Session-Id` header) and the legacy 2024-11-05 flavor (`GET /sse`
//! push plus `POST /messages?sessionId=...` for client-to-server traffic).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::mcp::channel::PushChannel;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::actor::{ActorSystem, AskError, spawn_death_watcher};
use crate::mcp::ServerInfo;
use crate::mcp::channel::SsePushChannel;
use crate::mcp::config::McpServerConfig;
use crate::mcp::connection::{ClientConnection, ConnectionOptions};
use crate::mcp::protocol::{
    INTERNAL_ERROR, INVALID_REQUEST, JsonRpcRequest, JsonRpcResponse, ProtocolVersion, RequestId,
    RpcError, WrappedRequest,
};
use crate::mcp::session::{self, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_SHUTDOWN, SessionMsg};

static MCP_SESSION_ID: HeaderName = HeaderName::from_static("mcp-session-id");
const SESSION_COOKIE: &str = "mcp_session_id";

/// Methods dispatched as tells; everything else is asked.
const ONE_WAY_METHODS: &[&str] = &[METHOD_INITIALIZED];

/// Events buffered per push channel before emits apply backpressure.
const PUSH_BUFFER: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub system: ActorSystem,
    pub config: McpServerConfig,
    pub server: Arc<ServerInfo>,
}

pub fn create_app(system: ActorSystem, config: McpServerConfig, server: Arc<ServerInfo>) -> Router {
    let state = AppState {
        system,
        config,
        server,
    };

    Router::new()
        // Streamable HTTP (2025-03-26)
        .route("/mcp", post(mcp_post).get(mcp_get).delete(mcp_delete))
        // Legacy SSE transport (2024-11-05)
        .route("/sse", get(legacy_sse))
        .route("/messages", post(legacy_messages))
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(
    listen: &str,
    system: ActorSystem,
    config: McpServerConfig,
    server: Arc<ServerInfo>,
) -> anyhow::Result<()> {
    let app = create_app(system, config, server);
    let addr: SocketAddr = listen.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "MCP session server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

#[derive(Deserialize)]
struct SessionQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

fn header_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(&MCP_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn cookie_session_id(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
    })
}

fn extract_auth(state: &AppState, headers: &HeaderMap) -> Option<Vec<u8>> {
    let auth = state.server.auth.as_ref()?;
    let info = auth.extract(headers)?;
    Some(auth.serialize(&info))
}

fn rpc_error_response(status: StatusCode, id: Option<RequestId>, error: RpcError) -> Response {
    (status, Json(JsonRpcResponse::error(id, error))).into_response()
}

fn ask_failure(error: AskError, id: Option<RequestId>) -> Response {
    warn!(error = %error, "session ask failed");
    rpc_error_response(StatusCode::INTERNAL_SERVER_ERROR, id, RpcError::internal())
}

/// Parse a single JSON-RPC envelope; batches are refused in both variants.
fn parse_envelope(body: Value) -> Result<JsonRpcRequest, Box<Response>> {
    if body.is_array() {
        return Err(Box::new(rpc_error_response(
            StatusCode::BAD_REQUEST,
            None,
            RpcError::new(INVALID_REQUEST, "batch requests are not supported"),
        )));
    }
    serde_json::from_value(body).map_err(|e| {
        Box::new(rpc_error_response(
            StatusCode::BAD_REQUEST,
            None,
            RpcError::new(INVALID_REQUEST, e.to_string()),
        ))
    })
}

async fn mcp_post(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let request = match parse_envelope(body) {
        Ok(request) => request,
        Err(response) => return *response,
    };
    let auth = extract_auth(&state, &headers);

    let mut session_id = header_session_id(&headers);
    if session_id.is_none() && request.method == METHOD_INITIALIZE {
        session_id = query.session_id;
    }

    match session_id {
        None if request.method == METHOD_INITIALIZE => {
            initialize_new_session(state, request, auth).await
        }
        None => rpc_error_response(
            StatusCode::BAD_REQUEST,
            request.id,
            RpcError::new(
                INVALID_REQUEST,
                "missing Mcp-Session-Id, expecting initialize message",
            ),
        ),
        Some(session_id) => dispatch_to_session(state, session_id, request, auth).await,
    }
}

async fn initialize_new_session(
    state: AppState,
    request: JsonRpcRequest,
    auth: Option<Vec<u8>>,
) -> Response {
    let session_id = session::generate_session_id();
    let session = match session::spawn_session(
        &state.system,
        &session_id,
        state.config.clone(),
        state.server.clone(),
    ) {
        Ok((session, _)) => session,
        Err(e) => {
            error!(error = %e, "failed to spawn session entity");
            return rpc_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                request.id,
                RpcError::internal(),
            );
        }
    };

    let id = request.id.clone();
    let wrapped = WrappedRequest::new(request).with_auth(auth);
    match session
        .ask(state.config.request_timeout, |reply| SessionMsg::Request {
            wrapped,
            reply: Some(reply),
        })
        .await
    {
        Ok(response) => {
            let mut out = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(&session_id) {
                out.insert(&MCP_SESSION_ID, value);
            }
            (StatusCode::OK, out, Json(response)).into_response()
        }
        Err(e) => ask_failure(e, id),
    }
}

async fn dispatch_to_session(
    state: AppState,
    session_id: String,
    request: JsonRpcRequest,
    auth: Option<Vec<u8>>,
) -> Response {
    let Some(session) = state
        .system
        .lookup::<SessionMsg>(&session::session_name(&session_id))
    else {
        debug!(session_id = %session_id, "request for unknown session");
        return rpc_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            request.id,
            RpcError::new(INTERNAL_ERROR, "session not found"),
        );
    };

    let wrapped = WrappedRequest::new(request).with_auth(auth);
    if ONE_WAY_METHODS.contains(&wrapped.request.method.as_str()) {
        session.tell(SessionMsg::Request {
            wrapped,
            reply: None,
        });
        return StatusCode::ACCEPTED.into_response();
    }

    let id = wrapped.request.id.clone();
    match session
        .ask(state.config.request_timeout, |reply| SessionMsg::Request {
            wrapped,
            reply: Some(reply),
        })
        .await
    {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => ask_failure(e, id),
    }
}

async fn mcp_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = header_session_id(&headers) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let protocol_version = state.config.protocol_version;
    push_stream(
        state,
        session_id,
        ConnectionOptions {
            send_endpoint_on_start: true,
            default_sse: false,
            protocol_version,
        },
        HeaderMap::new(),
    )
}

async fn mcp_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = header_session_id(&headers) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(session) = state
        .system
        .lookup::<SessionMsg>(&session::session_name(&session_id))
    else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };

    let wrapped = WrappedRequest::new(JsonRpcRequest::notification(METHOD_SHUTDOWN));
    session.tell(SessionMsg::Request {
        wrapped,
        reply: None,
    });
    StatusCode::ACCEPTED.into_response()
}

async fn legacy_sse(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (session_id, reattached) = match cookie_session_id(&headers) {
        Some(session_id) => (session_id, true),
        None => (session::generate_session_id(), false),
    };

    if state
        .system
        .lookup::<SessionMsg>(&session::session_name(&session_id))
        .is_none()
        && let Err(e) = session::spawn_session(
            &state.system,
            &session_id,
            state.config.clone(),
            state.server.clone(),
        )
    {
        // Lost a spawn race; the session exists now.
        debug!(session_id = %session_id, error = %e, "session spawn raced");
    }

    let mut extra = HeaderMap::new();
    if !reattached
        && let Ok(value) = HeaderValue::from_str(&format!("{SESSION_COOKIE}={session_id}; Path=/"))
    {
        extra.insert(header::SET_COOKIE, value);
    }

    push_stream(
        state,
        session_id,
        ConnectionOptions {
            send_endpoint_on_start: true,
            default_sse: true,
            protocol_version: ProtocolVersion::V20241105,
        },
        extra,
    )
}

async fn legacy_messages(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let request = match parse_envelope(body) {
        Ok(request) => request,
        Err(response) => return *response,
    };

    let Some(session_id) = query.session_id else {
        return (StatusCode::BAD_REQUEST, "missing sessionId").into_response();
    };
    let Some(session) = state
        .system
        .lookup::<SessionMsg>(&session::session_name(&session_id))
    else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };

    let auth = extract_auth(&state, &headers);
    let wrapped = WrappedRequest::new(request)
        .respond_to(session::default_connection_id(&session_id))
        .with_auth(auth);
    session.tell(SessionMsg::Request {
        wrapped,
        reply: None,
    });
    StatusCode::ACCEPTED.into_response()
}

/// Spawn the connection entity for a long-lived push stream and return the
/// SSE response draining its channel. The stream ends when either the
/// connection entity terminates or the channel completes.
fn push_stream(
    state: AppState,
    session_id: String,
    options: ConnectionOptions,
    extra_headers: HeaderMap,
) -> Response {
    let (channel, events) = SsePushChannel::new(PUSH_BUFFER);
    let connection = match ClientConnection::spawn(
        &state.system,
        &session_id,
        channel.clone(),
        options,
        state.config.clone(),
    ) {
        Ok(connection) => connection,
        Err(e) => {
            error!(session_id = %session_id, error = %e, "failed to spawn connection entity");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let (_watch_id, mut deaths) = spawn_death_watcher(&state.system, connection.name());
    let supervisor = channel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = deaths.recv() => {}
            _ = supervisor.closed() => {}
        }
        supervisor.close().await;
    });

    let stream = ReceiverStream::new(events).map(|event| Ok::<_, Infallible>(event.into_sse()));
    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response();
    response.headers_mut().extend(extra_headers);
    response
}

async fn healthz(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "name": state.server.identity.name,
        "version": state.server.identity.version,
    }))
}
