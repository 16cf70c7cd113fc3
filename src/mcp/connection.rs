//! Client-connection entity: binds one push channel to one session.
//!
//! The entity registers itself with its session on start, forwards JSON-RPC
//! responses out as `message` events, and dies with either the session (via
//! the watch facility) or the channel (via the done signal). Teardown always
//! closes the channel, which ends the HTTP stream draining it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::actor::{Actor, ActorContext, ActorRef, ActorSystem, SpawnError};
use crate::mcp::channel::{MESSAGE_EVENT, PushChannel};
use crate::mcp::config::McpServerConfig;
use crate::mcp::protocol::{JsonRpcResponse, ProtocolVersion};
use crate::mcp::session::{self, SessionMsg};

pub enum ConnectionMsg {
    /// JSON-RPC response to forward to the client as a `message` event.
    Deliver(JsonRpcResponse),
    /// The underlying push channel is done.
    ChannelClosed,
}

/// How a connection entity should come up.
pub struct ConnectionOptions {
    /// Emit the endpoint event once registration succeeds.
    pub send_endpoint_on_start: bool,
    /// This channel is the session's primary SSE stream; use the canonical
    /// default connection id and entity name.
    pub default_sse: bool,
    /// Wire variant deciding which path the endpoint URL points at.
    pub protocol_version: ProtocolVersion,
}

pub struct ClientConnection {
    session_id: String,
    connection_id: String,
    channel: Arc<dyn PushChannel>,
    options: ConnectionOptions,
    config: McpServerConfig,
}

impl ClientConnection {
    /// Spawn the connection entity bound to `channel`.
    pub fn spawn(
        system: &ActorSystem,
        session_id: &str,
        channel: Arc<dyn PushChannel>,
        options: ConnectionOptions,
        config: McpServerConfig,
    ) -> Result<ActorRef<ConnectionMsg>, SpawnError> {
        let (connection_id, actor_name) = if options.default_sse {
            (
                session::default_connection_id(session_id),
                session::default_client_name(session_id),
            )
        } else {
            let fresh = Uuid::new_v4().to_string();
            (fresh.clone(), format!("{session_id}-client-{fresh}"))
        };
        let connection = ClientConnection {
            session_id: session_id.to_string(),
            connection_id,
            channel,
            options,
            config,
        };
        system.spawn(actor_name, connection)
    }

    fn endpoint_url(&self) -> String {
        let path = match self.options.protocol_version {
            ProtocolVersion::V20250326 => &self.config.mcp_path,
            ProtocolVersion::V20241105 => &self.config.message_path,
        };
        format!(
            "{}{}?sessionId={}",
            self.config.base_path, path, self.session_id
        )
    }

    async fn abandon(&self, ctx: &mut ActorContext<ConnectionMsg>) {
        self.channel.close().await;
        ctx.stop();
    }
}

#[async_trait]
impl Actor for ClientConnection {
    type Msg = ConnectionMsg;

    async fn started(&mut self, ctx: &mut ActorContext<ConnectionMsg>) {
        let session_name = session::session_name(&self.session_id);
        let Some(session) = ctx.system().lookup::<SessionMsg>(&session_name) else {
            warn!(
                session_id = %self.session_id,
                connection_id = %self.connection_id,
                "session not running; dropping connection"
            );
            self.abandon(ctx).await;
            return;
        };

        ctx.system().watch(&session_name, ctx.self_ref());

        let connection_id = self.connection_id.clone();
        let me = ctx.self_ref().clone();
        let registered = session
            .ask(self.config.request_timeout, move |reply| {
                SessionMsg::RegisterConnection {
                    connection_id,
                    connection: me,
                    reply,
                }
            })
            .await;
        match registered {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    session_id = %self.session_id,
                    connection_id = %self.connection_id,
                    "session refused connection registration"
                );
                self.abandon(ctx).await;
                return;
            }
            Err(e) => {
                warn!(
                    session_id = %self.session_id,
                    connection_id = %self.connection_id,
                    error = %e,
                    "connection registration failed"
                );
                self.abandon(ctx).await;
                return;
            }
        }

        if self.options.send_endpoint_on_start {
            let url = self.endpoint_url();
            if let Err(e) = self.channel.emit_endpoint(&url).await {
                warn!(
                    connection_id = %self.connection_id,
                    error = %e,
                    "endpoint event failed"
                );
            }
        }

        // Surface channel teardown (local close or remote disconnect) as a
        // mailbox message.
        let channel = self.channel.clone();
        let me = ctx.self_ref().clone();
        tokio::spawn(async move {
            channel.closed().await;
            me.tell(ConnectionMsg::ChannelClosed);
        });
    }

    async fn handle(&mut self, ctx: &mut ActorContext<ConnectionMsg>, msg: ConnectionMsg) {
        match msg {
            ConnectionMsg::Deliver(response) => {
                let payload = match serde_json::to_value(&response) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(connection_id = %self.connection_id, error = %e, "unencodable response dropped");
                        return;
                    }
                };
                if let Err(e) = self.channel.emit(MESSAGE_EVENT, &payload).await {
                    // Teardown is the done signal's job; keep serving until
                    // it lands.
                    warn!(connection_id = %self.connection_id, error = %e, "push emit failed");
                }
            }
            ConnectionMsg::ChannelClosed => {
                debug!(connection_id = %self.connection_id, "push channel done; stopping connection");
                ctx.stop();
            }
        }
    }

    async fn watched_terminated(&mut self, ctx: &mut ActorContext<ConnectionMsg>, actor_id: String) {
        if actor_id == session::session_name(&self.session_id) {
            debug!(
                session_id = %self.session_id,
                connection_id = %self.connection_id,
                "session terminated; stopping connection"
            );
            ctx.stop();
        }
    }

    async fn stopped(&mut self, _ctx: &mut ActorContext<ConnectionMsg>) {
        self.channel.close().await;
    }
}
