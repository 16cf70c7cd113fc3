//! One-way server-push channel feeding a single HTTP client.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::sse::Event;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Event name carrying the client's message-post URL.
pub const ENDPOINT_EVENT: &str = "endpoint";
/// Event name carrying JSON-RPC payloads.
pub const MESSAGE_EVENT: &str = "message";

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("push channel is closed")]
    Closed,
    #[error("client disconnected")]
    Disconnected,
    #[error("serialize event payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One framed server-push event, before SSE encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub event: String,
    pub data: String,
}

impl PushEvent {
    pub fn into_sse(self) -> Event {
        Event::default().event(self.event).data(self.data)
    }
}

/// Named-event sink with a done signal. Emits are serialized by the owning
/// connection entity; the done signal fires on local close and on observed
/// remote disconnect.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Serialize `payload` and emit it as a named event.
    async fn emit(&self, event: &str, payload: &Value) -> Result<(), ChannelError>;

    /// Emit the endpoint event carrying a raw URL string.
    async fn emit_endpoint(&self, url: &str) -> Result<(), ChannelError>;

    /// Idempotent. Later emits fail and the done signal fires.
    async fn close(&self);

    /// Completes once the channel is done, locally or because the remote
    /// peer went away.
    async fn closed(&self);
}

/// Push channel backed by an mpsc stream that an axum SSE response drains.
pub struct SsePushChannel {
    tx: Mutex<Option<mpsc::Sender<PushEvent>>>,
    done: watch::Sender<bool>,
}

impl SsePushChannel {
    /// Returns the channel and the event stream to hand to the HTTP layer.
    pub fn new(buffer: usize) -> (Arc<Self>, mpsc::Receiver<PushEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        let (done, _) = watch::channel(false);
        let channel = Arc::new(Self {
            tx: Mutex::new(Some(tx.clone())),
            done,
        });

        // Remote disconnect: the HTTP layer drops the receiver, which
        // resolves `closed()` on the sender. The select arm on the done
        // signal releases this task's sender clone after a local close so
        // the event stream can end.
        let monitor = channel.clone();
        let mut done_rx = channel.done.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tx.closed() => monitor.mark_done(),
                _ = done_rx.wait_for(|done| *done) => {}
            }
        });

        (channel, rx)
    }

    fn mark_done(&self) {
        self.done.send_replace(true);
    }

    fn sender(&self) -> Option<mpsc::Sender<PushEvent>> {
        self.tx.lock().expect("push channel lock poisoned").clone()
    }

    async fn send(&self, event: PushEvent) -> Result<(), ChannelError> {
        let Some(tx) = self.sender() else {
            return Err(ChannelError::Closed);
        };
        if tx.send(event).await.is_err() {
            self.mark_done();
            return Err(ChannelError::Disconnected);
        }
        Ok(())
    }
}

#[async_trait]
impl PushChannel for SsePushChannel {
    async fn emit(&self, event: &str, payload: &Value) -> Result<(), ChannelError> {
        let data = serde_json::to_string(payload)?;
        self.send(PushEvent {
            event: event.to_string(),
            data,
        })
        .await
    }

    async fn emit_endpoint(&self, url: &str) -> Result<(), ChannelError> {
        self.send(PushEvent {
            event: ENDPOINT_EVENT.to_string(),
            data: url.to_string(),
        })
        .await
    }

    async fn close(&self) {
        self.tx.lock().expect("push channel lock poisoned").take();
        self.mark_done();
    }

    async fn closed(&self) {
        let mut done_rx = self.done.subscribe();
        let _ = done_rx.wait_for(|done| *done).await;
    }
}
