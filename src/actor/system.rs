//! Mailbox entities on top of tokio tasks.
//!
//! Each entity owns its state and processes one message at a time from a
//! private mailbox. Entities are registered under unique names and talk to
//! each other with `tell` (fire-and-forget) and `ask` (reply with timeout).
//! A watcher facility turns entity termination into a mailbox signal.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// A message-processing entity. The runtime guarantees serial delivery, so
/// implementations may hold mutable state without locking.
#[async_trait]
pub trait Actor: Send + 'static {
    type Msg: Send + 'static;

    /// Runs once before the first message is delivered.
    async fn started(&mut self, _ctx: &mut ActorContext<Self::Msg>) {}

    async fn handle(&mut self, ctx: &mut ActorContext<Self::Msg>, msg: Self::Msg);

    /// Delivered when an entity this one watches has terminated.
    async fn watched_terminated(&mut self, _ctx: &mut ActorContext<Self::Msg>, _actor_id: String) {}

    /// Runs after the last message, before the entity is deregistered.
    async fn stopped(&mut self, _ctx: &mut ActorContext<Self::Msg>) {}
}

enum Envelope<M> {
    Msg(M),
    Terminated(String),
}

/// Cheap cloneable handle to a running entity's mailbox.
pub struct ActorRef<M> {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Envelope<M>>,
}

impl<M> std::fmt::Debug for ActorRef<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRef").field("name", &self.name).finish()
    }
}

impl<M> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<M: Send + 'static> ActorRef<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fire-and-forget send. Returns false if the mailbox is gone.
    pub fn tell(&self, msg: M) -> bool {
        self.tx.send(Envelope::Msg(msg)).is_ok()
    }

    /// Request/reply with a deadline. `make` embeds the reply sender into the
    /// message. Expiry does not cancel the receiver's in-flight handling; a
    /// late reply is dropped on the floor.
    pub async fn ask<R, F>(&self, timeout: Duration, make: F) -> Result<R, AskError>
    where
        F: FnOnce(oneshot::Sender<R>) -> M,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        if !self.tell(make(reply_tx)) {
            return Err(AskError::Stopped(self.name.to_string()));
        }
        match tokio::time::timeout(timeout, reply_rx).await {
            Err(_) => Err(AskError::Timeout(self.name.to_string())),
            Ok(Err(_)) => Err(AskError::NoReply(self.name.to_string())),
            Ok(Ok(value)) => Ok(value),
        }
    }

    fn notify_terminated(&self, actor_id: &str) {
        let _ = self.tx.send(Envelope::Terminated(actor_id.to_string()));
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AskError {
    #[error("actor {0} is not running")]
    Stopped(String),
    #[error("ask to {0} timed out")]
    Timeout(String),
    #[error("actor {0} dropped the request without replying")]
    NoReply(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("actor name {0} is already taken")]
    NameTaken(String),
}

/// Cancellable handle to a scheduled delivery. Dropping it cancels the timer.
pub struct Timer {
    handle: JoinHandle<()>,
}

impl Timer {
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Handed to every handler invocation; gives an entity access to itself and
/// to the rest of the system.
pub struct ActorContext<M> {
    system: ActorSystem,
    self_ref: ActorRef<M>,
    stopping: bool,
}

impl<M: Send + 'static> ActorContext<M> {
    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    pub fn self_ref(&self) -> &ActorRef<M> {
        &self.self_ref
    }

    pub fn name(&self) -> &str {
        self.self_ref.name()
    }

    /// Stop after the current message; remaining mailbox contents are dropped.
    pub fn stop(&mut self) {
        self.stopping = true;
    }

    /// Deliver `msg` to self after `delay`, unless the returned timer is
    /// cancelled first.
    pub fn schedule_once(&self, delay: Duration, msg: M) -> Timer {
        let target = self.self_ref.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            target.tell(msg);
        });
        Timer { handle }
    }

    /// Deliver a fresh message to self every `period`, starting one period
    /// from now, until the returned timer is cancelled.
    pub fn schedule_interval<F>(&self, period: Duration, make: F) -> Timer
    where
        F: Fn() -> M + Send + 'static,
    {
        let target = self.self_ref.clone();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticks = tokio::time::interval_at(start, period);
            loop {
                ticks.tick().await;
                if !target.tell(make()) {
                    break;
                }
            }
        });
        Timer { handle }
    }
}

struct Cell {
    // Holds an `ActorRef<M>`; recovered by downcast in `lookup`.
    sender: Box<dyn Any + Send + Sync>,
    watchers: Vec<Box<dyn FnOnce(&str) + Send + Sync>>,
}

/// Registry of named entities. Cloning shares the same registry.
#[derive(Clone, Default)]
pub struct ActorSystem {
    cells: Arc<RwLock<HashMap<String, Cell>>>,
}

impl ActorSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `actor` under `name` and start its mailbox loop.
    pub fn spawn<A: Actor>(
        &self,
        name: impl Into<String>,
        actor: A,
    ) -> Result<ActorRef<A::Msg>, SpawnError> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let actor_ref = ActorRef {
            name: Arc::from(name.as_str()),
            tx,
        };

        {
            let mut cells = self.cells.write().expect("actor registry poisoned");
            if cells.contains_key(&name) {
                return Err(SpawnError::NameTaken(name));
            }
            cells.insert(
                name.clone(),
                Cell {
                    sender: Box::new(actor_ref.clone()),
                    watchers: Vec::new(),
                },
            );
        }

        let mut ctx = ActorContext {
            system: self.clone(),
            self_ref: actor_ref.clone(),
            stopping: false,
        };
        let mut actor = actor;
        tokio::spawn(async move {
            actor.started(&mut ctx).await;
            while !ctx.stopping {
                let Some(envelope) = rx.recv().await else {
                    break;
                };
                match envelope {
                    Envelope::Msg(msg) => actor.handle(&mut ctx, msg).await,
                    Envelope::Terminated(id) => actor.watched_terminated(&mut ctx, id).await,
                }
            }
            actor.stopped(&mut ctx).await;
            drop(actor);
            ctx.system.deregister(ctx.self_ref.name());
        });

        Ok(actor_ref)
    }

    /// Resolve a running entity by name. Returns None when the name is free
    /// or bound to an entity with a different message type.
    pub fn lookup<M: Send + 'static>(&self, name: &str) -> Option<ActorRef<M>> {
        let cells = self.cells.read().expect("actor registry poisoned");
        cells
            .get(name)
            .and_then(|cell| cell.sender.downcast_ref::<ActorRef<M>>())
            .cloned()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.cells
            .read()
            .expect("actor registry poisoned")
            .contains_key(name)
    }

    /// Arrange for `watcher` to receive a terminated signal when `target`
    /// stops. Returns false if `target` is not running.
    pub fn watch<M: Send + 'static>(&self, target: &str, watcher: &ActorRef<M>) -> bool {
        let mut cells = self.cells.write().expect("actor registry poisoned");
        match cells.get_mut(target) {
            None => false,
            Some(cell) => {
                let watcher = watcher.clone();
                cell.watchers
                    .push(Box::new(move |id: &str| watcher.notify_terminated(id)));
                true
            }
        }
    }

    fn deregister(&self, name: &str) {
        let cell = {
            let mut cells = self.cells.write().expect("actor registry poisoned");
            cells.remove(name)
        };
        let Some(cell) = cell else { return };
        debug!(actor = name, watchers = cell.watchers.len(), "actor terminated");
        for notify in cell.watchers {
            notify(name);
        }
    }
}
