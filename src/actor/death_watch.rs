//! Converts the termination of a named entity into a single consumable event.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Actor, ActorContext, ActorSystem};

/// Fate of the watched entity, delivered at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeathWatchEvent {
    /// The target was not running when the watcher started.
    ActorNotStarted { watch_id: String },
    /// The target terminated.
    ActorTerminated { watch_id: String, actor_id: String },
}

/// Message type for the watcher entity; it only consumes terminated signals.
pub enum DeathWatchMsg {}

struct DeathWatcher {
    watch_id: String,
    target: String,
    events: mpsc::Sender<DeathWatchEvent>,
}

impl DeathWatcher {
    fn deliver(&self, event: DeathWatchEvent) {
        // Non-blocking: a consumer that is not waiting loses the event rather
        // than wedging the watcher.
        if let Err(e) = self.events.try_send(event) {
            warn!(watched = %self.target, error = %e, "death watch event dropped");
        }
    }
}

#[async_trait]
impl Actor for DeathWatcher {
    type Msg = DeathWatchMsg;

    async fn started(&mut self, ctx: &mut ActorContext<DeathWatchMsg>) {
        if !ctx.system().watch(&self.target, ctx.self_ref()) {
            debug!(watched = %self.target, "watch target not running");
            self.deliver(DeathWatchEvent::ActorNotStarted {
                watch_id: self.watch_id.clone(),
            });
            ctx.stop();
        }
    }

    async fn handle(&mut self, _ctx: &mut ActorContext<DeathWatchMsg>, msg: DeathWatchMsg) {
        match msg {}
    }

    async fn watched_terminated(&mut self, ctx: &mut ActorContext<DeathWatchMsg>, actor_id: String) {
        self.deliver(DeathWatchEvent::ActorTerminated {
            watch_id: self.watch_id.clone(),
            actor_id,
        });
        ctx.stop();
    }
}

/// Spawn a watcher on `target` and return the event channel.
///
/// The channel buffers one event. Call sites keep the receiver pending in a
/// select before the target can plausibly die, so delivery succeeds in
/// practice even though a full buffer drops the event.
pub fn spawn_death_watcher(
    system: &ActorSystem,
    target: &str,
) -> (String, mpsc::Receiver<DeathWatchEvent>) {
    let watch_id = Uuid::new_v4().to_string();
    let (events_tx, events_rx) = mpsc::channel(1);
    let watcher = DeathWatcher {
        watch_id: watch_id.clone(),
        target: target.to_string(),
        events: events_tx,
    };
    let name = format!("{target}-watcher-{watch_id}");
    if let Err(e) = system.spawn(name, watcher) {
        warn!(watched = target, error = %e, "failed to spawn death watcher");
    }
    (watch_id, events_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Inert;

    #[async_trait]
    impl Actor for Inert {
        type Msg = bool;

        async fn handle(&mut self, ctx: &mut ActorContext<bool>, stop: bool) {
            if stop {
                ctx.stop();
            }
        }
    }

    #[tokio::test]
    async fn test_termination_is_observed() {
        let system = ActorSystem::new();
        let target = system.spawn("doomed", Inert).unwrap();
        let (watch_id, mut events) = spawn_death_watcher(&system, "doomed");

        target.tell(true);
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            DeathWatchEvent::ActorTerminated {
                watch_id,
                actor_id: "doomed".to_string(),
            }
        );
        // The watcher itself has cleaned up.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_target_reports_not_started() {
        let system = ActorSystem::new();
        let (watch_id, mut events) = spawn_death_watcher(&system, "never-was");
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, DeathWatchEvent::ActorNotStarted { watch_id });
    }
}
