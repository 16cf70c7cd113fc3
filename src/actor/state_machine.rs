//! Generic state-machine entity.
//!
//! A machine is configured with an initial state, a data value, one handler
//! per state, and an optional fallback. The current state lives behind a
//! read-write lock so external inspectors (tests) never observe torn state;
//! transitions become visible only after the handler returns.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::warn;

use super::{Actor, ActorContext};

/// Outcome of one handled message.
pub enum Transition<S> {
    /// Keep the current state.
    Stay,
    /// Move to another state; its handler's `on_enter` runs next.
    Goto(S),
    /// Terminate the entity.
    Stop,
}

#[async_trait]
pub trait StateHandler<S, D, M>: Send
where
    S: Send,
    D: Send,
    M: Send,
{
    /// Runs when the machine enters this state, including the initial state
    /// at startup.
    async fn on_enter(&mut self, _ctx: &mut ActorContext<M>, _data: &mut D) {}

    async fn on_message(
        &mut self,
        ctx: &mut ActorContext<M>,
        msg: M,
        data: &mut D,
    ) -> anyhow::Result<Transition<S>>;
}

/// Shared read handle on a machine's current state.
pub struct StateCell<S>(Arc<RwLock<S>>);

impl<S: Copy> StateCell<S> {
    pub fn get(&self) -> S {
        *self.0.read().expect("state cell poisoned")
    }
}

impl<S> Clone for StateCell<S> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

pub struct StateMachine<S, D, M> {
    state: Arc<RwLock<S>>,
    data: D,
    handlers: HashMap<S, Box<dyn StateHandler<S, D, M>>>,
    fallback: Option<Box<dyn StateHandler<S, D, M>>>,
}

impl<S, D, M> StateMachine<S, D, M>
where
    S: Copy + Eq + Hash + Debug + Send + Sync + 'static,
    D: Send + 'static,
    M: Send + 'static,
{
    pub fn new(initial: S, data: D) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
            data,
            handlers: HashMap::new(),
            fallback: None,
        }
    }

    pub fn handler(mut self, state: S, handler: impl StateHandler<S, D, M> + 'static) -> Self {
        self.handlers.insert(state, Box::new(handler));
        self
    }

    pub fn fallback(mut self, handler: impl StateHandler<S, D, M> + 'static) -> Self {
        self.fallback = Some(Box::new(handler));
        self
    }

    /// Inspection handle for the current state; safe to read from any thread.
    pub fn state_cell(&self) -> StateCell<S> {
        StateCell(self.state.clone())
    }

    fn current(&self) -> S {
        *self.state.read().expect("state cell poisoned")
    }

    fn set_state(&self, next: S) {
        *self.state.write().expect("state cell poisoned") = next;
    }
}

#[async_trait]
impl<S, D, M> Actor for StateMachine<S, D, M>
where
    S: Copy + Eq + Hash + Debug + Send + Sync + 'static,
    D: Send + 'static,
    M: Send + 'static,
{
    type Msg = M;

    async fn started(&mut self, ctx: &mut ActorContext<M>) {
        let state = self.current();
        if let Some(handler) = self.handlers.get_mut(&state) {
            handler.on_enter(ctx, &mut self.data).await;
        }
    }

    async fn handle(&mut self, ctx: &mut ActorContext<M>, msg: M) {
        let state = self.current();
        let handler = match self.handlers.get_mut(&state) {
            Some(handler) => handler,
            None => match self.fallback.as_mut() {
                Some(fallback) => fallback,
                None => {
                    warn!(actor = ctx.name(), state = ?state, "unhandled message: no handler for state");
                    return;
                }
            },
        };

        match handler.on_message(ctx, msg, &mut self.data).await {
            Ok(Transition::Stay) => {}
            Ok(Transition::Goto(next)) => {
                self.set_state(next);
                if let Some(entered) = self.handlers.get_mut(&next) {
                    entered.on_enter(ctx, &mut self.data).await;
                }
            }
            Ok(Transition::Stop) => ctx.stop(),
            Err(e) => {
                warn!(actor = ctx.name(), state = ?state, error = %e, "state handler failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorSystem;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Light {
        Red,
        Green,
    }

    enum LightMsg {
        Go,
        Halt,
        Query(oneshot::Sender<u32>),
        Off,
    }

    struct Red;

    #[async_trait]
    impl StateHandler<Light, u32, LightMsg> for Red {
        async fn on_enter(&mut self, _ctx: &mut ActorContext<LightMsg>, data: &mut u32) {
            *data += 1;
        }

        async fn on_message(
            &mut self,
            ctx: &mut ActorContext<LightMsg>,
            msg: LightMsg,
            data: &mut u32,
        ) -> anyhow::Result<Transition<Light>> {
            match msg {
                LightMsg::Go => Ok(Transition::Goto(Light::Green)),
                LightMsg::Halt => Ok(Transition::Stay),
                LightMsg::Query(reply) => {
                    let _ = reply.send(*data);
                    Ok(Transition::Stay)
                }
                LightMsg::Off => {
                    ctx.stop();
                    Ok(Transition::Stay)
                }
            }
        }
    }

    struct Green;

    #[async_trait]
    impl StateHandler<Light, u32, LightMsg> for Green {
        async fn on_message(
            &mut self,
            _ctx: &mut ActorContext<LightMsg>,
            msg: LightMsg,
            data: &mut u32,
        ) -> anyhow::Result<Transition<Light>> {
            match msg {
                LightMsg::Halt => Ok(Transition::Goto(Light::Red)),
                LightMsg::Query(reply) => {
                    let _ = reply.send(*data);
                    Ok(Transition::Stay)
                }
                _ => Ok(Transition::Stay),
            }
        }
    }

    fn machine() -> StateMachine<Light, u32, LightMsg> {
        StateMachine::new(Light::Red, 0)
            .handler(Light::Red, Red)
            .handler(Light::Green, Green)
    }

    #[tokio::test]
    async fn test_initial_state_runs_on_enter() {
        let system = ActorSystem::new();
        let m = machine();
        let cell = m.state_cell();
        let light = system.spawn("light-enter", m).unwrap();
        let entered = light
            .ask(Duration::from_secs(1), LightMsg::Query)
            .await
            .unwrap();
        assert_eq!(entered, 1);
        assert_eq!(cell.get(), Light::Red);
    }

    #[tokio::test]
    async fn test_transition_visible_after_handler_returns() {
        let system = ActorSystem::new();
        let m = machine();
        let cell = m.state_cell();
        let light = system.spawn("light-goto", m).unwrap();

        light.tell(LightMsg::Go);
        // Round-trip to make sure Go was processed.
        light
            .ask(Duration::from_secs(1), LightMsg::Query)
            .await
            .unwrap();
        assert_eq!(cell.get(), Light::Green);

        light.tell(LightMsg::Halt);
        let reentered = light
            .ask(Duration::from_secs(1), LightMsg::Query)
            .await
            .unwrap();
        assert_eq!(cell.get(), Light::Red);
        // Red's on_enter ran twice: initial entry and the Green -> Red return.
        assert_eq!(reentered, 2);
    }

    #[tokio::test]
    async fn test_missing_handler_without_fallback_discards() {
        let system = ActorSystem::new();
        // Only a Red handler: once in Green, messages are discarded.
        let m = StateMachine::new(Light::Red, 0).handler(Light::Red, Red);
        let cell = m.state_cell();
        let light = system.spawn("light-nofallback", m).unwrap();
        light.tell(LightMsg::Go);
        light.tell(LightMsg::Halt);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Halt was discarded in Green; the entity is still running.
        assert_eq!(cell.get(), Light::Green);
        assert!(system.is_running("light-nofallback"));
    }

    #[tokio::test]
    async fn test_fallback_handles_uncovered_state() {
        struct CountingFallback;

        #[async_trait]
        impl StateHandler<Light, u32, LightMsg> for CountingFallback {
            async fn on_message(
                &mut self,
                _ctx: &mut ActorContext<LightMsg>,
                msg: LightMsg,
                data: &mut u32,
            ) -> anyhow::Result<Transition<Light>> {
                *data += 100;
                if let LightMsg::Query(reply) = msg {
                    let _ = reply.send(*data);
                }
                Ok(Transition::Stay)
            }
        }

        let system = ActorSystem::new();
        let m = StateMachine::new(Light::Red, 0)
            .handler(Light::Red, Red)
            .fallback(CountingFallback);
        let light = system.spawn("light-fallback", m).unwrap();
        light.tell(LightMsg::Go);
        let counted = light
            .ask(Duration::from_secs(1), LightMsg::Query)
            .await
            .unwrap();
        assert_eq!(counted, 101);
    }

    #[tokio::test]
    async fn test_stop_terminates_entity() {
        let system = ActorSystem::new();
        let light = system.spawn("light-off", machine()).unwrap();
        light.tell(LightMsg::Off);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!system.is_running("light-off"));
    }
}
