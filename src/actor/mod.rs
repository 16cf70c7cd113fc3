pub mod death_watch;
pub mod state_machine;
pub mod system;

pub use death_watch::{DeathWatchEvent, spawn_death_watcher};
pub use state_machine::{StateCell, StateHandler, StateMachine, Transition};
pub use system::{Actor, ActorContext, ActorRef, ActorSystem, AskError, SpawnError, Timer};
