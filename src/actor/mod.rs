pub mod actor;
pub mod event_loop;

pub use actor::{Actor, ActorCore};
pub use event_loop::{ActorLoop, LoopHandle, LoopTask};
