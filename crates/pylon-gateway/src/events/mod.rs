//! Typed events and listener fan-out

mod dispatcher;
mod event;
mod listener;

pub(crate) use dispatcher::panic_message;
pub use dispatcher::EventDispatcher;
pub use event::Event;
pub use listener::{EventListener, FnListener};
