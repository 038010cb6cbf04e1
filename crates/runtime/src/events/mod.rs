//! Topic-based event bus for encounter events.
//!
//! Events are published to a topic and consumers subscribe only to the topics
//! they need. The bus is built on `tokio::sync::broadcast` but never awaits:
//! publishing is synchronous and receivers can drain with `try_recv` from a
//! plain game loop.

mod bus;
mod types;

pub use bus::{Event, EventBus, Topic};
pub use types::{LifecycleEvent, PatternEvent, PhaseEvent};
