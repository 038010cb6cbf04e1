//! Topic-based event bus implementation.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::types::{LifecycleEvent, PatternEvent, PhaseEvent};

/// Topics for event routing
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Topic {
    /// Threshold crossings, rushes and health floors
    Phase,
    /// Pattern starts, completions, faults and watchdogs
    Pattern,
    /// State transitions and the end of the encounter
    Lifecycle,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Phase, Topic::Pattern, Topic::Lifecycle];

    const fn index(self) -> usize {
        match self {
            Topic::Phase => 0,
            Topic::Pattern => 1,
            Topic::Lifecycle => 2,
        }
    }
}

/// Event wrapper that carries the topic and typed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Phase(PhaseEvent),
    Pattern(PatternEvent),
    Lifecycle(LifecycleEvent),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::Phase(_) => Topic::Phase,
            Event::Pattern(_) => Topic::Pattern,
            Event::Lifecycle(_) => Topic::Lifecycle,
        }
    }
}

impl From<PhaseEvent> for Event {
    fn from(event: PhaseEvent) -> Self {
        Event::Phase(event)
    }
}

impl From<PatternEvent> for Event {
    fn from(event: PatternEvent) -> Self {
        Event::Pattern(event)
    }
}

impl From<LifecycleEvent> for Event {
    fn from(event: LifecycleEvent) -> Self {
        Event::Lifecycle(event)
    }
}

/// Topic-based event bus
///
/// Allows consumers to subscribe to specific topics and only receive
/// events they care about. Cloning the bus shares the underlying channels.
#[derive(Clone)]
pub struct EventBus {
    channels: [broadcast::Sender<Event>; 3],
}

impl EventBus {
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Creates a new event bus with default capacity for each topic
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Creates a new event bus with specified capacity per topic
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            channels: Topic::ALL.map(|_| broadcast::channel(capacity).0),
        }
    }

    /// Publish an event to its corresponding topic
    pub fn publish(&self, event: impl Into<Event>) {
        let event = event.into();
        let topic = event.topic();

        if self.channels[topic.index()].send(event).is_err() {
            // No subscribers for this topic - this is normal, not an error
            tracing::trace!(target: "encounter::events", ?topic, "no subscribers");
        }
    }

    /// Subscribe to a specific topic
    ///
    /// Returns a receiver that will only receive events for that topic,
    /// starting with the next event published.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.channels[topic.index()].subscribe()
    }

    /// Subscribe to multiple topics
    pub fn subscribe_multiple(&self, topics: &[Topic]) -> Vec<(Topic, broadcast::Receiver<Event>)> {
        topics
            .iter()
            .map(|&topic| (topic, self.subscribe(topic)))
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
