// Typed publish/subscribe hub shared by the connection and the store

mod listeners;

pub use listeners::{Handler, Listeners, SubscriptionId};

use crate::connection::{ClientError, ConnectionState};
use crate::event::{EmotionEvent, Envelope};
use std::collections::HashMap;
use std::fmt;

/// Payload-free discriminant of [`BusEvent`], used to subscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    Connect,
    Disconnect,
    Error,
    Emotion,
    Message,
    StateChanged,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::Connect,
        Topic::Disconnect,
        Topic::Error,
        Topic::Emotion,
        Topic::Message,
        Topic::StateChanged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Connect => "connect",
            Topic::Disconnect => "disconnect",
            Topic::Error => "error",
            Topic::Emotion => "emotion",
            Topic::Message => "message",
            Topic::StateChanged => "state_changed",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can travel over the bus
#[derive(Clone, Debug, PartialEq)]
pub enum BusEvent {
    /// Transport opened
    Connect,
    /// An open transport went away (dropped or torn down)
    Disconnect,
    Error(ClientError),
    Emotion(EmotionEvent),
    /// Every decoded frame, whatever its type
    Message(Envelope),
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
}

impl BusEvent {
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::Connect => Topic::Connect,
            BusEvent::Disconnect => Topic::Disconnect,
            BusEvent::Error(_) => Topic::Error,
            BusEvent::Emotion(_) => Topic::Emotion,
            BusEvent::Message(_) => Topic::Message,
            BusEvent::StateChanged { .. } => Topic::StateChanged,
        }
    }
}

/// EventBus dispatches [`BusEvent`]s synchronously to the handlers of their topic.
///
/// - Handlers run in subscription order
/// - A failing or panicking handler is logged and skipped; the rest still run
/// - Unsubscribing an unknown id is a no-op
///
/// Single-threaded: share it with `Rc<EventBus>`.
pub struct EventBus {
    topics: HashMap<Topic, Listeners<BusEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        let topics = Topic::ALL
            .into_iter()
            .map(|topic| (topic, Listeners::new()))
            .collect();
        Self { topics }
    }

    /// Register a handler for one topic
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + 'static,
    {
        self.listeners(topic).add(handler)
    }

    /// Remove a handler; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.topics.values().any(|listeners| listeners.remove(id))
    }

    /// Deliver an event to every current handler of its topic.
    ///
    /// Returns the number of handlers that completed without fault.
    pub fn publish(&self, event: BusEvent) -> usize {
        let topic = event.topic();
        self.listeners(topic).dispatch(topic.as_str(), &event)
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.listeners(topic).len()
    }

    fn listeners(&self, topic: Topic) -> &Listeners<BusEvent> {
        // Every topic is inserted in new()
        &self.topics[&topic]
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
