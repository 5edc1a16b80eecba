//! Cluster events surfaced to users.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => f.write_str("Normal"),
            EventType::Warning => f.write_str("Warning"),
        }
    }
}

/// A recorded event, as delivered to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    /// `<namespace>/<name>` of the object the event is about.
    pub object: String,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

/// Sink for user-visible events. Implementations must not block.
pub trait EventRecorder: Send + Sync {
    fn event(&self, object: &str, event_type: EventType, reason: &str, message: &str);
}

/// In-memory recorder for tests.
#[derive(Default)]
pub struct FakeRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl FakeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }
}

impl EventRecorder for FakeRecorder {
    fn event(&self, object: &str, event_type: EventType, reason: &str, message: &str) {
        self.events.lock().push(RecordedEvent {
            object: object.to_string(),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}
