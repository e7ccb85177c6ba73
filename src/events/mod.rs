/*!
 * Event Bus Contract
 * Fire-and-forget lifecycle event publishing; the bus implementation itself
 * is an external collaborator
 */

use log::debug;
use parking_lot::Mutex;
use serde_json::Value;

/// Contract consumed by the sandbox service and the process supervisor.
/// `publish` must not block and must not fail the caller.
pub trait EventBus: Send + Sync {
    fn publish(&self, topic: &str, payload: Value);
}

/// Publish with a debug trace; all core components emit through this helper
/// so event flow shows up in logs uniformly.
pub fn emit(bus: &dyn EventBus, topic: &str, payload: Value) {
    debug!("event {}: {}", topic, payload);
    bus.publish(topic, payload);
}

/// Bus that discards everything; for embeddings that do not wire observability.
pub struct NoopBus;

impl EventBus for NoopBus {
    fn publish(&self, _topic: &str, _payload: Value) {}
}

/// In-memory bus that records published events in order. Used by tests to
/// assert per-handle event ordering.
#[derive(Default)]
pub struct MemoryBus {
    events: Mutex<Vec<(String, Value)>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events published so far, in publication order
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        self.events.lock().clone()
    }

    /// Topics only, in publication order
    pub fn topics(&self) -> Vec<String> {
        self.events.lock().iter().map(|(t, _)| t.clone()).collect()
    }
}

impl EventBus for MemoryBus {
    fn publish(&self, topic: &str, payload: Value) {
        self.events.lock().push((topic.to_string(), payload));
    }
}
