//! Broadcast event bus for observer notifications.
//!
//! Every component announces visible state changes here: configuration
//! changes, full registry snapshots, status-only snapshots, per-line log and
//! console output, disk-space snapshots, and kit catalogs. The bus is a
//! single fan-out channel; publishing never blocks the caller, and a slow or
//! disconnected observer only loses its own messages.

use serde::Serialize;
use tokio::sync::broadcast;

/// Default capacity for the event channel. Allows bursty update scenarios
/// (e.g. a chatty subprocess) without dropping notifications.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Kind of a published event; the lowercase label is the wire type the
/// transport layer forwards to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Process-wide configuration changed.
    Config,
    /// Full registry snapshot.
    SubApplications,
    /// Status-only snapshot (id + status for every application).
    Statuses,
    /// Flag schema for one application type.
    Flags,
    /// Disk-space snapshot.
    DiskInfo,
    /// Available kit catalog.
    Kits,
    /// Persisted, timestamped log line.
    Log,
    /// Transient console output line (not persisted to the main log).
    Console,
}

impl EventKind {
    /// The wire label for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Config => "config",
            EventKind::SubApplications => "subapplications",
            EventKind::Statuses => "statuses",
            EventKind::Flags => "flags",
            EventKind::DiskInfo => "diskinfo",
            EventKind::Kits => "kits",
            EventKind::Log => "log",
            EventKind::Console => "console",
        }
    }
}

/// A typed notification delivered to all connected observers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Event {
    /// What changed.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Serialized snapshot or line payload.
    pub data: serde_json::Value,
}

/// Fan-out channel shared by every component.
///
/// Cloning is cheap; all clones publish into the same channel. Observers
/// subscribe for a [`broadcast::Receiver`] and are dropped by the channel
/// (not retried) when they fall behind or disconnect.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a bus with the default channel capacity.
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribes to all subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Returns the number of connected observers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publishes a payload under the given kind.
    ///
    /// Serialization failures and the no-subscriber case are logged at
    /// debug level and otherwise ignored; publishing is always best-effort
    /// and never fails the calling operation.
    pub fn publish<T: Serialize>(&self, kind: EventKind, payload: &T) {
        let data = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), error = %e, "failed to serialize event payload");
                return;
            }
        };
        match self.tx.send(Event { kind, data }) {
            Ok(count) => {
                tracing::trace!(kind = kind.as_str(), "event delivered to {} observers", count);
            }
            Err(_) => {
                tracing::trace!(kind = kind.as_str(), "no observers for event");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(EventKind::Statuses, &vec![("a", "Running")]);

        let e1 = rx1.recv().await.expect("first subscriber receives");
        let e2 = rx2.recv().await.expect("second subscriber receives");
        assert_eq!(e1.kind, EventKind::Statuses);
        assert_eq!(e1.data, e2.data);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        // Must not panic or block.
        bus.publish(EventKind::Config, &serde_json::json!({"x": 1}));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_affect_others() {
        let bus = EventBus::new();
        let rx_dead = bus.subscribe();
        let mut rx_live = bus.subscribe();
        drop(rx_dead);

        bus.publish(EventKind::Kits, &Vec::<String>::new());
        let event = rx_live.recv().await.expect("live subscriber still served");
        assert_eq!(event.kind, EventKind::Kits);
    }

    #[test]
    fn event_kind_wire_labels_are_lowercase() {
        assert_eq!(EventKind::SubApplications.as_str(), "subapplications");
        assert_eq!(EventKind::DiskInfo.as_str(), "diskinfo");
        let json = serde_json::to_string(&EventKind::Statuses).expect("serializes");
        assert_eq!(json, "\"statuses\"");
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event {
            kind: EventKind::Log,
            data: serde_json::json!({"message": "hello", "appId": "a1"}),
        };
        let json = serde_json::to_value(&event).expect("serializes");
        assert_eq!(json["type"], "log");
        assert_eq!(json["data"]["appId"], "a1");
    }
}
