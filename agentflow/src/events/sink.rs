//! Event sink trait and implementations.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Level};

/// Trait for event sinks that receive control-surface events.
///
/// The orchestrator reports every task status transition, progress update
/// and terminal outcome through a sink. Sinks must never fail the run.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "task.running")
    /// * `data` - Optional event data
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Tries to emit an event without blocking.
    ///
    /// Errors are logged but suppressed.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: Option<&serde_json::Value>) {
        if self.level == Level::DEBUG {
            debug!(event_type = %event_type, event_data = ?data, "Event: {}", event_type);
        } else {
            info!(event_type = %event_type, event_data = ?data, "Event: {}", event_type);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// A collecting event sink for testing and post-run inspection.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, Option<serde_json::Value>)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, Option<serde_json::Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Returns the ordered event types recorded for one task.
    #[must_use]
    pub fn task_transitions(&self, task: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|(t, data)| {
                t.starts_with("task.")
                    && data
                        .as_ref()
                        .and_then(|d| d.get("task"))
                        .and_then(serde_json::Value::as_str)
                        == Some(task)
            })
            .map(|(t, _)| t.clone())
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

/// An event forwarded through a [`ChannelEventSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    /// The event type.
    pub event_type: String,
    /// The event payload.
    pub data: serde_json::Value,
}

/// Streams events to the hosting application over a bounded channel.
///
/// When the receiver falls behind, `try_emit` drops the event and counts
/// it rather than stalling the run.
#[derive(Debug)]
pub struct ChannelEventSink {
    sender: mpsc::Sender<ChannelEvent>,
    dropped: AtomicU64,
}

impl ChannelEventSink {
    /// Creates a sink and the receiver the host should drain.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }

    /// Returns the number of events dropped because the channel was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn event(event_type: &str, data: Option<serde_json::Value>) -> ChannelEvent {
        ChannelEvent {
            event_type: event_type.to_string(),
            data: data.unwrap_or(serde_json::Value::Null),
        }
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        if self.sender.send(Self::event(event_type, data)).await.is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        if let Err(err) = self.sender.try_send(Self::event(event_type, data)) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(event_type = %event_type, error = %err, "Dropped control-surface event");
        }
    }
}
