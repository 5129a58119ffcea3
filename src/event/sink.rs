//! Event sink capability and the built-in sinks
//!
//! Sinks are fire-and-forget: the consume loop never waits on or inspects a
//! delivery result, so each sink is responsible for logging its own failures.

use super::record::EventRecord;
use async_trait::async_trait;
use serde_json::Value;
use std::io::Write;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Destination for normalized events, shared by every device task
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send_event(&self, event: EventRecord);
}

/// Emits every record as a structured tracing event
#[derive(Debug, Default, Clone)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventSink for LogEventSink {
    async fn send_event(&self, event: EventRecord) {
        info!(
            target: "zenamqp::events",
            device = %event.device,
            severity = %event.severity,
            component = %event.component,
            event_class = event.event_class.as_deref().unwrap_or(""),
            summary = %event.summary,
            "event"
        );
    }
}

/// Writes one JSON object per line to stdout, stamped with `receivedAt`
#[derive(Debug, Default, Clone)]
pub struct JsonLinesSink;

impl JsonLinesSink {
    pub fn new() -> Self {
        Self
    }

    /// Render the line written for `event` (pure)
    pub fn render(
        event: &EventRecord,
        received_at: chrono::DateTime<chrono::Utc>,
    ) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(event)?;
        if let Value::Object(ref mut map) = value {
            map.insert(
                "receivedAt".to_string(),
                Value::String(received_at.to_rfc3339()),
            );
        }
        serde_json::to_string(&value)
    }
}

#[async_trait]
impl EventSink for JsonLinesSink {
    async fn send_event(&self, event: EventRecord) {
        let line = match Self::render(&event, chrono::Utc::now()) {
            Ok(line) => line,
            Err(e) => {
                error!(device = %event.device, error = %e, "Failed to serialize event");
                return;
            }
        };

        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{line}") {
            error!(device = %event.device, error = %e, "Failed to write event");
        }
    }
}

/// Forwards records into an mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: mpsc::Sender<EventRecord>,
}

impl ChannelEventSink {
    pub fn new(sender: mpsc::Sender<EventRecord>) -> Self {
        Self { sender }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<EventRecord>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn send_event(&self, event: EventRecord) {
        let device = event.device.clone();
        if self.sender.send(event).await.is_err() {
            warn!(device = %device, "Event channel closed, dropping event");
        }
    }
}
