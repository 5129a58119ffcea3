//! Structured event records handed to the event sink

use super::severity::Severity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Agent name stamped on events when no collector name is configured
pub const COLLECTOR_NAME: &str = "zenamqp";

/// Event class used for connectivity status events
pub const STATUS_AMQP: &str = "/Status/Amqp";

/// Component, event class key and event group of every AMQP-sourced event
pub const AMQP_COMPONENT: &str = "amqp";

pub const NO_SUMMARY: &str = "No summary";
pub const NO_MESSAGE: &str = "No message";

/// Normalized event forwarded to the sink
///
/// Well-known fields are typed; anything else a payload supplies lands in
/// `extra` and is flattened back out on serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub device: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_class_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_group: Option<String>,
    pub component: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// Set only by `HealthEvent` constructors, never by payload content
    #[serde(skip)]
    health: bool,
}

impl EventRecord {
    /// The template every consumed message starts from
    pub fn fallback(device_id: &str, agent: &str, user: &str) -> Self {
        Self {
            device: device_id.to_string(),
            summary: NO_SUMMARY.to_string(),
            message: Some(NO_MESSAGE.to_string()),
            agent: agent.to_string(),
            event_class: None,
            event_class_key: Some(AMQP_COMPONENT.to_string()),
            event_group: Some(AMQP_COMPONENT.to_string()),
            component: AMQP_COMPONENT.to_string(),
            severity: Severity::Debug,
            user: Some(user.to_string()),
            extra: Map::new(),
            health: false,
        }
    }

    /// True for connectivity status events built by [`HealthEvent`]
    pub fn is_health_event(&self) -> bool {
        self.health
    }
}

/// Connectivity status events
pub struct HealthEvent;

impl HealthEvent {
    fn status(device_id: &str, agent: &str, summary: String, severity: Severity) -> EventRecord {
        EventRecord {
            device: device_id.to_string(),
            summary,
            message: None,
            agent: agent.to_string(),
            event_class: Some(STATUS_AMQP.to_string()),
            event_class_key: None,
            event_group: None,
            component: AMQP_COMPONENT.to_string(),
            severity,
            user: None,
            extra: Map::new(),
            health: true,
        }
    }

    /// Clear event emitted once the consumer is registered
    pub fn connected(device_id: &str, queue: &str, agent: &str) -> EventRecord {
        Self::status(
            device_id,
            agent,
            format!("Successfully connected to AMQP queue {queue}"),
            Severity::Clear,
        )
    }

    /// Error event emitted when any connect-sequence step fails
    pub fn connection_failed(
        device_id: &str,
        queue: &str,
        agent: &str,
        error: &str,
    ) -> EventRecord {
        Self::status(
            device_id,
            agent,
            format!("Unable to connect to amqp queue {queue} on {device_id}: {error}"),
            Severity::Error,
        )
    }

    /// Error event emitted when an established consumer loses its connection
    pub fn connection_lost(
        device_id: &str,
        queue: &str,
        agent: &str,
        error: &str,
    ) -> EventRecord {
        Self::status(
            device_id,
            agent,
            format!("Lost connection to amqp queue {queue} on {device_id}: {error}"),
            Severity::Error,
        )
    }
}
