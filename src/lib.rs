//! zenamqp - AMQP queue event collector
//!
//! Consumes messages from one queue per monitored broker, normalizes each
//! message into an event record and forwards it to an event sink. Connection
//! state changes are reported through the same sink as health events under
//! `/Status/Amqp`.
//!
//! # Overview
//!
//! - [`config`] - TOML configuration and per-device target snapshots
//! - [`event`] - severity mapping, event records, normalization and sinks
//! - [`transport`] - broker client capability and its lapin implementation
//! - [`task`] - per-device connection tasks and the scheduler driving them
//! - [`observability`] - structured logging and counters
//!
//! # Quick Start
//!
//! ```rust
//! use zenamqp::event::{MessageNormalizer, Severity};
//! use zenamqp::transport::RawMessage;
//!
//! let normalizer = MessageNormalizer::new("broker01", "zenamqp", "guest");
//! let message = RawMessage::with_content_type(
//!     "application/x-zenoss",
//!     r#"{"severity": 4, "summary": "Disk almost full", "component": "sda1"}"#,
//! );
//!
//! let record = normalizer.normalize(&message).unwrap();
//! assert_eq!(record.severity, Severity::Warning);
//! assert_eq!(record.component, "sda1");
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod observability;
pub mod task;
pub mod testing;
pub mod transport;

pub use config::{CollectorConfig, ConfigError, DeviceTarget};
pub use error::{CollectorError, CollectorResult};
pub use event::{EventRecord, EventSink, HealthEvent, MessageNormalizer, Severity};
pub use task::{ConnectionTask, ScheduledTask, TaskError, TaskScheduler, TaskState};
pub use transport::{BrokerError, RawMessage};
