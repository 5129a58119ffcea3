//! Event model: severity mapping, records, normalization and sinks

pub mod normalizer;
pub mod record;
pub mod severity;
pub mod sink;

pub use normalizer::{
    decode_text, MessageNormalizer, NormalizeError, PayloadKind, TEXT_CONTENT_TYPE,
    ZENOSS_CONTENT_TYPE,
};
pub use record::{EventRecord, HealthEvent, AMQP_COMPONENT, COLLECTOR_NAME, STATUS_AMQP};
pub use severity::{Severity, SeverityError, SEVERITY_MAP};
pub use sink::{ChannelEventSink, EventSink, JsonLinesSink, LogEventSink};
