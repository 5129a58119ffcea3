//! Raw broker message -> EventRecord
//!
//! Classification is an exact match on the message property map: only a
//! message whose sole property is a recognised content type gets special
//! treatment. Extra properties, a different spelling or a different case all
//! fall through to the fallback template.

use super::record::EventRecord;
use super::severity::{Severity, SeverityError};
use crate::transport::{RawMessage, CONTENT_TYPE};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;
use thiserror::Error;

/// Content type of JSON event payloads
pub const ZENOSS_CONTENT_TYPE: &str = "application/x-zenoss";

/// Content type whose body becomes the event summary
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

const DEGRADED_BODY_MAX_CHARS: usize = 1024;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Malformed application/x-zenoss payload: {reason}")]
    Decode { reason: String },

    #[error(transparent)]
    InvalidSeverity(#[from] SeverityError),
}

impl NormalizeError {
    pub fn decode<S: Into<String>>(reason: S) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }
}

/// How a message body is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// JSON object merged over the fallback template
    Structured,
    /// Body becomes the summary
    PlainText,
    /// Body ignored, fallback template emitted unchanged
    Opaque,
}

impl PayloadKind {
    pub fn classify(properties: &BTreeMap<String, String>) -> Self {
        if properties.len() != 1 {
            return PayloadKind::Opaque;
        }

        match properties.get(CONTENT_TYPE).map(String::as_str) {
            Some(ZENOSS_CONTENT_TYPE) => PayloadKind::Structured,
            Some(TEXT_CONTENT_TYPE) => PayloadKind::PlainText,
            _ => PayloadKind::Opaque,
        }
    }
}

/// Per-device normalizer carrying the static fallback fields
#[derive(Debug, Clone)]
pub struct MessageNormalizer {
    device_id: String,
    agent: String,
    user: String,
}

impl MessageNormalizer {
    pub fn new(device_id: &str, agent: &str, user: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            agent: agent.to_string(),
            user: user.to_string(),
        }
    }

    pub fn fallback(&self) -> EventRecord {
        EventRecord::fallback(&self.device_id, &self.agent, &self.user)
    }

    pub fn normalize(&self, message: &RawMessage) -> Result<EventRecord, NormalizeError> {
        let mut record = self.fallback();

        match PayloadKind::classify(&message.properties) {
            PayloadKind::Structured => {
                let payload = decode_payload(&message.body)?;
                apply_payload(&mut record, payload)?;
            }
            PayloadKind::PlainText => {
                record.summary = decode_text(&message.body).into_owned();
            }
            PayloadKind::Opaque => {}
        }

        Ok(record)
    }

    /// Record sent in place of a message that failed to normalize
    pub fn degraded(
        &self,
        message: &RawMessage,
        queue: &str,
        error: &NormalizeError,
    ) -> EventRecord {
        let mut record = self.fallback();
        record.severity = Severity::Warning;
        record.summary = format!("Unable to decode AMQP message from queue {queue}: {error}");
        record.message = Some(
            decode_text(&message.body)
                .chars()
                .take(DEGRADED_BODY_MAX_CHARS)
                .collect(),
        );
        record
            .extra
            .insert("decodeError".to_string(), Value::Bool(true));
        record
    }
}

/// UTF-8 when valid, otherwise Latin-1 (every byte maps to one char)
pub fn decode_text(body: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(body) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(body.iter().map(|&b| b as char).collect()),
    }
}

fn decode_payload(body: &[u8]) -> Result<Map<String, Value>, NormalizeError> {
    let text = decode_text(body);
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(NormalizeError::decode(format!(
            "expected a JSON object, found {}",
            json_type_name(&other)
        ))),
        Err(e) => Err(NormalizeError::decode(e.to_string())),
    }
}

fn apply_payload(
    record: &mut EventRecord,
    payload: Map<String, Value>,
) -> Result<(), NormalizeError> {
    for (key, value) in payload {
        match key.as_str() {
            "device" => record.device = text_value(value),
            "summary" => record.summary = text_value(value),
            "agent" => record.agent = text_value(value),
            "component" => record.component = text_value(value),
            "message" => record.message = optional_text_value(value),
            "eventClass" => record.event_class = optional_text_value(value),
            "eventClassKey" => record.event_class_key = optional_text_value(value),
            "eventGroup" => record.event_group = optional_text_value(value),
            "user" => record.user = optional_text_value(value),
            "severity" => record.severity = severity_value(&value)?,
            _ => {
                record.extra.insert(key, value);
            }
        }
    }
    Ok(())
}

fn text_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn optional_text_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(text_value(other)),
    }
}

fn severity_value(value: &Value) -> Result<Severity, NormalizeError> {
    match (value.as_i64(), value.as_u64()) {
        (Some(code), _) => Ok(Severity::from_code(code)?),
        // Integers beyond i64 are still integers, just out of range
        (None, Some(code)) => Err(SeverityError::InvalidSeverity(i128::from(code)).into()),
        (None, None) => Err(NormalizeError::decode(format!(
            "severity must be an integer code, found {}",
            json_type_name(value)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
