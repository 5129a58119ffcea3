//! Broker client capability
//!
//! The collector never speaks the wire protocol itself. It drives a broker
//! client through these traits, one step at a time, so the connection task
//! can report exactly which stage failed and tests can script a broker
//! without a network.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub mod amqp;

/// Property key under which the message content type is exposed
pub const CONTENT_TYPE: &str = "content-type";

/// One message as delivered by the broker
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawMessage {
    /// Message properties that were set by the publisher, flattened to strings
    pub properties: BTreeMap<String, String>,
    pub body: Bytes,
}

impl RawMessage {
    pub fn new(properties: BTreeMap<String, String>, body: impl Into<Bytes>) -> Self {
        Self {
            properties,
            body: body.into(),
        }
    }

    pub fn with_content_type(content_type: &str, body: impl Into<Bytes>) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(CONTENT_TYPE.to_string(), content_type.to_string());
        Self::new(properties, body)
    }

    /// Message without any properties
    pub fn untyped(body: impl Into<Bytes>) -> Self {
        Self::new(BTreeMap::new(), body)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.properties.get(CONTENT_TYPE).map(String::as_str)
    }
}

/// Where a device's broker lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub virtual_host: String,
}

/// Queue declaration flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl QueueOptions {
    /// Durable, shared, never auto-deleted
    pub const fn durable() -> Self {
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

/// Consumer registration flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOptions {
    pub no_ack: bool,
}

impl ConsumeOptions {
    pub const fn no_ack() -> Self {
        Self { no_ack: true }
    }
}

/// Broker client errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Channel open failed: {0}")]
    ChannelFailed(String),
    #[error("Queue declare failed for {queue}: {reason}")]
    QueueDeclareFailed { queue: String, reason: String },
    #[error("Consumer registration failed for {queue}: {reason}")]
    ConsumeFailed { queue: String, reason: String },
    #[error("Connection lost: {0}")]
    Disconnected(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Not connected")]
    NotConnected,
}

impl BrokerError {
    /// Unexpected framing or client misuse, as opposed to a network or broker refusal
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, BrokerError::Protocol(_))
    }
}

/// Opens connections to a broker
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    type Connection: BrokerConnection;

    /// Establish a transport-level connection to the endpoint
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Self::Connection, BrokerError>;
}

/// One broker connection
#[async_trait]
pub trait BrokerConnection: Send {
    type Channel: BrokerChannel;
    type Source: MessageSource;

    async fn authenticate(&mut self, username: &str, password: &str) -> Result<(), BrokerError>;

    async fn open_channel(&mut self, channel_id: u16) -> Result<Self::Channel, BrokerError>;

    /// Message source bound to a consumer previously registered on one of this
    /// connection's channels
    async fn queue(&mut self, consumer_tag: &str) -> Result<Self::Source, BrokerError>;

    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// A channel within a broker connection
#[async_trait]
pub trait BrokerChannel: Send {
    async fn declare_queue(
        &mut self,
        queue: &str,
        options: QueueOptions,
    ) -> Result<(), BrokerError>;

    async fn consume(
        &mut self,
        queue: &str,
        consumer_tag: &str,
        options: ConsumeOptions,
    ) -> Result<(), BrokerError>;

    async fn cancel_consumer(&mut self, consumer_tag: &str) -> Result<(), BrokerError>;

    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Stream of delivered messages
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next message. A closed stream is `BrokerError::Disconnected`.
    async fn receive(&mut self) -> Result<RawMessage, BrokerError>;
}

/// Type alias for the production broker client
pub type AmqpConnector = amqp::LapinConnector;
