//! Mock implementations for testing
//!
//! `MockConnector` is a scripted broker: it records every capability call in
//! order, can fail or hang at any connect-sequence stage, and delivers
//! messages pushed through its feed. `RecordingSink` keeps every event.

use crate::config::DeviceTarget;
use crate::event::{EventRecord, EventSink};
use crate::task::ConnectStage;
use crate::transport::{
    BrokerChannel, BrokerConnection, BrokerConnector, BrokerEndpoint, BrokerError,
    ConsumeOptions, MessageSource, QueueOptions, RawMessage,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// One capability call observed by the mock broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    Connect { host: String, port: u16 },
    Authenticate { username: String },
    OpenChannel(u16),
    DeclareQueue {
        queue: String,
        options: QueueOptions,
    },
    Consume {
        queue: String,
        consumer_tag: String,
        options: ConsumeOptions,
    },
    Queue(String),
    CancelConsumer(String),
    CloseChannel,
    CloseConnection,
}

/// What the mock message source yields next
#[derive(Debug, Clone)]
pub enum ScriptedDelivery {
    Message(RawMessage),
    /// Broker drops the connection with this reason
    Disconnect(String),
}

pub type CallLog = Arc<Mutex<Vec<BrokerCall>>>;

type SharedFeed = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ScriptedDelivery>>>;

#[derive(Debug, Clone, Default)]
struct Script {
    failure: Option<(ConnectStage, BrokerError)>,
    hang: Option<ConnectStage>,
}

impl Script {
    async fn step(&self, stage: ConnectStage) -> Result<(), BrokerError> {
        if self.hang == Some(stage) {
            std::future::pending::<()>().await;
        }
        match &self.failure {
            Some((failing, error)) if *failing == stage => Err(error.clone()),
            _ => Ok(()),
        }
    }
}

fn default_error(stage: ConnectStage) -> BrokerError {
    match stage {
        ConnectStage::Connect => BrokerError::ConnectionFailed("Connection refused".to_string()),
        ConnectStage::Authenticate => {
            BrokerError::AuthenticationFailed("ACCESS_REFUSED".to_string())
        }
        ConnectStage::OpenChannel => BrokerError::ChannelFailed("channel_max reached".to_string()),
        ConnectStage::DeclareQueue => BrokerError::QueueDeclareFailed {
            queue: "events".to_string(),
            reason: "PRECONDITION_FAILED".to_string(),
        },
        ConnectStage::Consume => BrokerError::ConsumeFailed {
            queue: "events".to_string(),
            reason: "NOT_FOUND".to_string(),
        },
        ConnectStage::BindQueue => BrokerError::Protocol("No consumer registered".to_string()),
    }
}

/// Scripted broker for connection task tests
pub struct MockConnector {
    script: Script,
    calls: CallLog,
    feed_tx: mpsc::UnboundedSender<ScriptedDelivery>,
    feed_rx: SharedFeed,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        Self {
            script: Script::default(),
            calls: Arc::new(Mutex::new(Vec::new())),
            feed_tx,
            feed_rx: Arc::new(tokio::sync::Mutex::new(feed_rx)),
        }
    }

    /// Queue messages to be delivered once a consumer is bound
    pub fn with_messages(self, messages: Vec<RawMessage>) -> Self {
        for message in messages {
            let _ = self.feed_tx.send(ScriptedDelivery::Message(message));
        }
        self
    }

    pub fn fail_at(self, stage: ConnectStage) -> Self {
        self.fail_at_with(stage, default_error(stage))
    }

    pub fn fail_at_with(mut self, stage: ConnectStage, error: BrokerError) -> Self {
        self.script.failure = Some((stage, error));
        self
    }

    /// Never complete the given stage
    pub fn hang_at(mut self, stage: ConnectStage) -> Self {
        self.script.hang = Some(stage);
        self
    }

    /// Sender for pushing deliveries while a task is consuming
    pub fn feed(&self) -> mpsc::UnboundedSender<ScriptedDelivery> {
        self.feed_tx.clone()
    }

    pub fn call_log(&self) -> CallLog {
        self.calls.clone()
    }
}

#[async_trait]
impl BrokerConnector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Self::Connection, BrokerError> {
        record(
            &self.calls,
            BrokerCall::Connect {
                host: endpoint.host.clone(),
                port: endpoint.port,
            },
        );
        self.script.step(ConnectStage::Connect).await?;

        Ok(MockConnection {
            script: self.script.clone(),
            calls: self.calls.clone(),
            feed: self.feed_rx.clone(),
        })
    }
}

fn record(calls: &CallLog, call: BrokerCall) {
    calls.lock().unwrap().push(call);
}

pub struct MockConnection {
    script: Script,
    calls: CallLog,
    feed: SharedFeed,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    type Channel = MockChannel;
    type Source = MockMessageSource;

    async fn authenticate(&mut self, username: &str, _password: &str) -> Result<(), BrokerError> {
        record(
            &self.calls,
            BrokerCall::Authenticate {
                username: username.to_string(),
            },
        );
        self.script.step(ConnectStage::Authenticate).await
    }

    async fn open_channel(&mut self, channel_id: u16) -> Result<Self::Channel, BrokerError> {
        record(&self.calls, BrokerCall::OpenChannel(channel_id));
        self.script.step(ConnectStage::OpenChannel).await?;
        Ok(MockChannel {
            script: self.script.clone(),
            calls: self.calls.clone(),
        })
    }

    async fn queue(&mut self, consumer_tag: &str) -> Result<Self::Source, BrokerError> {
        record(&self.calls, BrokerCall::Queue(consumer_tag.to_string()));
        self.script.step(ConnectStage::BindQueue).await?;
        Ok(MockMessageSource {
            feed: self.feed.clone(),
        })
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        record(&self.calls, BrokerCall::CloseConnection);
        Ok(())
    }
}

pub struct MockChannel {
    script: Script,
    calls: CallLog,
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn declare_queue(
        &mut self,
        queue: &str,
        options: QueueOptions,
    ) -> Result<(), BrokerError> {
        record(
            &self.calls,
            BrokerCall::DeclareQueue {
                queue: queue.to_string(),
                options,
            },
        );
        self.script.step(ConnectStage::DeclareQueue).await
    }

    async fn consume(
        &mut self,
        queue: &str,
        consumer_tag: &str,
        options: ConsumeOptions,
    ) -> Result<(), BrokerError> {
        record(
            &self.calls,
            BrokerCall::Consume {
                queue: queue.to_string(),
                consumer_tag: consumer_tag.to_string(),
                options,
            },
        );
        self.script.step(ConnectStage::Consume).await
    }

    async fn cancel_consumer(&mut self, consumer_tag: &str) -> Result<(), BrokerError> {
        record(&self.calls, BrokerCall::CancelConsumer(consumer_tag.to_string()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        record(&self.calls, BrokerCall::CloseChannel);
        Ok(())
    }
}

pub struct MockMessageSource {
    feed: SharedFeed,
}

#[async_trait]
impl MessageSource for MockMessageSource {
    async fn receive(&mut self) -> Result<RawMessage, BrokerError> {
        let mut feed = self.feed.lock().await;
        match feed.recv().await {
            Some(ScriptedDelivery::Message(message)) => Ok(message),
            Some(ScriptedDelivery::Disconnect(reason)) => Err(BrokerError::Disconnected(reason)),
            // The connector keeps a sender alive, so this only happens once it is dropped
            None => Err(BrokerError::Disconnected("Feed closed".to_string())),
        }
    }
}

/// Sink that keeps every event it is given
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EventRecord>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().unwrap().clone()
    }

    pub fn health_events(&self) -> Vec<EventRecord> {
        self.events()
            .into_iter()
            .filter(EventRecord::is_health_event)
            .collect()
    }

    pub fn message_events(&self) -> Vec<EventRecord> {
        self.events()
            .into_iter()
            .filter(|event| !event.is_health_event())
            .collect()
    }

    /// Poll until at least `count` events arrived or `timeout` elapsed
    pub async fn wait_for_events(&self, count: usize, timeout: Duration) -> Vec<EventRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let events = self.events();
            if events.len() >= count || tokio::time::Instant::now() >= deadline {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send_event(&self, event: EventRecord) {
        self.events.lock().unwrap().push(event);
    }
}

/// Device snapshot used across tests
pub fn test_target() -> DeviceTarget {
    DeviceTarget {
        device_id: "broker01".to_string(),
        manage_ip: "127.0.0.1".to_string(),
        queue: "events".to_string(),
        virtual_host: "/".to_string(),
        port: 5672,
        username: "guest".to_string(),
        password: "guest".to_string(),
        interval: Duration::from_secs(300),
    }
}
