//! Impure I/O for the AMQP client, backed by lapin

use super::connection::{build_amqp_uri, flatten_properties, REPLY_SUCCESS};
use crate::transport::{
    BrokerChannel, BrokerConnection, BrokerConnector, BrokerEndpoint, BrokerError,
    ConsumeOptions, MessageSource, QueueOptions, RawMessage,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{BasicCancelOptions, BasicConsumeOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn, Instrument};

/// Consumers registered on a connection's channels, keyed by consumer tag
type ConsumerTable = Arc<Mutex<HashMap<String, Consumer>>>;

/// Opens lapin-backed AMQP connections
#[derive(Debug, Clone)]
pub struct LapinConnector {
    connect_timeout: Duration,
}

impl LapinConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for LapinConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl BrokerConnector for LapinConnector {
    type Connection = LapinConnection;

    /// Verifies the endpoint accepts TCP connections. The AMQP handshake
    /// itself carries the credentials, so it happens in `authenticate`.
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Self::Connection, BrokerError> {
        let address = (endpoint.host.as_str(), endpoint.port);
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(_probe)) => {
                debug!(host = %endpoint.host, port = endpoint.port, "Broker endpoint reachable");
            }
            Ok(Err(e)) => return Err(BrokerError::ConnectionFailed(e.to_string())),
            Err(_) => return Err(BrokerError::Timeout(self.connect_timeout)),
        }

        Ok(LapinConnection {
            endpoint: endpoint.clone(),
            connect_timeout: self.connect_timeout,
            connection: None,
            consumers: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

pub struct LapinConnection {
    endpoint: BrokerEndpoint,
    connect_timeout: Duration,
    connection: Option<Connection>,
    consumers: ConsumerTable,
}

impl LapinConnection {
    fn connection(&self) -> Result<&Connection, BrokerError> {
        self.connection.as_ref().ok_or(BrokerError::NotConnected)
    }
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    type Channel = LapinChannel;
    type Source = LapinMessageSource;

    async fn authenticate(&mut self, username: &str, password: &str) -> Result<(), BrokerError> {
        let uri = build_amqp_uri(&self.endpoint, username, password);
        let span = crate::amqp_span!(
            operation = "handshake",
            host = %self.endpoint.host,
            vhost = %self.endpoint.virtual_host
        );
        let handshake =
            Connection::connect_uri(uri, ConnectionProperties::default()).instrument(span);

        let connection = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| BrokerError::Timeout(self.connect_timeout))?
            .map_err(|e| BrokerError::AuthenticationFailed(e.to_string()))?;

        self.connection = Some(connection);
        Ok(())
    }

    async fn open_channel(&mut self, channel_id: u16) -> Result<Self::Channel, BrokerError> {
        // lapin allocates channel ids itself
        let channel = self
            .connection()?
            .create_channel()
            .await
            .map_err(|e| BrokerError::ChannelFailed(e.to_string()))?;

        debug!(
            requested = channel_id,
            allocated = channel.id(),
            "AMQP channel opened"
        );

        Ok(LapinChannel {
            channel,
            consumers: self.consumers.clone(),
        })
    }

    async fn queue(&mut self, consumer_tag: &str) -> Result<Self::Source, BrokerError> {
        self.consumers
            .lock()
            .await
            .remove(consumer_tag)
            .map(|consumer| LapinMessageSource { consumer })
            .ok_or_else(|| {
                BrokerError::Protocol(format!("No consumer registered for tag {consumer_tag}"))
            })
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.consumers.lock().await.clear();

        if let Some(connection) = self.connection.take() {
            connection
                .close(REPLY_SUCCESS, "OK")
                .await
                .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;
        }
        Ok(())
    }
}

pub struct LapinChannel {
    channel: Channel,
    consumers: ConsumerTable,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn declare_queue(
        &mut self,
        queue: &str,
        options: QueueOptions,
    ) -> Result<(), BrokerError> {
        let declare_options = QueueDeclareOptions {
            durable: options.durable,
            exclusive: options.exclusive,
            auto_delete: options.auto_delete,
            ..Default::default()
        };

        self.channel
            .queue_declare(queue, declare_options, FieldTable::default())
            .await
            .map_err(|e| BrokerError::QueueDeclareFailed {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn consume(
        &mut self,
        queue: &str,
        consumer_tag: &str,
        options: ConsumeOptions,
    ) -> Result<(), BrokerError> {
        let consume_options = BasicConsumeOptions {
            no_ack: options.no_ack,
            ..Default::default()
        };

        let consumer = self
            .channel
            .basic_consume(queue, consumer_tag, consume_options, FieldTable::default())
            .await
            .map_err(|e| BrokerError::ConsumeFailed {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        if self
            .consumers
            .lock()
            .await
            .insert(consumer_tag.to_string(), consumer)
            .is_some()
        {
            warn!(consumer_tag = %consumer_tag, "Replaced existing consumer with the same tag");
        }
        Ok(())
    }

    async fn cancel_consumer(&mut self, consumer_tag: &str) -> Result<(), BrokerError> {
        self.consumers.lock().await.remove(consumer_tag);
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|e| BrokerError::ChannelFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.channel
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|e| BrokerError::ChannelFailed(e.to_string()))
    }
}

pub struct LapinMessageSource {
    consumer: Consumer,
}

#[async_trait]
impl MessageSource for LapinMessageSource {
    async fn receive(&mut self) -> Result<RawMessage, BrokerError> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => Ok(RawMessage::new(
                flatten_properties(&delivery.properties),
                delivery.data,
            )),
            Some(Err(e)) => Err(BrokerError::Disconnected(e.to_string())),
            None => Err(BrokerError::Disconnected(
                "Consumer stream closed by broker".to_string(),
            )),
        }
    }
}
