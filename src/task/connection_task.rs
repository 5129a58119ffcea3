//! Per-device connection task
//!
//! One task owns one broker connection and one channel for the lifetime of a
//! `run()` call:
//!
//! ```text
//! Idle -> Waiting -> Connecting -> Running -> Cancelled   (cleanup)
//!                        |            |
//!                        +------------+------> Failed     (any broker error)
//! ```
//!
//! Connectivity changes are reported to the event sink as health events;
//! every delivered message becomes exactly one event record.

use super::state::{TaskState, TaskStateHolder};
use super::{ConnectStage, ScheduledTask, TaskError};
use crate::config::DeviceTarget;
use crate::error::sanitize_error_message;
use crate::event::{EventSink, HealthEvent, MessageNormalizer, COLLECTOR_NAME};
use crate::observability::metrics::metrics;
use crate::transport::{
    BrokerChannel, BrokerConnection, BrokerConnector, BrokerError, ConsumeOptions,
    MessageSource, QueueOptions,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

/// Channel number requested for the consumer channel
pub const CONSUMER_CHANNEL_ID: u16 = 1;

/// Default consumer tag
pub const DEFAULT_CONSUMER_TAG: &str = "zenoss";

/// Everything opened by a successful connect sequence
struct Session<C: BrokerConnection> {
    connection: C,
    channel: C::Channel,
    source: C::Source,
}

impl<C: BrokerConnection> Session<C> {
    /// Cancel consumer, close channel, close connection. Errors are logged, never raised.
    async fn close(mut self, consumer_tag: &str, device_id: &str) {
        drop(self.source);

        if let Err(e) = self.channel.cancel_consumer(consumer_tag).await {
            debug!(device_id = %device_id, error = %e, "Consumer cancel failed during close");
        }
        if let Err(e) = self.channel.close().await {
            debug!(device_id = %device_id, error = %e, "Channel close failed during close");
        }
        if let Err(e) = self.connection.close().await {
            debug!(device_id = %device_id, error = %e, "Connection close failed during close");
        }
    }
}

/// Resolves once shutdown has been requested
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            // Sender gone: nobody can request shutdown any more
            std::future::pending::<()>().await;
        }
    }
}

/// Consumes one device's queue and forwards normalized events
pub struct ConnectionTask<C: BrokerConnector> {
    name: String,
    target: DeviceTarget,
    agent: String,
    consumer_tag: String,
    connector: Arc<C>,
    sink: Arc<dyn EventSink>,
    normalizer: MessageNormalizer,
    state: TaskStateHolder,
    shutdown_tx: watch::Sender<bool>,
}

impl<C: BrokerConnector> ConnectionTask<C> {
    /// Create a task with the sink injected
    pub fn new(target: DeviceTarget, connector: Arc<C>, sink: Arc<dyn EventSink>) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let normalizer =
            MessageNormalizer::new(&target.device_id, COLLECTOR_NAME, &target.username);

        Self {
            name: target.device_id.clone(),
            target,
            agent: COLLECTOR_NAME.to_string(),
            consumer_tag: DEFAULT_CONSUMER_TAG.to_string(),
            connector,
            sink,
            normalizer,
            state: TaskStateHolder::new(),
            shutdown_tx,
        }
    }

    /// Agent name stamped on events
    pub fn with_agent(mut self, agent: &str) -> Self {
        self.agent = agent.to_string();
        self.normalizer =
            MessageNormalizer::new(&self.target.device_id, agent, &self.target.username);
        self
    }

    pub fn with_consumer_tag(mut self, consumer_tag: &str) -> Self {
        self.consumer_tag = consumer_tag.to_string();
        self
    }

    pub fn target(&self) -> &DeviceTarget {
        &self.target
    }

    pub fn device_id(&self) -> &str {
        &self.target.device_id
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    /// Run one attempt: connect, then consume until cleanup or failure
    pub async fn run(&self) -> Result<(), TaskError> {
        let span = crate::task_span!(
            device_id = %self.target.device_id,
            queue = %self.target.queue
        );
        self.run_attempt().instrument(span).await
    }

    async fn run_attempt(&self) -> Result<(), TaskError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        if *shutdown_rx.borrow_and_update() {
            debug!("Cleanup already requested, not connecting");
            if !self.state.get().is_active() {
                self.state.set(TaskState::Cancelled);
            }
            return Ok(());
        }

        if !self.state.begin() {
            return Err(TaskError::AlreadyRunning(self.name.clone()));
        }

        debug!(
            "Connecting to {} ({})",
            self.target.device_id, self.target.manage_ip
        );
        metrics().connection_attempt(&self.target.device_id);
        self.state.set(TaskState::Connecting);

        let mut session = match self.establish(&mut shutdown_rx).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                info!("Cleanup requested while connecting, abandoning attempt");
                self.state.set(TaskState::Cancelled);
                return Ok(());
            }
            Err(e) => {
                self.report_failure(&e, false).await;
                return Err(e);
            }
        };

        self.sink
            .send_event(HealthEvent::connected(
                &self.target.device_id,
                &self.target.queue,
                &self.agent,
            ))
            .await;
        metrics().connection_established(&self.target.device_id);
        self.state.set(TaskState::Running);
        info!(
            consumer_tag = %self.consumer_tag,
            "Consuming from AMQP queue {}", self.target.queue
        );

        let outcome = self.consume(&mut session.source, &mut shutdown_rx).await;
        session.close(&self.consumer_tag, &self.target.device_id).await;

        match outcome {
            Ok(()) => {
                metrics().connection_closed(&self.target.device_id, false);
                self.state.set(TaskState::Cancelled);
                info!("Consumer stopped by cleanup request");
                Ok(())
            }
            Err(e) => {
                metrics().connection_closed(&self.target.device_id, true);
                let err = TaskError::Disconnected(e);
                self.report_failure(&err, true).await;
                Err(err)
            }
        }
    }

    /// The connect sequence, abandoned if cleanup is requested midway. Once the
    /// connection is open, any failure or cancellation closes it again.
    async fn establish(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<Option<Session<C::Connection>>, TaskError> {
        let endpoint = self.target.endpoint();
        let connected = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown_rx) => return Ok(None),
            connected = self.connector.connect(&endpoint) => connected,
        };
        let mut connection = connected.map_err(|e| TaskError::at(ConnectStage::Connect, e))?;

        let opened = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown_rx) => None,
            opened = self.open_consumer(&mut connection) => Some(opened),
        };

        match opened {
            Some(Ok((channel, source))) => Ok(Some(Session {
                connection,
                channel,
                source,
            })),
            Some(Err(e)) => {
                Self::close_connection(&mut connection).await;
                Err(e)
            }
            None => {
                Self::close_connection(&mut connection).await;
                Ok(None)
            }
        }
    }

    async fn close_connection(connection: &mut C::Connection) {
        if let Err(e) = connection.close().await {
            debug!(error = %e, "Connection close after abandoned setup failed");
        }
    }

    #[allow(clippy::type_complexity)]
    async fn open_consumer(
        &self,
        connection: &mut C::Connection,
    ) -> Result<
        (
            <C::Connection as BrokerConnection>::Channel,
            <C::Connection as BrokerConnection>::Source,
        ),
        TaskError,
    > {
        connection
            .authenticate(&self.target.username, &self.target.password)
            .await
            .map_err(|e| TaskError::at(ConnectStage::Authenticate, e))?;

        let mut channel = connection
            .open_channel(CONSUMER_CHANNEL_ID)
            .await
            .map_err(|e| TaskError::at(ConnectStage::OpenChannel, e))?;

        channel
            .declare_queue(&self.target.queue, QueueOptions::durable())
            .await
            .map_err(|e| TaskError::at(ConnectStage::DeclareQueue, e))?;

        channel
            .consume(&self.target.queue, &self.consumer_tag, ConsumeOptions::no_ack())
            .await
            .map_err(|e| TaskError::at(ConnectStage::Consume, e))?;

        let source = connection
            .queue(&self.consumer_tag)
            .await
            .map_err(|e| TaskError::at(ConnectStage::BindQueue, e))?;

        Ok((channel, source))
    }

    /// Receive loop. Returns Ok on cleanup, Err when the broker side goes away.
    async fn consume<S: MessageSource>(
        &self,
        source: &mut S,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), BrokerError> {
        let device_id = &self.target.device_id;

        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown_rx) => return Ok(()),
                received = source.receive() => received?,
            };
            metrics().message_received(device_id);

            let record = match self.normalizer.normalize(&message) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        error = %e,
                        content_type = message.content_type().unwrap_or(""),
                        "Failed to normalize message, forwarding degraded event"
                    );
                    metrics().decode_failure(device_id);
                    self.normalizer.degraded(&message, &self.target.queue, &e)
                }
            };

            // A sink that applies backpressure must not hold up cleanup
            tokio::select! {
                biased;
                _ = shutdown_requested(shutdown_rx) => return Ok(()),
                _ = self.sink.send_event(record) => metrics().event_sent(),
            }
        }
    }

    async fn report_failure(&self, err: &TaskError, was_connected: bool) {
        let detail = sanitize_error_message(&err.to_string());
        let event = if was_connected {
            HealthEvent::connection_lost(
                &self.target.device_id,
                &self.target.queue,
                &self.agent,
                &detail,
            )
        } else {
            metrics().connection_failed(&self.target.device_id);
            HealthEvent::connection_failed(
                &self.target.device_id,
                &self.target.queue,
                &self.agent,
                &detail,
            )
        };

        error!("{}", event.summary);
        self.sink.send_event(event).await;
        self.state.set(TaskState::Failed);
    }

    /// Request a stop. The running attempt (if any) cancels its consumer and
    /// closes channel and connection before returning. The request is sticky:
    /// later runs end immediately as cancelled.
    pub fn cleanup(&self) {
        if !self.shutdown_tx.send_replace(true) {
            debug!(device_id = %self.target.device_id, "Cleanup requested");
        }
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.target.interval
    }
}

#[async_trait]
impl<C> ScheduledTask for ConnectionTask<C>
where
    C: BrokerConnector + 'static,
{
    fn name(&self) -> &str {
        ConnectionTask::name(self)
    }

    fn interval(&self) -> Duration {
        ConnectionTask::interval(self)
    }

    fn state(&self) -> TaskState {
        ConnectionTask::state(self)
    }

    async fn run(&self) -> Result<(), TaskError> {
        ConnectionTask::run(self).await
    }

    fn cleanup(&self) {
        ConnectionTask::cleanup(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Severity;
    use crate::testing::mocks::{test_target, MockConnector, RecordingSink};

    fn task(connector: MockConnector, sink: Arc<RecordingSink>) -> ConnectionTask<MockConnector> {
        ConnectionTask::new(test_target(), Arc::new(connector), sink)
    }

    #[test]
    fn test_new_task_is_idle() {
        let task = task(MockConnector::new(), Arc::new(RecordingSink::new()));
        assert_eq!(task.state(), TaskState::Idle);
        assert_eq!(task.name(), "broker01");
        assert_eq!(task.interval(), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_cleanup_before_run_cancels_immediately() {
        let sink = Arc::new(RecordingSink::new());
        let connector = MockConnector::new();
        let calls = connector.call_log();
        let task = task(connector, sink.clone());

        task.cleanup();
        task.run().await.unwrap();

        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(sink.events().is_empty());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_after_cleanup_records_no_attempt() {
        let sink = Arc::new(RecordingSink::new());
        let target = DeviceTarget {
            device_id: "broker-stopped".to_string(),
            ..test_target()
        };
        let task = ConnectionTask::new(target, Arc::new(MockConnector::new()), sink);

        task.cleanup();
        task.run().await.unwrap();

        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(!metrics().get_metrics().devices.contains_key("broker-stopped"));
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error_event() {
        let sink = Arc::new(RecordingSink::new());
        let task = task(
            MockConnector::new().fail_at(ConnectStage::Connect),
            sink.clone(),
        );

        let err = task.run().await.unwrap_err();

        assert_eq!(err.stage(), Some(ConnectStage::Connect));
        assert_eq!(task.state(), TaskState::Failed);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Error);
        assert!(events[0]
            .summary
            .starts_with("Unable to connect to amqp queue events on broker01:"));
    }

    #[tokio::test]
    async fn test_failure_detail_is_sanitized() {
        let sink = Arc::new(RecordingSink::new());
        let task = task(
            MockConnector::new().fail_at_with(
                ConnectStage::Authenticate,
                BrokerError::AuthenticationFailed("password=guest rejected".to_string()),
            ),
            sink.clone(),
        );

        task.run().await.unwrap_err();

        let summary = &sink.events()[0].summary;
        assert!(summary.contains("password=***"));
        assert!(!summary.contains("password=guest"));
    }
}
