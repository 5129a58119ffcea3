//! Per-device connection tasks and the scheduler that drives them

use crate::transport::BrokerError;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod connection_task;
pub mod scheduler;
pub mod state;

pub use connection_task::ConnectionTask;
pub use scheduler::TaskScheduler;
pub use state::{TaskState, TaskStateHolder};

/// Step of the connect sequence, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    Connect,
    Authenticate,
    OpenChannel,
    DeclareQueue,
    Consume,
    BindQueue,
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            ConnectStage::Connect => "connect",
            ConnectStage::Authenticate => "authenticate",
            ConnectStage::OpenChannel => "channel open",
            ConnectStage::DeclareQueue => "queue declare",
            ConnectStage::Consume => "consumer registration",
            ConnectStage::BindQueue => "queue binding",
        };
        f.write_str(stage)
    }
}

/// Why a task attempt ended
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("Connection error during {stage}: {source}")]
    Connection {
        stage: ConnectStage,
        source: BrokerError,
    },

    #[error("Protocol error during {stage}: {source}")]
    Protocol {
        stage: ConnectStage,
        source: BrokerError,
    },

    #[error("Connection lost while consuming: {0}")]
    Disconnected(#[source] BrokerError),

    #[error("Task {0} is already running")]
    AlreadyRunning(String),
}

impl TaskError {
    /// Classify a broker error raised at a connect-sequence stage
    pub fn at(stage: ConnectStage, source: BrokerError) -> Self {
        if source.is_protocol_error() {
            TaskError::Protocol { stage, source }
        } else {
            TaskError::Connection { stage, source }
        }
    }

    /// Stage the failure happened at, if it happened while connecting
    pub fn stage(&self) -> Option<ConnectStage> {
        match self {
            TaskError::Connection { stage, .. } | TaskError::Protocol { stage, .. } => {
                Some(*stage)
            }
            _ => None,
        }
    }
}

/// What a scheduler needs from a unit of work
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn name(&self) -> &str;

    /// Delay between scheduling cycles
    fn interval(&self) -> Duration;

    fn state(&self) -> TaskState;

    /// Run one attempt to completion (cancellation or failure)
    async fn run(&self) -> Result<(), TaskError>;

    /// Request a stop and release broker resources. Idempotent, never fails.
    fn cleanup(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = TaskError::at(
            ConnectStage::Authenticate,
            BrokerError::AuthenticationFailed("ACCESS_REFUSED".to_string()),
        );
        assert!(matches!(err, TaskError::Connection { .. }));
        assert_eq!(err.stage(), Some(ConnectStage::Authenticate));
        assert_eq!(
            err.to_string(),
            "Connection error during authenticate: Authentication failed: ACCESS_REFUSED"
        );

        let err = TaskError::at(
            ConnectStage::BindQueue,
            BrokerError::Protocol("no consumer".to_string()),
        );
        assert!(matches!(err, TaskError::Protocol { .. }));
    }

    #[test]
    fn test_disconnect_has_no_stage() {
        let err = TaskError::Disconnected(BrokerError::Disconnected("reset".to_string()));
        assert_eq!(err.stage(), None);
    }
}
