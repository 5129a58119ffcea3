//! Task lifecycle state and the holder tasks compose it through

use serde::Serialize;
use std::fmt;
use tokio::sync::watch;
use tracing::debug;

/// Lifecycle state of a connection task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Created, never run
    Idle,
    /// Selected by the scheduler, not yet connecting
    Waiting,
    /// Working through the connect sequence
    Connecting,
    /// Consumer registered, receiving messages
    Running,
    /// Last attempt ended in an error
    Failed,
    /// Stopped by a cleanup request
    Cancelled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Idle => "idle",
            TaskState::Waiting => "waiting",
            TaskState::Connecting => "connecting",
            TaskState::Running => "running",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    /// True while a `run()` call is in flight
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskState::Waiting | TaskState::Connecting | TaskState::Running
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state cell: explicit get/set, plus subscription for the scheduler
#[derive(Debug)]
pub struct TaskStateHolder {
    tx: watch::Sender<TaskState>,
}

impl Default for TaskStateHolder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStateHolder {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(TaskState::Idle);
        Self { tx }
    }

    pub fn get(&self) -> TaskState {
        *self.tx.borrow()
    }

    /// Set the state, returning the previous one
    pub fn set(&self, state: TaskState) -> TaskState {
        let previous = self.tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Task state transition");
        }
        previous
    }

    /// Atomically move an inactive task to `Waiting`. Returns false if a run is
    /// already in flight.
    pub fn begin(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_active() {
                false
            } else {
                *state = TaskState::Waiting;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_idle() {
        assert_eq!(TaskStateHolder::new().get(), TaskState::Idle);
    }

    #[test]
    fn test_set_returns_previous() {
        let holder = TaskStateHolder::new();
        assert_eq!(holder.set(TaskState::Connecting), TaskState::Idle);
        assert_eq!(holder.set(TaskState::Running), TaskState::Connecting);
        assert_eq!(holder.get(), TaskState::Running);
    }

    #[test]
    fn test_begin_rejects_active_task() {
        let holder = TaskStateHolder::new();
        assert!(holder.begin());
        assert_eq!(holder.get(), TaskState::Waiting);
        assert!(!holder.begin());

        holder.set(TaskState::Failed);
        assert!(holder.begin());
    }

    #[tokio::test]
    async fn test_subscribers_observe_transitions() {
        let holder = TaskStateHolder::new();
        let mut rx = holder.subscribe();

        holder.set(TaskState::Running);
        rx.changed().await.unwrap();

        assert_eq!(*rx.borrow(), TaskState::Running);
    }

    #[test]
    fn test_active_states() {
        assert!(!TaskState::Idle.is_active());
        assert!(TaskState::Waiting.is_active());
        assert!(TaskState::Connecting.is_active());
        assert!(TaskState::Running.is_active());
        assert!(!TaskState::Failed.is_active());
        assert!(!TaskState::Cancelled.is_active());
    }
}
