//! Task scheduler
//!
//! Holds one task per device and supervises each on its own tokio task: run,
//! and when an attempt ends, wait the task interval and run again. Shutdown
//! interrupts the waits, asks every task to clean up and joins the
//! supervisors.

use super::state::TaskState;
use super::ScheduledTask;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Drives a set of scheduled tasks
pub struct TaskScheduler {
    tasks: Vec<Arc<dyn ScheduledTask>>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            tasks: Vec::new(),
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    pub fn add_task(&mut self, task: Arc<dyn ScheduledTask>) {
        self.tasks.push(task);
    }

    pub fn tasks(&self) -> &[Arc<dyn ScheduledTask>] {
        &self.tasks
    }

    /// Current state of every task, by name
    pub fn states(&self) -> Vec<(String, TaskState)> {
        self.tasks
            .iter()
            .map(|task| (task.name().to_string(), task.state()))
            .collect()
    }

    pub fn is_started(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Spawn one supervisor per task. Calling twice is a no-op.
    pub fn start(&mut self) {
        if self.is_started() {
            warn!("Scheduler already started");
            return;
        }

        info!(tasks = self.tasks.len(), "Starting task scheduler");
        for task in &self.tasks {
            let task = task.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.handles
                .push(tokio::spawn(Self::supervise(task, shutdown_rx)));
        }
    }

    /// Stop every supervisor and release all broker resources
    pub async fn shutdown(&mut self) {
        info!("Shutting down task scheduler");
        self.shutdown_tx.send_replace(true);

        for task in &self.tasks {
            task.cleanup();
        }

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Task supervisor panicked");
            }
        }
        info!("Task scheduler stopped");
    }

    async fn supervise(task: Arc<dyn ScheduledTask>, shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match task.run().await {
                Ok(()) => info!(task = %task.name(), "Task attempt finished"),
                Err(e) => warn!(
                    task = %task.name(),
                    error = %e,
                    retry_in_secs = task.interval().as_secs(),
                    "Task attempt failed"
                ),
            }

            if !Self::interruptible_sleep(shutdown_rx.clone(), task.interval()).await {
                break;
            }
        }
        info!(task = %task.name(), "Task supervisor stopped");
    }

    /// Sleep for `delay`, returning false early if shutdown is signalled
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
        if *shutdown_rx.borrow_and_update() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            changed = shutdown_rx.changed() => {
                // Closed channel means the scheduler is gone
                changed.is_ok() && !*shutdown_rx.borrow()
            }
        }
    }
}
