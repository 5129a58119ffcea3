//! Test helpers and utilities for integration tests

use std::sync::Arc;
use std::time::Duration;
use zenamqp::config::DeviceTarget;
use zenamqp::task::{ConnectionTask, TaskState};
use zenamqp::testing::mocks::{test_target, MockConnector, RecordingSink};

/// Upper bound for anything a test waits on
#[allow(dead_code)]
pub const WAIT: Duration = Duration::from_secs(2);

/// Target with a short retry interval for scheduler tests
#[allow(dead_code)]
pub fn fast_target(device_id: &str) -> DeviceTarget {
    DeviceTarget {
        device_id: device_id.to_string(),
        interval: Duration::from_millis(20),
        ..test_target()
    }
}

#[allow(dead_code)]
pub fn build_task(
    connector: MockConnector,
) -> (Arc<ConnectionTask<MockConnector>>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let task = ConnectionTask::new(test_target(), Arc::new(connector), sink.clone());
    (Arc::new(task), sink)
}

/// Wait until the task reports `expected`, panicking after `WAIT`
#[allow(dead_code)]
pub async fn wait_for_state(task: &ConnectionTask<MockConnector>, expected: TaskState) {
    let mut states = task.subscribe_state();
    let reached = tokio::time::timeout(WAIT, states.wait_for(|state| *state == expected))
        .await
        .map(|changed| changed.is_ok())
        .unwrap_or(false);
    assert!(
        reached,
        "task never reached {expected}, last state {}",
        task.state()
    );
}
