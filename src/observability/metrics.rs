//! Thread-safe metrics collection
//!
//! Atomic counters for the hot path (messages, events) and a mutex-protected
//! per-device table for the rarer connection bookkeeping.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Per-device connection statistics
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DeviceStats {
    pub connection_attempts: u64,
    pub connection_failures: u64,
    pub messages_received: u64,
    pub decode_failures: u64,
    pub connected: bool,
    pub last_message_at: Option<u64>,
}

pub struct MetricsCollector {
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    active_consumers: AtomicU64,
    messages_received: AtomicU64,
    events_sent: AtomicU64,
    decode_failures: AtomicU64,
    started_at: AtomicU64,
    devices: Mutex<HashMap<String, DeviceStats>>,
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub active_consumers: u64,
    pub messages_received: u64,
    pub events_sent: u64,
    pub decode_failures: u64,
    pub uptime_seconds: u64,
    pub devices: HashMap<String, DeviceStats>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            active_consumers: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            events_sent: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            started_at: AtomicU64::new(current_timestamp()),
            devices: Mutex::new(HashMap::new()),
        }
    }

    fn with_device<F: FnOnce(&mut DeviceStats)>(&self, device_id: &str, update: F) {
        // Poisoned table: skip the update
        if let Ok(mut devices) = self.devices.lock() {
            update(devices.entry(device_id.to_string()).or_default());
        }
    }

    pub fn connection_attempt(&self, device_id: &str) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
        self.with_device(device_id, |stats| stats.connection_attempts += 1);
    }

    pub fn connection_established(&self, device_id: &str) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.active_consumers.fetch_add(1, Ordering::Relaxed);
        self.with_device(device_id, |stats| stats.connected = true);
    }

    pub fn connection_failed(&self, device_id: &str) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.with_device(device_id, |stats| stats.connection_failures += 1);
    }

    /// Consumer stopped after being established, whether lost or cancelled
    pub fn connection_closed(&self, device_id: &str, lost: bool) {
        if lost {
            self.connections_lost.fetch_add(1, Ordering::Relaxed);
        }
        // Saturating: never wrap below zero on a stray double close
        let _ = self
            .active_consumers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        self.with_device(device_id, |stats| stats.connected = false);
    }

    pub fn message_received(&self, device_id: &str) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        let now = current_timestamp();
        self.with_device(device_id, |stats| {
            stats.messages_received += 1;
            stats.last_message_at = Some(now);
        });
    }

    pub fn decode_failure(&self, device_id: &str) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
        self.with_device(device_id, |stats| stats.decode_failures += 1);
    }

    pub fn event_sent(&self) {
        self.events_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        let devices = self
            .devices
            .lock()
            .map(|devices| devices.clone())
            .unwrap_or_default();

        MetricsSnapshot {
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            connections_lost: self.connections_lost.load(Ordering::Relaxed),
            active_consumers: self.active_consumers.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            uptime_seconds: current_timestamp()
                .saturating_sub(self.started_at.load(Ordering::Relaxed)),
            devices,
        }
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
