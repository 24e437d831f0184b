//! Connection counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for one connection.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Records written to the transport
    pub messages_sent: AtomicU64,
    /// Records decoded from the transport
    pub messages_received: AtomicU64,
    /// Pending entries created by the facade
    pub operations_registered: AtomicU64,
    /// Pending entries resolved by a terminal message
    pub operations_completed: AtomicU64,
    /// Pending entries resolved with a connection failure
    pub operations_failed: AtomicU64,
    /// Tolerated protocol anomalies (logged and dropped)
    pub protocol_anomalies: AtomicU64,
    /// Plugin invocations dispatched to a handler
    pub plugin_invocations_started: AtomicU64,
    /// Plugin invocations whose response was queued
    pub plugin_invocations_completed: AtomicU64,
}

impl ConnectionStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            operations_registered: self.operations_registered.load(Ordering::Relaxed),
            operations_completed: self.operations_completed.load(Ordering::Relaxed),
            operations_failed: self.operations_failed.load(Ordering::Relaxed),
            protocol_anomalies: self.protocol_anomalies.load(Ordering::Relaxed),
            plugin_invocations_started: self.plugin_invocations_started.load(Ordering::Relaxed),
            plugin_invocations_completed: self
                .plugin_invocations_completed
                .load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub operations_registered: u64,
    pub operations_completed: u64,
    pub operations_failed: u64,
    pub protocol_anomalies: u64,
    pub plugin_invocations_started: u64,
    pub plugin_invocations_completed: u64,
}
