//! Server metrics collection.
//!
//! In-memory counters only. Nothing here identifies clients or destinations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::proxy::{Direction, RelayEnd, RelayOutcome};

/// Server metrics collector.
pub struct ServerMetrics {
    /// Server start time
    start_time: Instant,
    /// Total connections accepted
    total_connections: AtomicU64,
    /// Connections that completed the handshake
    established: AtomicU64,
    /// Handshakes that failed
    handshake_failures: AtomicU64,
    /// Relay directions currently running
    active_relays: AtomicU64,
    /// Relay directions that ended on an error or without data
    relay_faults: AtomicU64,
    /// Bytes copied client to target
    bytes_upstream: AtomicU64,
    /// Bytes copied target to client
    bytes_downstream: AtomicU64,
}

impl ServerMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_connections: AtomicU64::new(0),
            established: AtomicU64::new(0),
            handshake_failures: AtomicU64::new(0),
            active_relays: AtomicU64::new(0),
            relay_faults: AtomicU64::new(0),
            bytes_upstream: AtomicU64::new(0),
            bytes_downstream: AtomicU64::new(0),
        }
    }

    /// Count an accepted client connection.
    pub fn increment_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a handshake that reached the relay phase.
    pub fn increment_established(&self) {
        self.established.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a handshake that failed or timed out.
    pub fn increment_handshake_failures(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Account a relay direction handed to the relay pool.
    pub fn relay_started(&self) {
        self.active_relays.fetch_add(1, Ordering::Relaxed);
    }

    /// Account a finished relay direction.
    pub fn relay_finished(&self, outcome: &RelayOutcome) {
        self.active_relays.fetch_sub(1, Ordering::Relaxed);
        match outcome.direction {
            Direction::ClientToTarget => {
                self.bytes_upstream.fetch_add(outcome.bytes, Ordering::Relaxed)
            }
            Direction::TargetToClient => {
                self.bytes_downstream.fetch_add(outcome.bytes, Ordering::Relaxed)
            }
        };
        if matches!(outcome.end, RelayEnd::Error(_) | RelayEnd::Empty) {
            self.relay_faults.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Connections accepted so far.
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    /// Handshakes completed so far.
    pub fn established(&self) -> u64 {
        self.established.load(Ordering::Relaxed)
    }

    /// Handshakes that did not complete.
    pub fn handshake_failures(&self) -> u64 {
        self.handshake_failures.load(Ordering::Relaxed)
    }

    /// Relay directions currently running.
    pub fn active_relays(&self) -> u64 {
        self.active_relays.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            total_connections: self.total_connections(),
            established: self.established(),
            handshake_failures: self.handshake_failures(),
            active_relays: self.active_relays(),
            relay_faults: self.relay_faults.load(Ordering::Relaxed),
            bytes_upstream: self.bytes_upstream.load(Ordering::Relaxed),
            bytes_downstream: self.bytes_downstream.load(Ordering::Relaxed),
        }
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub total_connections: u64,
    pub established: u64,
    pub handshake_failures: u64,
    pub active_relays: u64,
    pub relay_faults: u64,
    pub bytes_upstream: u64,
    pub bytes_downstream: u64,
}

impl MetricsSnapshot {
    /// Share of accepted connections that reached the relay phase.
    pub fn success_rate(&self) -> f64 {
        if self.total_connections == 0 {
            0.0
        } else {
            self.established as f64 / self.total_connections as f64
        }
    }
}
