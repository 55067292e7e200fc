//! Observability and Metrics
//!
//! This module provides metrics collection for monitoring the transport:
//! listeners, connections, stream lifecycles and packet throughput.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Global metrics collector for transport operations
#[derive(Debug)]
pub struct Metrics {
    /// Listeners currently accepting connections
    pub listeners_active: AtomicU64,
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Connections whose handler is still running
    pub connections_active: AtomicU64,
    /// Streams currently open
    pub streams_open: AtomicU64,
    /// Total packets decoded from transports
    pub packets_received: AtomicU64,
    /// Total packets encoded to transports
    pub packets_sent: AtomicU64,
    /// Total bytes of decoded packets
    pub bytes_received: AtomicU64,
    /// Total bytes of encoded packets
    pub bytes_sent: AtomicU64,
    /// Streams closed because a decode failed
    pub decode_errors: AtomicU64,
    /// Streams closed because an encode failed
    pub encode_errors: AtomicU64,
    /// Failed accepts, upgrades and PROXY headers
    pub connection_errors: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            listeners_active: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            streams_open: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            encode_errors: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn listener_started(&self) {
        self.listeners_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn listener_stopped(&self) {
        self.listeners_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn stream_opened(&self) {
        self.streams_open.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_closed(&self) {
        self.streams_open.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a packet received
    pub fn packet_received(&self, byte_count: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a packet sent
    pub fn packet_sent(&self, byte_count: u64) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn encode_error(&self) {
        self.encode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            listeners_active: self.listeners_active.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            streams_open: self.streams_open.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            listeners_active = snapshot.listeners_active,
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            streams_open = snapshot.streams_open,
            packets_received = snapshot.packets_received,
            packets_sent = snapshot.packets_sent,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            decode_errors = snapshot.decode_errors,
            encode_errors = snapshot.encode_errors,
            connection_errors = snapshot.connection_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Transport metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub listeners_active: u64,
    pub connections_total: u64,
    pub connections_active: u64,
    pub streams_open: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub decode_errors: u64,
    pub encode_errors: u64,
    pub connection_errors: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}
