//! Server statistics: atomic counters plus an EMA of dispatch latency.
//!
//! Everything on the hot path is a relaxed atomic; the only read-modify-write
//! that is not naturally atomic (the floating-point EMA) runs in a
//! compare-exchange loop over the f64 bit pattern, never under a lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

/// EMA smoothing factor for `avg_latency_us`.
const EMA_ALPHA: f64 = 0.01;

#[derive(Default)]
pub struct ServerStats {
    total_messages: AtomicU64,
    active_connections: AtomicU64,
    peak_connections: AtomicU64,
    total_connections: AtomicU64,
    protocol_errors: AtomicU64,
    total_latency_ns: AtomicU64,
    latency_count: AtomicU64,
    /// f64 bit pattern of the EMA, in microseconds.
    avg_latency_us_bits: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub total_messages: u64,
    pub active_connections: u64,
    pub peak_connections: u64,
    pub total_connections: u64,
    pub protocol_errors: u64,
    pub total_latency_ns: u64,
    pub latency_count: u64,
    pub avg_latency_us: f64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one dispatched message and its handling latency.
    pub fn record_message(&self, latency_ns: u64) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns.fetch_add(latency_ns, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);

        let sample_us = latency_ns as f64 / 1_000.0;
        let mut prev = self.avg_latency_us_bits.load(Ordering::Relaxed);
        loop {
            let next = EMA_ALPHA * sample_us + (1.0 - EMA_ALPHA) * f64::from_bits(prev);
            match self.avg_latency_us_bits.compare_exchange_weak(
                prev,
                next.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => prev = observed,
            }
        }
    }

    /// Count a connection as opened and return the new active count.
    pub fn connection_opened(&self) -> u64 {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        let active = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        let mut peak = self.peak_connections.load(Ordering::Relaxed);
        while active > peak {
            match self.peak_connections.compare_exchange_weak(
                peak,
                active,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => peak = observed,
            }
        }
        active
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn peak_connections(&self) -> u64 {
        self.peak_connections.load(Ordering::Relaxed)
    }

    /// EMA of per-message handling latency, microseconds.
    pub fn avg_latency_us(&self) -> f64 {
        f64::from_bits(self.avg_latency_us_bits.load(Ordering::Relaxed))
    }

    /// Lifetime mean latency in microseconds, from the accumulated totals.
    pub fn mean_latency_us(&self) -> f64 {
        let count = self.latency_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.total_latency_ns.load(Ordering::Relaxed) as f64 / count as f64 / 1_000.0
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_messages: self.total_messages.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            peak_connections: self.peak_connections.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            total_latency_ns: self.total_latency_ns.load(Ordering::Relaxed),
            latency_count: self.latency_count.load(Ordering::Relaxed),
            avg_latency_us: self.avg_latency_us(),
        }
    }
}

/// Spawn a thread that logs a snapshot line every `interval` until `running`
/// clears. Joins within one second of shutdown.
pub fn spawn_reporter(
    stats: Arc<ServerStats>,
    running: Arc<AtomicBool>,
    interval: Duration,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("stats-reporter".into())
        .spawn(move || {
            let mut last = stats.snapshot();
            let mut elapsed = Duration::ZERO;
            while running.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_secs(1));
                elapsed += Duration::from_secs(1);
                if elapsed < interval {
                    continue;
                }
                elapsed = Duration::ZERO;
                let snap = stats.snapshot();
                info!(
                    messages = snap.total_messages,
                    delta = snap.total_messages.saturating_sub(last.total_messages),
                    active = snap.active_connections,
                    peak = snap.peak_connections,
                    protocol_errors = snap.protocol_errors,
                    avg_latency_us = format_args!("{:.2}", snap.avg_latency_us),
                    "stats"
                );
                last = snap;
            }
        })
        .expect("failed to spawn stats reporter")
}
