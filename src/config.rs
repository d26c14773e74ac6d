//! Server sizing and operational constants.
//!
//! Wire-layout constants live in `wire`; everything here is server tuning.

use crate::wire::WIRE_SIZE;

/// Hard cap on worker threads; keeps the buffer-pool in-flight window
/// trivially within capacity.
pub const MAX_WORKER_THREADS: usize = 64;

/// Events fetched per `epoll_wait` call, per worker.
pub const MAX_EVENTS: usize = 1024;

/// Poll timeout. Bounds worst-case shutdown latency to one poll interval.
pub const POLL_TIMEOUT_MS: i32 = 1;

/// Listen backlog.
pub const LISTEN_BACKLOG: i32 = 1024;

/// SO_SNDBUF / SO_RCVBUF for client sockets.
pub const SOCKET_BUF_SIZE: usize = 1 << 20;

/// Record slots per direction in the buffer pool.
/// CRITICAL: in-flight slots must never exceed this; each worker holds at
/// most one receive slot and a few send slots at a time.
pub const BUFFER_POOL_CAPACITY: usize = 1024;

/// Capacity of the dispatch handoff ring (reserved for asynchronous
/// dispatch). Must be a power of two.
pub const DISPATCH_RING_CAPACITY: usize = 65536;

/// Seconds between stats reporter lines.
pub const STATS_REPORT_INTERVAL_SECS: u64 = 5;

// Compile-time sanity checks
const _: () = assert!(
    BUFFER_POOL_CAPACITY >= MAX_WORKER_THREADS * 4,
    "buffer pool too small for the worst-case in-flight window"
);
const _: () = assert!(
    DISPATCH_RING_CAPACITY.is_power_of_two(),
    "dispatch ring capacity must be a power of two"
);
const _: () = assert!(
    SOCKET_BUF_SIZE >= WIRE_SIZE * 64,
    "socket buffers must hold a burst of whole records"
);
