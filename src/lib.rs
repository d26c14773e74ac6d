//! Library crate for tickgate: wire codec, buffer pools, lock-free ring,
//! connection table, epoll reactor, dispatcher and server lifecycle.
//!
//! The **binary** (`main.rs`) wires the pieces together: it installs the
//! signal flag, registers the built-in handlers and runs the stats loop.
//! Everything here is testable without a live socket except `worker`, which
//! the integration tests drive through a real server on an ephemeral port.

pub mod buffer_pool;
pub mod config;
pub mod conn;
pub mod dispatch;
pub mod handlers;
pub mod reactor;
pub mod ring;
pub mod server;
pub mod stats;
pub mod wire;
pub mod worker;
