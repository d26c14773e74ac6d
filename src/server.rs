//! Server facade: initialize → start → stop.
//!
//! The server is a single owned value constructed by the entry point; signal
//! handlers reach it through an atomic flag polled by the caller, never
//! through process-wide mutable state.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::thread::JoinHandle;

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::buffer_pool::BufferPool;
use crate::config::{BUFFER_POOL_CAPACITY, LISTEN_BACKLOG, MAX_WORKER_THREADS};
use crate::conn::ConnectionTable;
use crate::dispatch::HandlerRegistry;
use crate::reactor::Reactor;
use crate::stats::ServerStats;
use crate::worker::Worker;

/// Initialisation failure. Partial resources are released before the error
/// surfaces: the listener and reactor close on drop.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("failed to listen on {addr}: {source}")]
    Listen { addr: SocketAddr, source: io::Error },
    #[error("reactor setup failed: {0}")]
    Reactor(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initialized,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: Ipv4Addr::LOCALHOST,
            port: 8888,
            threads: 4,
        }
    }
}

pub struct Server {
    config: ServerConfig,
    listener: Option<Socket>,
    local_addr: SocketAddr,
    reactor: Arc<Reactor>,
    table: Arc<ConnectionTable>,
    registry: Arc<HandlerRegistry>,
    pool: Arc<BufferPool>,
    stats: Arc<ServerStats>,
    running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    state: State,
}

impl Server {
    /// Create the listening socket, bind, listen, create the reactor and
    /// register the listener. Port 0 binds an OS-assigned port (reported by
    /// [`local_addr`](Self::local_addr)); the CLI front end rejects it.
    pub fn initialize(config: ServerConfig) -> Result<Self, ServerError> {
        if config.threads == 0 || config.threads > MAX_WORKER_THREADS {
            return Err(ServerError::Config(format!(
                "thread count must be 1..={MAX_WORKER_THREADS}, got {}",
                config.threads
            )));
        }

        let addr = SocketAddr::V4(SocketAddrV4::new(config.ip, config.port));
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(|source| ServerError::Bind { addr, source })?;
        socket
            .set_reuse_address(true)
            .map_err(|source| ServerError::Bind { addr, source })?;
        socket
            .set_nonblocking(true)
            .map_err(|source| ServerError::Bind { addr, source })?;
        socket
            .bind(&addr.into())
            .map_err(|source| ServerError::Bind { addr, source })?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|source| ServerError::Listen { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| ServerError::Listen { addr, source })?
            .as_socket()
            .ok_or_else(|| ServerError::Config("listener address is not inet".into()))?;

        let reactor = Reactor::new().map_err(ServerError::Reactor)?;
        reactor
            .register_listener(socket.as_raw_fd())
            .map_err(ServerError::Reactor)?;

        info!(addr = %local_addr, threads = config.threads, "server initialized");

        Ok(Self {
            config,
            listener: Some(socket),
            local_addr,
            reactor: Arc::new(reactor),
            table: Arc::new(ConnectionTable::new()),
            registry: Arc::new(HandlerRegistry::new()),
            pool: Arc::new(BufferPool::new(BUFFER_POOL_CAPACITY)),
            stats: Arc::new(ServerStats::new()),
            running: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            state: State::Initialized,
        })
    }

    /// Spawn the worker pool. Idempotent; a stopped server does not restart.
    pub fn start(&mut self) {
        match self.state {
            State::Running => return,
            State::Stopped => {
                warn!("start ignored: server already stopped");
                return;
            }
            State::Initialized => {}
        }
        let Some(listener) = &self.listener else {
            return;
        };
        let listener_fd = listener.as_raw_fd();

        self.running.store(true, Ordering::Release);
        for i in 0..self.config.threads {
            let worker = Worker {
                id: i,
                listener_fd,
                reactor: self.reactor.clone(),
                table: self.table.clone(),
                registry: self.registry.clone(),
                pool: self.pool.clone(),
                stats: self.stats.clone(),
                running: self.running.clone(),
            };
            let handle = std::thread::Builder::new()
                .name(format!("worker-{i}"))
                .spawn(move || worker.run())
                .expect("failed to spawn worker thread");
            self.workers.push(handle);
        }
        self.state = State::Running;
        info!(threads = self.config.threads, "server started");
    }

    /// Clear the running flag, close the listener, join the workers and
    /// drop every connection. Idempotent and reentrant-safe; also invoked
    /// from `Drop`.
    pub fn stop(&mut self) {
        if self.state == State::Stopped {
            return;
        }
        self.running.store(false, Ordering::Release);

        // Closing the listener unblocks any accept path.
        self.listener = None;

        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }

        for conn in self.table.drain_all() {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            guard.deactivate();
            let _ = self.reactor.deregister(guard.fd());
            self.registry.connection_closed(&mut guard);
            self.stats.connection_closed();
            debug!(client_id = guard.client_id(), "connection dropped on shutdown");
        }

        self.state = State::Stopped;
        info!("server stopped");
        // The reactor's epoll fd closes when the server value drops; the
        // workers that shared it are already joined.
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Actual bound address, useful when the port was OS-assigned.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    pub fn registry(&self) -> Arc<HandlerRegistry> {
        self.registry.clone()
    }

    pub fn buffer_pool(&self) -> Arc<BufferPool> {
        self.pool.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.table.len()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServerConfig {
        ServerConfig {
            ip: Ipv4Addr::LOCALHOST,
            port: 0,
            threads: 2,
        }
    }

    #[test]
    fn initialize_reports_bound_address() {
        let server = Server::initialize(test_config()).unwrap();
        let addr = server.local_addr();
        assert_eq!(addr.ip(), Ipv4Addr::LOCALHOST);
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn initialize_rejects_zero_threads() {
        let config = ServerConfig {
            threads: 0,
            ..test_config()
        };
        assert!(matches!(
            Server::initialize(config),
            Err(ServerError::Config(_))
        ));
    }

    #[test]
    fn initialize_rejects_excess_threads() {
        let config = ServerConfig {
            threads: MAX_WORKER_THREADS + 1,
            ..test_config()
        };
        assert!(matches!(
            Server::initialize(config),
            Err(ServerError::Config(_))
        ));
    }

    #[test]
    fn bind_conflict_surfaces_as_bind_error() {
        let first = Server::initialize(test_config()).unwrap();
        let taken = match first.local_addr() {
            SocketAddr::V4(v4) => v4,
            other => panic!("unexpected addr {other}"),
        };
        // SO_REUSEADDR does not allow binding over a live listener.
        let config = ServerConfig {
            port: taken.port(),
            ..test_config()
        };
        match Server::initialize(config) {
            Err(ServerError::Bind { .. }) => {}
            Err(e) => panic!("expected bind error, got {e}"),
            Ok(_) => panic!("expected bind error, got a server"),
        }
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut server = Server::initialize(test_config()).unwrap();
        server.start();
        assert!(server.is_running());
        server.start(); // no-op
        server.stop();
        assert!(!server.is_running());
        server.stop(); // no-op
        server.start(); // stopped servers stay stopped
        assert!(!server.is_running());
    }

    #[test]
    fn stop_without_start_is_safe() {
        let mut server = Server::initialize(test_config()).unwrap();
        server.stop();
        assert!(!server.is_running());
    }
}
