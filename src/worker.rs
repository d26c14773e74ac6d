//! Worker threads: accept drain and per-connection service.
//!
//! Every worker independently polls the shared reactor. Listener events run
//! the accept drain; client events resolve the token to a connection and
//! run the service loop. One-shot registrations guarantee a single worker
//! owns a connection from event delivery until re-arm or close.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use tracing::{debug, error, trace, warn};

use crate::buffer_pool::BufferPool;
use crate::config::{MAX_EVENTS, POLL_TIMEOUT_MS, SOCKET_BUF_SIZE};
use crate::conn::{ConnId, ConnectionTable};
use crate::dispatch::{dispatch, DispatchOutcome, HandlerRegistry};
use crate::reactor::{Event, Reactor, LISTENER_TOKEN};
use crate::stats::ServerStats;
use crate::wire::{Message, WIRE_SIZE};

pub struct Worker {
    pub id: usize,
    pub listener_fd: RawFd,
    pub reactor: Arc<Reactor>,
    pub table: Arc<ConnectionTable>,
    pub registry: Arc<HandlerRegistry>,
    pub pool: Arc<BufferPool>,
    pub stats: Arc<ServerStats>,
    pub running: Arc<AtomicBool>,
}

impl Worker {
    pub fn run(self) {
        let mut events: Vec<Event> = Vec::with_capacity(MAX_EVENTS);
        while self.running.load(Ordering::Acquire) {
            match self.reactor.wait(&mut events, POLL_TIMEOUT_MS) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(worker = self.id, error = %e, "reactor wait failed");
                    break;
                }
            }
            for i in 0..events.len() {
                let event = events[i];
                if event.token == LISTENER_TOKEN {
                    self.drain_accepts();
                } else {
                    self.service_connection(event.token as ConnId, event.hangup);
                }
            }
        }
        trace!(worker = self.id, "worker exiting");
    }

    /// Accept until would-block; the listener may be edge-triggered.
    fn drain_accepts(&self) {
        loop {
            let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
            let mut addr_len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            let fd = unsafe {
                libc::accept(
                    self.listener_fd,
                    &mut addr as *mut libc::sockaddr_in as *mut libc::sockaddr,
                    &mut addr_len,
                )
            };
            if fd < 0 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::WouldBlock
                    && self.running.load(Ordering::Acquire)
                {
                    warn!(worker = self.id, error = %err, "accept failed");
                }
                return;
            }

            if let Err(e) = configure_client_socket(fd) {
                warn!(error = %e, "client socket setup failed");
                unsafe {
                    libc::close(fd);
                }
                continue;
            }

            let peer = sockaddr_to_peer(&addr);
            let (id, conn) = self.table.insert(fd, peer);
            let active = self.stats.connection_opened();

            {
                let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
                self.registry.connection_established(&mut guard);
            }

            // Register last: the first readiness event must not observe a
            // connection that has not had its lifecycle callback.
            if let Err(e) = self.reactor.register_client(fd, id as u64) {
                warn!(error = %e, "client registration failed");
                if let Some(conn) = self.table.remove(id) {
                    let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
                    guard.deactivate();
                    self.registry.connection_closed(&mut guard);
                }
                self.stats.connection_closed();
                continue;
            }

            debug!(
                worker = self.id,
                client_id = conn.lock().unwrap_or_else(PoisonError::into_inner).client_id(),
                peer = %peer,
                active,
                "connection accepted"
            );
        }
    }

    /// Drain one connection: receive whole records until would-block.
    ///
    /// A record straddling the kernel buffer is detected by a peek and left
    /// queued until complete, so the stream never desynchronises; the peek
    /// is the `ret < sizeof(Message)` case of the service contract.
    fn service_connection(&self, id: ConnId, hangup: bool) {
        let Some(conn) = self.table.find(id) else {
            return; // already removed; stale event
        };
        let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.is_active() {
            return;
        }
        let fd = guard.fd();

        let mut close = false;
        loop {
            let record = self.pool.next_recv_buffer();
            let available = match peek_len(fd, record) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(client_id = guard.client_id(), error = %e, "recv failed");
                    close = true;
                    break;
                }
            };
            if available == 0 {
                // Peer closed.
                close = true;
                break;
            }
            if available < WIRE_SIZE {
                if hangup {
                    // The tail of the stream can never complete.
                    self.stats.protocol_error();
                    debug!(
                        client_id = guard.client_id(),
                        got = available,
                        need = WIRE_SIZE,
                        "short record at end of stream"
                    );
                    close = true;
                } else {
                    trace!(
                        client_id = guard.client_id(),
                        got = available,
                        "partial record, waiting for the rest"
                    );
                }
                break;
            }

            match consume_record(fd, record) {
                Ok(()) => {}
                Err(e) => {
                    debug!(client_id = guard.client_id(), error = %e, "recv failed");
                    close = true;
                    break;
                }
            }

            match record.validate() {
                Ok(()) => {
                    guard.touch();
                    match dispatch(record, &mut guard, &self.registry, &self.stats) {
                        DispatchOutcome::Processed => {}
                        DispatchOutcome::CloseConnection => {
                            close = true;
                            break;
                        }
                    }
                }
                Err(e) => {
                    self.stats.protocol_error();
                    warn!(
                        client_id = guard.client_id(),
                        error = %e,
                        "malformed record, closing connection"
                    );
                    close = true;
                    break;
                }
            }
        }

        if close || hangup {
            drop(guard);
            self.close_connection(id);
        } else if let Err(e) = self.reactor.rearm_client(fd, id as u64) {
            warn!(client_id = guard.client_id(), error = %e, "rearm failed");
            drop(guard);
            self.close_connection(id);
        }
    }

    /// Deregister, notify handlers, drop the record; idempotent.
    pub fn close_connection(&self, id: ConnId) {
        let Some(conn) = self.table.remove(id) else {
            return;
        };
        let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
        guard.deactivate();
        let _ = self.reactor.deregister(guard.fd());
        self.registry.connection_closed(&mut guard);
        self.stats.connection_closed();
        debug!(
            worker = self.id,
            client_id = guard.client_id(),
            "connection closed"
        );
        // The socket itself closes when the last handle drops.
    }
}

/// Peek at the queued bytes without consuming, up to one record.
fn peek_len(fd: RawFd, record: &mut Message) -> io::Result<usize> {
    let n = unsafe {
        libc::recv(
            fd,
            record as *mut Message as *mut libc::c_void,
            WIRE_SIZE,
            libc::MSG_DONTWAIT | libc::MSG_PEEK,
        )
    };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Consume exactly one record known (from the peek) to be fully queued.
fn consume_record(fd: RawFd, record: &mut Message) -> io::Result<()> {
    let n = unsafe {
        libc::recv(
            fd,
            record as *mut Message as *mut libc::c_void,
            WIRE_SIZE,
            libc::MSG_DONTWAIT,
        )
    };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    if n as usize != WIRE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "record shrank between peek and read",
        ));
    }
    Ok(())
}

/// TCP_NODELAY, SO_KEEPALIVE, 1 MiB socket buffers, non-blocking.
fn configure_client_socket(fd: RawFd) -> io::Result<()> {
    let one: libc::c_int = 1;
    setsockopt(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, &one)?;
    setsockopt(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, &one)?;
    let buf_size = SOCKET_BUF_SIZE as libc::c_int;
    setsockopt(fd, libc::SOL_SOCKET, libc::SO_SNDBUF, &buf_size)?;
    setsockopt(fd, libc::SOL_SOCKET, libc::SO_RCVBUF, &buf_size)?;

    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn setsockopt(fd: RawFd, level: libc::c_int, name: libc::c_int, value: &libc::c_int) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            value as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn sockaddr_to_peer(addr: &libc::sockaddr_in) -> SocketAddr {
    let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
    let port = u16::from_be(addr.sin_port);
    SocketAddr::V4(SocketAddrV4::new(ip, port))
}
