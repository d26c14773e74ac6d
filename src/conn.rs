//! Connection records and the table that owns them.
//!
//! Readiness events carry the connection's slab key rather than a raw
//! pointer, so a connection dropped before its events drain can never be
//! dereferenced through a stale event. The table hands out
//! `Arc<Mutex<Connection>>` handles; with one-shot readiness at most one
//! worker services a given connection at a time, so the per-connection
//! mutex is uncontended on the hot path.

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use slab::Slab;
use zerocopy::AsBytes;

use crate::wire::{Message, WIRE_SIZE};

/// Stable table index; doubles as the reactor event token.
pub type ConnId = usize;

/// One accepted client socket and its session bookkeeping.
pub struct Connection {
    fd: RawFd,
    peer: SocketAddr,
    client_id: u64,
    last_activity_ns: u64,
    is_active: bool,
    is_authenticated: bool,
}

impl Connection {
    fn new(fd: RawFd, peer: SocketAddr, client_id: u64) -> Self {
        Self {
            fd,
            peer,
            client_id,
            last_activity_ns: monotonic_nanos(),
            is_active: true,
            is_authenticated: false,
        }
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    #[inline]
    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    #[inline]
    pub fn last_activity_ns(&self) -> u64 {
        self.last_activity_ns
    }

    /// Refresh the last-activity timestamp.
    #[inline]
    pub fn touch(&mut self) {
        self.last_activity_ns = monotonic_nanos();
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
    }

    #[inline]
    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.is_authenticated = authenticated;
    }

    /// Write one whole record to the peer. `MSG_NOSIGNAL` keeps a dead peer
    /// from raising SIGPIPE; short writes surface as `WriteZero`.
    pub fn send_record(&self, msg: &Message) -> io::Result<()> {
        let bytes = msg.as_bytes();
        let sent = unsafe {
            libc::send(
                self.fd,
                bytes.as_ptr() as *const libc::c_void,
                bytes.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        if sent as usize != WIRE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "partial record write",
            ));
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Return value intentionally ignored: on Linux, close() after EINTR
        // still closes the fd (retrying causes double-close); EIO means the
        // fd is gone anyway. Neither case is recoverable.
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Owns every live connection. Insert assigns a monotonic client id and
/// records the slab key that readiness events will carry.
pub struct ConnectionTable {
    inner: Mutex<Slab<Arc<Mutex<Connection>>>>,
    next_client_id: AtomicU64,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Slab::new()),
            next_client_id: AtomicU64::new(1),
        }
    }

    /// Register an accepted socket. Returns the table key and the handle.
    pub fn insert(&self, fd: RawFd, peer: SocketAddr) -> (ConnId, Arc<Mutex<Connection>>) {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::new(Mutex::new(Connection::new(fd, peer, client_id)));
        let mut slab = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = slab.insert(conn.clone());
        (id, conn)
    }

    /// O(1) lookup by table key.
    pub fn find(&self, id: ConnId) -> Option<Arc<Mutex<Connection>>> {
        let slab = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        slab.get(id).cloned()
    }

    /// Remove a connection; idempotent. The socket closes when the last
    /// handle drops, after the caller has deregistered it from the reactor.
    pub fn remove(&self, id: ConnId) -> Option<Arc<Mutex<Connection>>> {
        let mut slab = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        slab.try_remove(id)
    }

    pub fn len(&self) -> usize {
        let slab = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        slab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every connection; used by shutdown.
    pub fn drain_all(&self) -> Vec<Arc<Mutex<Connection>>> {
        let mut slab = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let drained = slab.drain().collect();
        drained
    }
}

/// Monotonic clock in nanoseconds, for activity timestamps.
pub fn monotonic_nanos() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}
