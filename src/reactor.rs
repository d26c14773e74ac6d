//! Thin wrapper around the epoll readiness primitive.
//!
//! The listener is registered level-triggered with a sentinel token; client
//! sockets are registered `EPOLLIN | EPOLLET | EPOLLONESHOT` so that after
//! a readiness notification exactly one worker owns the socket until it
//! drains to would-block and re-arms. That one-shot/re-arm cycle is what
//! serialises per-fd access across the worker pool.

use std::io;
use std::os::unix::io::RawFd;

use crate::config::MAX_EVENTS;

/// Event token designating the listening socket.
pub const LISTENER_TOKEN: u64 = u64::MAX;

const CLIENT_INTEREST: u32 = (libc::EPOLLIN | libc::EPOLLRDHUP | libc::EPOLLET | libc::EPOLLONESHOT) as u32;

/// A single readiness notification.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub token: u64,
    /// Peer hung up or the socket errored; drain then close.
    pub hangup: bool,
}

pub struct Reactor {
    epfd: RawFd,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { epfd })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events,
            u64: token,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Register the listening socket, level-triggered.
    pub fn register_listener(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(
            libc::EPOLL_CTL_ADD,
            fd,
            libc::EPOLLIN as u32,
            LISTENER_TOKEN,
        )
    }

    /// Register a client socket: edge-triggered, one-shot.
    pub fn register_client(&self, fd: RawFd, token: u64) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, CLIENT_INTEREST, token)
    }

    /// Re-arm a one-shot client registration after draining to would-block.
    pub fn rearm_client(&self, fd: RawFd, token: u64) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, CLIENT_INTEREST, token)
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let rc =
            unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Block for up to `timeout_ms` and fill `out` with ready events.
    /// The timeout bounds how long a worker goes without observing the
    /// shutdown flag. At most [`MAX_EVENTS`] events per call.
    pub fn wait(&self, out: &mut Vec<Event>, timeout_ms: i32) -> io::Result<usize> {
        out.clear();
        let mut raw: [libc::epoll_event; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                raw.as_mut_ptr(),
                MAX_EVENTS as libc::c_int,
                timeout_ms,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        for ev in &raw[..n as usize] {
            let hangup = ev.events
                & (libc::EPOLLHUP as u32 | libc::EPOLLRDHUP as u32 | libc::EPOLLERR as u32)
                != 0;
            out.push(Event {
                token: ev.u64,
                hangup,
            });
        }
        Ok(out.len())
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}
