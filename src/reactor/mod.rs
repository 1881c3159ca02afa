//! Readiness notification over the kernel's native facility.
//!
//! A [`Reactor`] watches raw file descriptors registered under a [`Token`]
//! and reports [`ReadyEvent`]s from a blocking [`wait`](Reactor::wait). Two
//! backends implement it:
//!
//! - [`EpollReactor`] on Linux (`EPOLLET | EPOLLRDHUP`, woken through an
//!   `eventfd`),
//! - [`KqueueReactor`] on macOS, iOS, FreeBSD and DragonFly (`EV_CLEAR`
//!   filters, woken through a self-pipe).
//!
//! [`PlatformReactor`] names the backend chosen at build time. Both are
//! edge-triggered: a source must be drained until `WouldBlock` before the next
//! notification is guaranteed.
//!
//! Every method takes `&self`. The kernel calls behind them are thread-safe,
//! so a thread that does not own the wait loop (the acceptor, or an
//! application thread pushing outbound bytes) may change a registration while
//! the owner is blocked in `wait`.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub use crate::event::{Interest, ReadyEvent, Token};

#[cfg(target_os = "linux")]
mod epoll;
#[cfg(target_os = "linux")]
pub use epoll::EpollReactor;
#[cfg(target_os = "linux")]
pub type PlatformReactor = EpollReactor;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
mod kqueue;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
pub use kqueue::KqueueReactor;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
pub type PlatformReactor = KqueueReactor;

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
)))]
compile_error!("mill-frame needs epoll (Linux) or kqueue (macOS/iOS/FreeBSD/DragonFly)");

/// Default number of kernel events fetched per wait.
pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;

/// Default upper bound on one blocking wait.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 150;

/// Reserved for the internal wake source; never handed out to callers.
pub(crate) const WAKE_TOKEN: u64 = u64::MAX;

pub trait Reactor: Send + Sync {
    /// Starts watching `fd`.
    ///
    /// Registering a descriptor that is already registered updates the
    /// existing registration instead of adding a second one.
    fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()>;

    /// Replaces the interest set of `fd`, registering it if needed.
    fn modify(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()>;

    /// Stops watching `fd`.
    fn deregister(&self, fd: RawFd) -> io::Result<()>;

    /// Blocks until at least one source is ready, the reactor is woken, or
    /// `timeout` elapses. `events` is cleared first; each token appears at
    /// most once.
    fn wait(&self, events: &mut Vec<ReadyEvent>, timeout: Option<Duration>) -> io::Result<()>;

    /// Interrupts a concurrent or the next [`wait`](Self::wait).
    fn wake(&self) -> io::Result<()>;
}

pub(crate) fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFD) })?;
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;
    use std::thread;

    const SHORT: Option<Duration> = Some(Duration::from_millis(100));
    const LONG: Option<Duration> = Some(Duration::from_secs(2));

    fn pair() -> (UnixStream, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        (a, b)
    }

    #[test]
    fn test_readable_event() {
        let reactor = PlatformReactor::new(16).unwrap();
        let (local, mut remote) = pair();
        reactor
            .register(local.as_raw_fd(), Token(7), Interest::READABLE)
            .unwrap();

        remote.write_all(b"ping").unwrap();

        let mut events = Vec::new();
        reactor.wait(&mut events, LONG).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token(), Token(7));
        assert!(events[0].is_readable());
        assert!(!events[0].is_writable());
    }

    #[test]
    fn test_edge_triggered() {
        let reactor = PlatformReactor::new(16).unwrap();
        let (mut local, mut remote) = pair();
        reactor
            .register(local.as_raw_fd(), Token(1), Interest::READABLE)
            .unwrap();

        remote.write_all(b"abc").unwrap();
        let mut events = Vec::new();
        reactor.wait(&mut events, LONG).unwrap();
        assert_eq!(events.len(), 1);

        // not drained, but no new data: no second notification
        reactor.wait(&mut events, SHORT).unwrap();
        assert!(events.is_empty());

        let mut buf = [0u8; 8];
        assert_eq!(local.read(&mut buf).unwrap(), 3);
    }

    #[test]
    fn test_modify_rearms_undrained_source() {
        let reactor = PlatformReactor::new(16).unwrap();
        let (local, mut remote) = pair();
        let fd = local.as_raw_fd();
        reactor.register(fd, Token(4), Interest::READABLE).unwrap();

        remote.write_all(b"left behind").unwrap();
        let mut events = Vec::new();
        reactor.wait(&mut events, LONG).unwrap();
        assert_eq!(events.len(), 1);
        reactor.wait(&mut events, SHORT).unwrap();
        assert!(events.is_empty());

        // still readable: re-arming reports it again without new data
        reactor.modify(fd, Token(4), Interest::READABLE).unwrap();
        reactor.wait(&mut events, LONG).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token(), Token(4));
        assert!(events[0].is_readable());
    }

    #[test]
    fn test_reregister_modifies_existing_registration() {
        let reactor = PlatformReactor::new(16).unwrap();
        let (local, _remote) = pair();
        let fd = local.as_raw_fd();

        reactor.register(fd, Token(3), Interest::READABLE).unwrap();
        reactor.register(fd, Token(3), Interest::READABLE).unwrap();
        reactor
            .modify(fd, Token(3), Interest::READABLE | Interest::WRITABLE)
            .unwrap();

        let mut events = Vec::new();
        reactor.wait(&mut events, LONG).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_writable());

        // back to read-only: the socket stays writable but nothing is reported
        reactor.modify(fd, Token(3), Interest::READABLE).unwrap();
        reactor.wait(&mut events, SHORT).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_modify_registers_unknown_fd() {
        let reactor = PlatformReactor::new(16).unwrap();
        let (local, _remote) = pair();
        reactor
            .modify(local.as_raw_fd(), Token(9), Interest::WRITABLE)
            .unwrap();

        let mut events = Vec::new();
        reactor.wait(&mut events, LONG).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token(), Token(9));
    }

    #[test]
    fn test_peer_close() {
        let reactor = PlatformReactor::new(16).unwrap();
        let (local, remote) = pair();
        reactor
            .register(local.as_raw_fd(), Token(5), Interest::READABLE)
            .unwrap();

        drop(remote);

        let mut events = Vec::new();
        reactor.wait(&mut events, LONG).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_readable());
        assert!(events[0].is_peer_closed());
    }

    #[test]
    fn test_deregister() {
        let reactor = PlatformReactor::new(16).unwrap();
        let (local, mut remote) = pair();
        let fd = local.as_raw_fd();
        reactor.register(fd, Token(2), Interest::READABLE).unwrap();
        reactor.deregister(fd).unwrap();

        remote.write_all(b"ignored").unwrap();

        let mut events = Vec::new();
        reactor.wait(&mut events, SHORT).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_wake_interrupts_wait() {
        let reactor = Arc::new(PlatformReactor::new(16).unwrap());
        let waker = Arc::clone(&reactor);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            waker.wake().unwrap();
        });

        let mut events = Vec::new();
        reactor.wait(&mut events, None).unwrap();
        assert!(events.is_empty());
        handle.join().unwrap();
    }
}
