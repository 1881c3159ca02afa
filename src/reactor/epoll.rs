use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use libc::{
    epoll_create1, epoll_ctl, epoll_event, epoll_wait, EFD_CLOEXEC, EFD_NONBLOCK, EPOLLERR,
    EPOLLET, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP, EPOLL_CLOEXEC, EPOLL_CTL_ADD,
    EPOLL_CTL_DEL, EPOLL_CTL_MOD,
};
use parking_lot::Mutex;

use super::{cvt, Interest, ReadyEvent, Reactor, Token, WAKE_TOKEN};

/// Linux `epoll` backend.
///
/// Owns the epoll instance, an `eventfd` used to interrupt `epoll_wait`, and
/// the kernel event buffer reused across waits.
pub struct EpollReactor {
    epoll: OwnedFd,
    waker: OwnedFd,
    events: Mutex<Vec<epoll_event>>,
}

impl EpollReactor {
    pub fn new(events_capacity: usize) -> io::Result<Self> {
        let epoll = cvt(unsafe { epoll_create1(EPOLL_CLOEXEC) })?;
        let epoll = unsafe { OwnedFd::from_raw_fd(epoll) };

        let waker = cvt(unsafe { libc::eventfd(0, EFD_NONBLOCK | EFD_CLOEXEC) })?;
        let waker = unsafe { OwnedFd::from_raw_fd(waker) };

        // level-triggered: stays ready until drained in `wait`
        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        cvt(unsafe {
            epoll_ctl(
                epoll.as_raw_fd(),
                EPOLL_CTL_ADD,
                waker.as_raw_fd(),
                &mut event,
            )
        })?;

        Ok(Self {
            epoll,
            waker,
            events: Mutex::new(vec![epoll_event { events: 0, u64: 0 }; events_capacity.max(1)]),
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        let mut event = epoll_event {
            events: interest_flags(interest),
            u64: token.0,
        };
        cvt(unsafe { epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) }).map(|_| ())
    }

    fn drain_waker(&self) {
        let mut buf = 0u64;
        unsafe {
            libc::read(
                self.waker.as_raw_fd(),
                &mut buf as *mut u64 as *mut libc::c_void,
                8,
            );
        }
    }
}

impl Reactor for EpollReactor {
    fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        match self.ctl(EPOLL_CTL_ADD, fd, token, interest) {
            Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                self.ctl(EPOLL_CTL_MOD, fd, token, interest)
            }
            other => other,
        }
    }

    fn modify(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        match self.ctl(EPOLL_CTL_MOD, fd, token, interest) {
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => {
                self.ctl(EPOLL_CTL_ADD, fd, token, interest)
            }
            other => other,
        }
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        // kernels before 2.6.9 reject a null event pointer
        let mut event = epoll_event { events: 0, u64: 0 };
        cvt(unsafe { epoll_ctl(self.epoll.as_raw_fd(), EPOLL_CTL_DEL, fd, &mut event) })
            .map(|_| ())
    }

    fn wait(&self, events: &mut Vec<ReadyEvent>, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();
        let mut buffer = self.events.lock();

        let n = unsafe {
            epoll_wait(
                self.epoll.as_raw_fd(),
                buffer.as_mut_ptr(),
                buffer.len() as libc::c_int,
                timeout_ms(timeout),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for raw in &buffer[..n as usize] {
            let token = raw.u64;
            let flags = raw.events;

            if token == WAKE_TOKEN {
                self.drain_waker();
                continue;
            }

            let mut event = ReadyEvent::new(Token(token));
            if flags & (EPOLLIN as u32) != 0 {
                event = event.set_readable();
            }
            if flags & (EPOLLOUT as u32) != 0 {
                event = event.set_writable();
            }
            if flags & ((EPOLLRDHUP | EPOLLHUP) as u32) != 0 {
                // readable too, so the owner reads the remaining bytes and the EOF
                event = event.set_peer_closed().set_readable();
            }
            if flags & (EPOLLERR as u32) != 0 {
                event = event.set_error();
            }
            // one entry per descriptor per wait
            events.push(event);
        }
        Ok(())
    }

    fn wake(&self) -> io::Result<()> {
        let buf: u64 = 1;
        let rc = unsafe {
            libc::write(
                self.waker.as_raw_fd(),
                &buf as *const u64 as *const libc::c_void,
                8,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // counter saturated: a wake-up is already pending
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }
}

fn interest_flags(interest: Interest) -> u32 {
    let mut flags = EPOLLET | EPOLLRDHUP;
    if interest.is_readable() {
        flags |= EPOLLIN;
    }
    if interest.is_writable() {
        flags |= EPOLLOUT;
    }
    flags as u32
}

fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(t) => {
            // round up so a sub-millisecond timeout does not spin
            let ms = t.as_millis() + u128::from(t.subsec_nanos() % 1_000_000 != 0);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_rounding() {
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_ms(Some(Duration::from_micros(10))), 1);
        assert_eq!(timeout_ms(Some(Duration::from_millis(150))), 150);
    }

    #[test]
    fn test_read_and_write_readiness_share_one_event() {
        use std::io::Write;
        use std::os::unix::net::UnixStream;

        let reactor = EpollReactor::new(16).unwrap();
        let (local, mut remote) = UnixStream::pair().unwrap();
        local.set_nonblocking(true).unwrap();
        reactor
            .register(
                local.as_raw_fd(),
                Token(7),
                Interest::READABLE | Interest::WRITABLE,
            )
            .unwrap();
        remote.write_all(b"x").unwrap();

        let mut events = Vec::new();
        reactor
            .wait(&mut events, Some(Duration::from_secs(2)))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token(), Token(7));
        assert!(events[0].is_readable() && events[0].is_writable());
    }

    #[test]
    fn test_interest_flags() {
        let flags = interest_flags(Interest::READABLE);
        assert_ne!(flags & EPOLLIN as u32, 0);
        assert_eq!(flags & EPOLLOUT as u32, 0);
        assert_ne!(flags & EPOLLET as u32, 0);
    }
}
