use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::{mem, ptr};
use std::time::Duration;

use parking_lot::Mutex;

use super::{cvt, set_nonblocking_cloexec, Interest, ReadyEvent, Reactor, Token, WAKE_TOKEN};
use crate::event::push_merged;

/// BSD/macOS `kqueue` backend.
///
/// Read and write readiness are separate filters. Adding a filter that
/// already exists updates it in place, so re-registration never duplicates.
/// A self-pipe serves as the wake source.
pub struct KqueueReactor {
    kq: OwnedFd,
    wake_read: OwnedFd,
    wake_write: OwnedFd,
    events: Mutex<Vec<libc::kevent>>,
}

// `kevent::udata` is a raw pointer; this backend only ever stores tokens in it.
unsafe impl Send for KqueueReactor {}
unsafe impl Sync for KqueueReactor {}

impl KqueueReactor {
    pub fn new(events_capacity: usize) -> io::Result<Self> {
        let kq = cvt(unsafe { libc::kqueue() })?;
        let kq = unsafe { OwnedFd::from_raw_fd(kq) };
        cvt(unsafe { libc::fcntl(kq.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) })?;

        let mut fds = [0 as libc::c_int; 2];
        cvt(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
        let wake_read = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let wake_write = unsafe { OwnedFd::from_raw_fd(fds[1]) };
        set_nonblocking_cloexec(wake_read.as_raw_fd())?;
        set_nonblocking_cloexec(wake_write.as_raw_fd())?;

        let reactor = Self {
            kq,
            wake_read,
            wake_write,
            events: Mutex::new(vec![unsafe { mem::zeroed() }; events_capacity.max(1)]),
        };

        // level-triggered: stays ready until drained in `wait`
        let mut changes = [change(
            reactor.wake_read.as_raw_fd(),
            libc::EVFILT_READ,
            libc::EV_ADD,
            WAKE_TOKEN,
        )];
        reactor.submit(&mut changes)?;
        Ok(reactor)
    }

    /// Applies `changes`, reporting the first per-change failure.
    fn submit(&self, changes: &mut [libc::kevent]) -> io::Result<()> {
        for c in changes.iter_mut() {
            c.flags |= libc::EV_RECEIPT;
        }
        let n = cvt(unsafe {
            libc::kevent(
                self.kq.as_raw_fd(),
                changes.as_ptr(),
                changes.len() as _,
                changes.as_mut_ptr(),
                changes.len() as _,
                ptr::null(),
            )
        })?;

        for c in &changes[..n as usize] {
            if c.flags & libc::EV_ERROR == 0 || c.data == 0 {
                continue;
            }
            let errno = c.data as i32;
            // deleting a filter that was never added; writing to a closed pipe
            if errno == libc::ENOENT || errno == libc::EPIPE {
                continue;
            }
            return Err(io::Error::from_raw_os_error(errno));
        }
        Ok(())
    }

    fn apply(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        let filter_flags = |wanted: bool| {
            if wanted {
                libc::EV_ADD | libc::EV_CLEAR
            } else {
                libc::EV_DELETE
            }
        };
        let mut changes = [
            change(
                fd,
                libc::EVFILT_READ,
                filter_flags(interest.is_readable()),
                token.0,
            ),
            change(
                fd,
                libc::EVFILT_WRITE,
                filter_flags(interest.is_writable()),
                token.0,
            ),
        ];
        self.submit(&mut changes)
    }

    fn drain_waker(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(
                    self.wake_read.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
        }
    }
}

impl Reactor for KqueueReactor {
    fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.apply(fd, token, interest)
    }

    fn modify(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.apply(fd, token, interest)
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let mut changes = [
            change(fd, libc::EVFILT_READ, libc::EV_DELETE, 0),
            change(fd, libc::EVFILT_WRITE, libc::EV_DELETE, 0),
        ];
        self.submit(&mut changes)
    }

    fn wait(&self, events: &mut Vec<ReadyEvent>, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();
        let mut buffer = self.events.lock();

        let timespec = timeout.map(|t| libc::timespec {
            tv_sec: t.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: t.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = timespec
            .as_ref()
            .map_or(ptr::null(), |t| t as *const libc::timespec);

        let n = unsafe {
            libc::kevent(
                self.kq.as_raw_fd(),
                ptr::null(),
                0,
                buffer.as_mut_ptr(),
                buffer.len() as _,
                timespec_ptr,
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
            let token = raw.udata as usize as u64;
            if token == WAKE_TOKEN as usize as u64 {
                self.drain_waker();
                continue;
            }

            let mut event = ReadyEvent::new(Token(token));
            if raw.filter == libc::EVFILT_READ {
                event = event.set_readable();
            }
            if raw.filter == libc::EVFILT_WRITE {
                event = event.set_writable();
            }
            if raw.flags & libc::EV_EOF != 0 {
                event = event.set_peer_closed().set_readable();
                // a socket error on close is carried in fflags
                if raw.fflags != 0 {
                    event = event.set_error();
                }
            }
            if raw.flags & libc::EV_ERROR != 0 {
                event = event.set_error();
            }
            push_merged(events, event);
        }
        Ok(())
    }

    fn wake(&self) -> io::Result<()> {
        let byte = 1u8;
        let rc = unsafe {
            libc::write(
                self.wake_write.as_raw_fd(),
                &byte as *const u8 as *const libc::c_void,
                1,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // pipe full: a wake-up is already pending
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }
}

fn change(fd: RawFd, filter: i16, flags: u16, token: u64) -> libc::kevent {
    let mut ev: libc::kevent = unsafe { mem::zeroed() };
    ev.ident = fd as libc::uintptr_t;
    ev.filter = filter as _;
    ev.flags = flags as _;
    ev.udata = token as usize as *mut libc::c_void;
    ev
}
