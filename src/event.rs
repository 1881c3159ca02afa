use std::fmt;
use std::ops::BitOr;

/// Stable handle a source is registered under.
///
/// The engine uses connection ids here, never pointers, so an event that
/// outlives its connection resolves to nothing instead of freed memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u64);

/// Readiness a source is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    readable: bool,
    writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Interest = Interest {
        readable: false,
        writable: true,
    };

    pub fn is_readable(self) -> bool {
        self.readable
    }

    pub fn is_writable(self) -> bool {
        self.writable
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Self) -> Self::Output {
        Interest {
            readable: self.readable || rhs.readable,
            writable: self.writable || rhs.writable,
        }
    }
}

/// Unified readiness event that abstracts away the epoll/kqueue differences.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    token: Token,
    readable: bool,
    writable: bool,
    error: bool,
    peer_closed: bool,
}

impl fmt::Debug for ReadyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyEvent")
            .field("token", &self.token)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("error", &self.error)
            .field("peer_closed", &self.peer_closed)
            .finish()
    }
}

impl ReadyEvent {
    pub fn new(token: Token) -> Self {
        Self {
            token,
            readable: false,
            writable: false,
            error: false,
            peer_closed: false,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    /// The peer shut down its write half (or the whole connection).
    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed
    }

    pub(crate) fn set_readable(mut self) -> Self {
        self.readable = true;
        self
    }

    pub(crate) fn set_writable(mut self) -> Self {
        self.writable = true;
        self
    }

    pub(crate) fn set_error(mut self) -> Self {
        self.error = true;
        self
    }

    pub(crate) fn set_peer_closed(mut self) -> Self {
        self.peer_closed = true;
        self
    }

    /// Folds another event for the same token into this one.
    #[cfg(any(test, not(target_os = "linux")))]
    pub(crate) fn merge(&mut self, other: &ReadyEvent) {
        self.readable |= other.readable;
        self.writable |= other.writable;
        self.error |= other.error;
        self.peer_closed |= other.peer_closed;
    }
}

/// Pushes `event`, merging with an earlier entry for the same token.
///
/// kqueue reports read and write readiness as separate entries; epoll already
/// returns one entry per descriptor and pushes directly.
#[cfg(any(test, not(target_os = "linux")))]
pub(crate) fn push_merged(events: &mut Vec<ReadyEvent>, event: ReadyEvent) {
    match events.iter_mut().find(|e| e.token == event.token) {
        Some(existing) => existing.merge(&event),
        None => events.push(event),
    }
}
