//! Per-connection state.
//!
//! ```text
//! ConnectionContext
//!   ├── id / peer_addr / worker        identity, fixed for life
//!   ├── stream                         non-blocking socket
//!   ├── reactor                        the owning worker's reactor
//!   └── state: PooledObject<ContextState>
//!         ├── recv: Mutex<RecvState>   buffer + framing, owning worker only
//!         └── send: Mutex<SendState>   buffer + write interest, any thread
//! ```
//!
//! `ContextState` is what the [`ContextPool`] recycles. It goes back to the
//! pool, scrubbed, when the last `Arc<ConnectionContext>` is dropped, so a
//! readiness event or a sender still holding the context never sees it reused
//! underneath.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use mio::net::TcpStream;
use parking_lot::Mutex;
use tracing::trace;

use super::traits::{ConnectionId, PacketLength};
use crate::buffer::CumulativeBuffer;
use crate::event::Interest;
use crate::net::errors::NetworkError;
use crate::object_pool::{ObjectPool, PooledObject, Recycle};
use crate::reactor::{PlatformReactor, Reactor};

pub type ContextPool = ObjectPool<ContextState>;

/// Builds the pool of reusable connection state for buffers of `capacity` bytes.
pub fn context_pool(pool_size: usize, capacity: usize) -> ContextPool {
    ObjectPool::new(pool_size, pool_size, move || ContextState::new(capacity))
}

/// Where the receive side is in the current frame.
///
/// The "length known" flag and the length itself are one value, so they can
/// only be reset together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FramingState {
    AwaitingLength,
    AwaitingBody(usize),
}

pub struct RecvState {
    buffer: CumulativeBuffer,
    framing: FramingState,
}

impl RecvState {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: CumulativeBuffer::with_capacity(capacity),
            framing: FramingState::AwaitingLength,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.cumulated_len()
    }

    /// Makes room for the next socket read. Returns `false` when the buffer
    /// holds nothing but unread bytes.
    pub(crate) fn prepare_read(&mut self) -> bool {
        if self.buffer.linear_free_space() < self.buffer.capacity() / 4 {
            self.buffer.compact();
        }
        self.buffer.linear_free_space() > 0
    }

    /// Reads once from `reader` into the free tail of the buffer.
    pub(crate) fn read_from<R: Read>(&mut self, mut reader: R) -> io::Result<usize> {
        let n = reader.read(self.buffer.append_slice_mut())?;
        if n > 0 {
            self.buffer
                .increase_data(n)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        }
        Ok(n)
    }

    /// Delivers every complete packet currently buffered, in order.
    ///
    /// `packet_length` sees the unread bytes and decides where the next packet
    /// ends; `deliver` receives each packet as a slice of this buffer. Stops
    /// when the next packet is incomplete. Any error leaves the framing state
    /// reset.
    pub(crate) fn drain_packets<L, D>(
        &mut self,
        conn_id: ConnectionId,
        mut packet_length: L,
        mut deliver: D,
    ) -> Result<usize, NetworkError>
    where
        L: FnMut(&[u8]) -> PacketLength,
        D: FnMut(&[u8]) -> Result<(), NetworkError>,
    {
        let mut delivered = 0;
        while !self.buffer.is_empty() {
            let expected = match self.framing {
                FramingState::AwaitingBody(len) => len,
                FramingState::AwaitingLength => match packet_length(self.buffer.data()) {
                    PacketLength::MoreToCome => break,
                    PacketLength::Ready(0) => {
                        return Err(NetworkError::InvalidPacketLength(conn_id));
                    }
                    PacketLength::Ready(len) if len > self.buffer.capacity() => {
                        return Err(NetworkError::PacketTooLarge {
                            conn_id,
                            length: len,
                            capacity: self.buffer.capacity(),
                        });
                    }
                    PacketLength::Ready(len) => {
                        self.framing = FramingState::AwaitingBody(len);
                        len
                    }
                },
            };

            if self.buffer.cumulated_len() < expected {
                break;
            }

            self.framing = FramingState::AwaitingLength;
            let packet = self.buffer.consume(expected)?;
            deliver(packet)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    #[cfg(test)]
    pub(crate) fn framing(&self) -> FramingState {
        self.framing
    }
}

pub struct SendState {
    buffer: CumulativeBuffer,
    write_interest: bool,
}

impl SendState {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: CumulativeBuffer::with_capacity(capacity),
            write_interest: false,
        }
    }

    /// Bytes queued behind a full socket.
    pub fn pending(&self) -> usize {
        self.buffer.cumulated_len()
    }
}

/// The recyclable part of a connection.
pub struct ContextState {
    recv: Mutex<RecvState>,
    send: Mutex<SendState>,
}

impl ContextState {
    pub fn new(capacity: usize) -> Self {
        Self {
            recv: Mutex::new(RecvState::new(capacity)),
            send: Mutex::new(SendState::new(capacity)),
        }
    }
}

impl Recycle for ContextState {
    fn recycle(&mut self) {
        let recv = self.recv.get_mut();
        recv.buffer.clear();
        recv.framing = FramingState::AwaitingLength;

        let send = self.send.get_mut();
        send.buffer.clear();
        send.write_interest = false;
    }
}

pub struct ConnectionContext {
    id: ConnectionId,
    peer_addr: SocketAddr,
    worker: usize,
    stream: TcpStream,
    reactor: Arc<PlatformReactor>,
    state: PooledObject<ContextState>,
}

impl ConnectionContext {
    pub(crate) fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        worker: usize,
        stream: TcpStream,
        reactor: Arc<PlatformReactor>,
        state: PooledObject<ContextState>,
    ) -> Self {
        Self {
            id,
            peer_addr,
            worker,
            stream,
            reactor,
            state,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Index of the worker thread that owns this connection.
    pub fn worker(&self) -> usize {
        self.worker
    }

    pub(crate) fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub(crate) fn recv(&self) -> parking_lot::MutexGuard<'_, RecvState> {
        self.state.recv.lock()
    }

    pub fn pending_send_bytes(&self) -> usize {
        self.state.send.lock().pending()
    }

    pub fn is_write_pending(&self) -> bool {
        self.state.send.lock().write_interest
    }

    /// Registers the socket with its worker.
    ///
    /// Done under the send lock, so bytes queued by an early `send` (for
    /// example from the connect callback) keep their write interest.
    pub(crate) fn watch(&self) -> io::Result<()> {
        let send = self.state.send.lock();
        let interest = if send.write_interest {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        self.reactor
            .register(self.raw_fd(), self.id.token(), interest)
    }

    pub(crate) fn unwatch(&self) -> io::Result<()> {
        self.reactor.deregister(self.raw_fd())
    }

    /// Writes `data`, queueing what the socket cannot take right now.
    ///
    /// Bytes already queued are never overtaken: while the queue is not empty
    /// new data is appended behind it.
    pub(crate) fn send(&self, data: &[u8]) -> Result<(), NetworkError> {
        let mut send = self.state.send.lock();
        if !send.buffer.is_empty() {
            return self.enqueue(&mut send, data);
        }

        let mut written = 0;
        while written < data.len() {
            match (&self.stream).write(&data[written..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return self.enqueue(&mut send, &data[written..]);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn enqueue(&self, send: &mut SendState, data: &[u8]) -> Result<(), NetworkError> {
        if send.buffer.append(data).is_err() {
            return Err(NetworkError::BufferOverflow {
                conn_id: self.id,
                pending: send.buffer.cumulated_len() + data.len(),
            });
        }
        if !send.write_interest {
            self.reactor
                .modify(
                    self.raw_fd(),
                    self.id.token(),
                    Interest::READABLE | Interest::WRITABLE,
                )
                .map_err(NetworkError::Reactor)?;
            send.write_interest = true;
            trace!(conn = %self.id, pending = send.buffer.cumulated_len(), "write interest on");
        }
        Ok(())
    }

    /// Drains the send queue after a writable notification.
    ///
    /// Drops back to read-only interest once the queue is empty; keeps write
    /// interest if the socket fills up again.
    pub(crate) fn flush(&self) -> Result<(), NetworkError> {
        let mut send = self.state.send.lock();
        while !send.buffer.is_empty() {
            let result = (&self.stream).write(send.buffer.data());
            match result {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => send.buffer.advance(n)?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        if send.write_interest {
            self.reactor
                .modify(self.raw_fd(), self.id.token(), Interest::READABLE)
                .map_err(NetworkError::Reactor)?;
            send.write_interest = false;
            trace!(conn = %self.id, "write interest off");
        }
        Ok(())
    }

    /// Shuts both directions; the owning worker then sees the close.
    pub(crate) fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
