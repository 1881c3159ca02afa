use std::fmt;
use std::net::SocketAddr;

use crate::event::Token;
use crate::net::errors::{NetworkError, NetworkEvent};

use super::ServerContext;

/// Unique identifier for connections.
///
/// Each accepted connection gets the next value of a per-server counter. Ids
/// are never reused while the server lives, so a stale id (for example one
/// carried by a readiness event that raced with a disconnect) simply fails to
/// resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        ConnectionId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn token(&self) -> Token {
        Token(self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Answer of [`PacketHandler::packet_length`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketLength {
    /// Not enough bytes are buffered to tell where the next packet ends.
    MoreToCome,
    /// The next packet spans this many bytes, header included.
    Ready(usize),
}

/// Application side of a [`TcpServer`](super::TcpServer).
///
/// The server owns sockets and buffers; the handler decides where packets end
/// and what to do with them. Methods are called from the worker thread that
/// owns the connection, so they must not block it indefinitely. Packets of a
/// connection are delivered in arrival order; different connections may be
/// served concurrently by different workers.
///
/// Returning an error from `on_connect` or `on_packet` closes that connection
/// only.
pub trait PacketHandler: Send + Sync + 'static {
    /// Length of the next complete packet at the front of `buffered`.
    ///
    /// Must be a pure function of the bytes: the engine calls it again with the
    /// same prefix once more data arrives.
    fn packet_length(&self, conn_id: ConnectionId, buffered: &[u8]) -> PacketLength;

    /// Called once per fully assembled packet.
    fn on_packet(&self, ctx: &ServerContext, conn_id: ConnectionId, packet: &[u8])
        -> anyhow::Result<()>;

    /// Called when a connection is accepted, before it is watched for reads.
    fn on_connect(
        &self,
        ctx: &ServerContext,
        conn_id: ConnectionId,
        peer_addr: SocketAddr,
    ) -> anyhow::Result<()> {
        let _ = (ctx, conn_id, peer_addr);
        Ok(())
    }

    /// Called exactly once when a connection that was announced through
    /// `on_connect` goes away.
    fn on_disconnect(&self, ctx: &ServerContext, conn_id: ConnectionId) {
        let _ = (ctx, conn_id);
    }

    /// Called for server lifecycle events.
    fn on_event(&self, ctx: &ServerContext, event: NetworkEvent) {
        let _ = (ctx, event);
    }

    /// Called when a connection, or the server itself, hits an error.
    fn on_error(&self, ctx: &ServerContext, conn_id: Option<ConnectionId>, error: &NetworkError) {
        let _ = (ctx, conn_id, error);
    }
}
