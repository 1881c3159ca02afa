use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::error::BufferError;
use crate::net::tcp::ConnectionId;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("reactor error: {0}")]
    Reactor(io::Error),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("connection {conn_id} buffer overflow: no free space left for {pending} buffered bytes")]
    BufferOverflow { conn_id: ConnectionId, pending: usize },

    #[error("connection {conn_id} announced a {length} byte packet, buffer capacity is {capacity}")]
    PacketTooLarge {
        conn_id: ConnectionId,
        length: usize,
        capacity: usize,
    },

    #[error("connection {0} announced a zero length packet")]
    InvalidPacketLength(ConnectionId),

    #[error("connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    #[error("max connections reached, rejecting {0}")]
    MaxConnectionsReached(SocketAddr),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("server is already running")]
    AlreadyRunning,
}

impl NetworkError {
    pub(crate) fn handler(err: anyhow::Error) -> Self {
        NetworkError::Handler(format!("{err:#}"))
    }
}

#[derive(Debug)]
pub enum NetworkEvent {
    Listening(SocketAddr),
    ConnectionEstablished(ConnectionId, SocketAddr),
    ConnectionRejected(SocketAddr),
    ConnectionClosed(ConnectionId),
    Stopped,
}
