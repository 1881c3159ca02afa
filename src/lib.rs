//! # Mill-Frame
//! A multi-threaded, non-blocking TCP engine that turns byte streams into
//! application packets, without an async runtime.
//!
//! Each worker thread runs its own edge-triggered reactor (`epoll` on Linux,
//! `kqueue` on the BSDs and macOS) over the connections assigned to it. Bytes
//! land in a fixed-capacity per-connection buffer; a user-supplied
//! [`PacketHandler`](net::tcp::PacketHandler) says where each packet ends and
//! receives it whole. Outbound bytes the socket cannot take right away are
//! queued and flushed when it becomes writable again.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────┐   accept   ┌──────────────────┐   round-robin   ┌───────────────┐
//! │  acceptor   │──────────▶│ ConnectionContext │───────────────▶│ worker[i]     │
//! │  (listener) │            │ (pooled buffers)  │                 │ reactor[i]    │
//! └─────────────┘            └──────────────────┘                 └──────┬────────┘
//!                                                                        │ ready
//!                                                                        ▼
//!                                            read ─▶ CumulativeBuffer ─▶ framing ─▶ on_packet
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mill_frame::prelude::*;
//!
//! struct Echo;
//!
//! impl PacketHandler for Echo {
//!     fn packet_length(&self, _conn: ConnectionId, buffered: &[u8]) -> PacketLength {
//!         LengthPrefixed::packet_length(buffered)
//!     }
//!
//!     fn on_packet(
//!         &self,
//!         ctx: &ServerContext,
//!         conn: ConnectionId,
//!         packet: &[u8],
//!     ) -> anyhow::Result<()> {
//!         ctx.send_to(conn, packet)?;
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TcpServerConfig::builder()
//!         .address("127.0.0.1:9000".parse()?)
//!         .max_message_size(64 * 1024)
//!         .build();
//!
//!     let server = TcpServer::new(config, Echo)?;
//!     server.start()?;
//!     std::thread::park();
//!     Ok(())
//! }
//! ```
//!
//! - [`buffer`]: fixed-capacity cumulative byte buffer
//! - [`reactor`]: readiness notification backends
//! - [`thread_pool`]: event-loop worker threads
//! - [`object_pool`]: reuse of per-connection state
//! - [`net::tcp`]: the server, its configuration and the handler trait
//! - [`error`]: error types and result handling

pub mod buffer;
pub mod error;
pub mod event;
pub mod handler;
pub mod net;
pub mod object_pool;
pub mod reactor;
pub mod thread_pool;
pub mod utils;

pub use buffer::CumulativeBuffer;
pub use handler::EventHandler;
pub use object_pool::{ObjectPool, PooledObject, Recycle};

/// Commonly used types and traits.
///
/// ```rust
/// use mill_frame::prelude::*;
/// ```
pub mod prelude {
    pub use crate::buffer::CumulativeBuffer;
    pub use crate::error::{NetworkError, Result};
    pub use crate::net::errors::NetworkEvent;
    pub use crate::net::tcp::config::TcpServerConfig;
    pub use crate::net::tcp::framing::LengthPrefixed;
    pub use crate::net::tcp::{ConnectionId, PacketHandler, PacketLength, ServerContext, TcpServer};
    pub use crate::reactor::{self, PlatformReactor, Reactor};
}
