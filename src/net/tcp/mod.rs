//! Framed TCP server.
//!
//! One acceptor thread owns the listener; `workers` event-loop threads each
//! own a reactor and the connections assigned to it round-robin. A connection
//! stays on its worker for life.
//!
//! ```text
//!  acceptor ──accept──▶ ConnectionContext ──insert──▶ connections
//!     │                      │                           (id ─▶ Arc<ctx>)
//!     │                      └─watch─▶ reactor[i]           ▲
//!     ▼                                   │                 │ lookup by token
//!  on_connect                      worker[i] wait ──────────┘
//!                                         │
//!                     readable: read ─▶ frame ─▶ on_packet
//!                     writable: flush send queue
//!                     closed:   remove ─▶ on_disconnect
//! ```
//!
//! Connections are registered with their reactor under their
//! [`ConnectionId`], and every readiness event is resolved through the
//! connection table. An event for a connection that has already gone away
//! finds nothing and is dropped.
//!
//! Removing the entry from the table is the only way into teardown, so
//! whichever thread wins the removal runs `on_disconnect`, exactly once.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mill_frame::net::tcp::{
//!     config::TcpServerConfig, framing::LengthPrefixed, ConnectionId, PacketHandler,
//!     PacketLength, ServerContext, TcpServer,
//! };
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
//! let config = TcpServerConfig::builder()
//!     .address("127.0.0.1:9000".parse().unwrap())
//!     .max_message_size(64 * 1024)
//!     .build();
//! let server = TcpServer::new(config, Echo).unwrap();
//! server.start().unwrap();
//! ```

pub mod config;
pub mod context;
pub mod framing;
pub mod traits;

pub use context::ConnectionContext;
pub use traits::{ConnectionId, PacketHandler, PacketLength};

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::error::Result;
use crate::event::{Interest, ReadyEvent, Token};
use crate::handler::EventHandler;
use crate::net::errors::{NetworkError, NetworkEvent};
use crate::reactor::{PlatformReactor, Reactor};
use crate::thread_pool::ThreadPool;
use config::TcpServerConfig;
use context::{context_pool, ContextPool};

const LISTENER: Token = Token(0);

/// State shared by the server handle, its threads and every [`ServerContext`].
struct ServerCore {
    config: TcpServerConfig,
    connections: RwLock<HashMap<u64, Arc<ConnectionContext>>>,
    connection_count: AtomicUsize,
    next_conn_id: AtomicU64,
    pool: ContextPool,
    running: AtomicBool,
    last_error: Mutex<Option<String>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ServerCore {
    fn get(&self, conn_id: ConnectionId) -> Option<Arc<ConnectionContext>> {
        self.connections.read().get(&conn_id.as_u64()).cloned()
    }

    fn insert(&self, conn: Arc<ConnectionContext>) {
        self.connections.write().insert(conn.id().as_u64(), conn);
        self.connection_count.fetch_add(1, Ordering::AcqRel);
    }

    fn remove(&self, conn_id: ConnectionId) -> Option<Arc<ConnectionContext>> {
        let removed = self.connections.write().remove(&conn_id.as_u64());
        if removed.is_some() {
            self.connection_count.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    fn snapshot(&self) -> Vec<Arc<ConnectionContext>> {
        self.connections.read().values().cloned().collect()
    }

    fn record_error(&self, err: &NetworkError) {
        *self.last_error.lock() = Some(err.to_string());
    }
}

/// Cloneable handle for talking to connections of a running server.
///
/// Handed to every [`PacketHandler`] callback and available from
/// [`TcpServer::context`] for pushing data from other threads.
#[derive(Clone)]
pub struct ServerContext {
    core: Arc<ServerCore>,
}

impl ServerContext {
    /// Sends `data` to one connection.
    ///
    /// What the socket does not accept right away is queued and flushed by
    /// the owning worker; bytes always leave in submission order. A failed
    /// write or a full queue is fatal for that connection: it is shut down
    /// and the error returned.
    pub fn send_to(&self, conn_id: ConnectionId, data: &[u8]) -> Result<()> {
        let conn = self
            .core
            .get(conn_id)
            .ok_or(NetworkError::ConnectionNotFound(conn_id))?;
        self.send_on(&conn, data)
    }

    fn send_on(&self, conn: &ConnectionContext, data: &[u8]) -> Result<()> {
        if let Err(err) = conn.send(data) {
            error!(conn = %conn.id(), error = %err, "send failed, closing connection");
            self.core.record_error(&err);
            conn.shutdown();
            return Err(err);
        }
        Ok(())
    }

    /// Shuts the connection's socket down; its worker then tears it down.
    pub fn close_connection(&self, conn_id: ConnectionId) -> Result<()> {
        let conn = self
            .core
            .get(conn_id)
            .ok_or(NetworkError::ConnectionNotFound(conn_id))?;
        debug!(conn = %conn_id, "closing connection");
        conn.shutdown();
        Ok(())
    }

    /// Sends `data` to every live connection. Returns how many accepted it.
    pub fn broadcast(&self, data: &[u8]) -> usize {
        self.core
            .snapshot()
            .iter()
            .filter(|conn| self.send_on(conn, data).is_ok())
            .count()
    }

    /// Bytes queued for `conn_id` behind a full socket.
    pub fn pending_send_bytes(&self, conn_id: ConnectionId) -> Option<usize> {
        self.core.get(conn_id).map(|conn| conn.pending_send_bytes())
    }

    /// Whether `conn_id` is currently watched for writability.
    pub fn is_write_pending(&self, conn_id: ConnectionId) -> Option<bool> {
        self.core.get(conn_id).map(|conn| conn.is_write_pending())
    }

    pub fn peer_addr(&self, conn_id: ConnectionId) -> Option<SocketAddr> {
        self.core.get(conn_id).map(|conn| conn.peer_addr())
    }

    pub fn connection_count(&self) -> usize {
        self.core.connection_count.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire)
    }
}

/// Removes `conn_id` from the table and, if this call removed it, releases
/// the connection and notifies the handler.
fn teardown<H: PacketHandler>(
    ctx: &ServerContext,
    handler: &H,
    conn_id: ConnectionId,
    reason: Option<NetworkError>,
) {
    let Some(conn) = ctx.core.remove(conn_id) else {
        return;
    };

    if let Err(e) = conn.unwatch() {
        trace!(conn = %conn_id, error = %e, "deregister failed");
    }
    conn.shutdown();

    match reason {
        Some(err) => {
            error!(
                conn = %conn_id,
                peer = %conn.peer_addr(),
                worker = conn.worker(),
                error = %err,
                "connection failed"
            );
            ctx.core.record_error(&err);
            handler.on_error(ctx, Some(conn_id), &err);
        }
        None => debug!(
            conn = %conn_id,
            peer = %conn.peer_addr(),
            worker = conn.worker(),
            "connection closed"
        ),
    }

    handler.on_disconnect(ctx, conn_id);
    handler.on_event(ctx, NetworkEvent::ConnectionClosed(conn_id));
}

/// Serves readiness events of established connections on the worker threads.
struct ConnectionHandler<H: PacketHandler> {
    ctx: ServerContext,
    handler: Arc<H>,
}

impl<H: PacketHandler> EventHandler for ConnectionHandler<H> {
    fn handle_event(&self, event: &ReadyEvent) {
        let conn_id = ConnectionId(event.token().0);
        let Some(conn) = self.ctx.core.get(conn_id) else {
            return;
        };

        if event.is_error() {
            let err = match conn.stream().take_error() {
                Ok(Some(e)) | Err(e) => e,
                Ok(None) => io::Error::new(io::ErrorKind::Other, "socket error"),
            };
            teardown(&self.ctx, &*self.handler, conn_id, Some(err.into()));
            return;
        }

        if event.is_readable() {
            match self.read_ready(&conn) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(conn = %conn_id, "peer disconnected");
                    teardown(&self.ctx, &*self.handler, conn_id, None);
                    return;
                }
                Err(err) => {
                    teardown(&self.ctx, &*self.handler, conn_id, Some(err));
                    return;
                }
            }
        }

        if event.is_writable() {
            if let Err(err) = conn.flush() {
                teardown(&self.ctx, &*self.handler, conn_id, Some(err));
            }
        }
    }
}

impl<H: PacketHandler> ConnectionHandler<H> {
    /// Reads until the socket would block, delivering every complete packet.
    ///
    /// `Ok(false)` means the peer closed its side.
    fn read_ready(&self, conn: &ConnectionContext) -> Result<bool> {
        let conn_id = conn.id();
        let mut recv = conn.recv();
        loop {
            if !recv.prepare_read() {
                return Err(NetworkError::BufferOverflow {
                    conn_id,
                    pending: recv.buffered(),
                });
            }

            match recv.read_from(conn.stream()) {
                Ok(0) => return Ok(false),
                Ok(_) => {
                    recv.drain_packets(
                        conn_id,
                        |buffered| self.handler.packet_length(conn_id, buffered),
                        |packet| {
                            self.handler
                                .on_packet(&self.ctx, conn_id, packet)
                                .map_err(NetworkError::handler)
                        },
                    )?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Accepts connections on the acceptor thread and hands them to workers.
struct ListenerHandler<H: PacketHandler> {
    listener: TcpListener,
    acceptor: Arc<PlatformReactor>,
    backoff: Duration,
    reactors: Vec<Arc<PlatformReactor>>,
    next_worker: AtomicUsize,
    ctx: ServerContext,
    handler: Arc<H>,
}

impl<H: PacketHandler> EventHandler for ListenerHandler<H> {
    fn handle_event(&self, event: &ReadyEvent) {
        if event.token() != LISTENER || !event.is_readable() {
            return;
        }

        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => self.admit(stream, peer_addr),
                Err(e) => match AcceptFailure::of(&e) {
                    AcceptFailure::Drained => break,
                    AcceptFailure::Retry => {
                        trace!(error = %e, "pending connection lost before accept");
                    }
                    AcceptFailure::Backoff => {
                        error!(error = %e, "accept failed, pausing the acceptor");
                        self.handler.on_error(&self.ctx, None, &NetworkError::Io(e));
                        self.rearm_after_backoff();
                        break;
                    }
                },
            }
        }
    }
}

/// How the accept loop reacts to a failed `accept`.
#[derive(Debug, PartialEq, Eq)]
enum AcceptFailure {
    /// The backlog is empty.
    Drained,
    /// Only that one pending connection is lost.
    Retry,
    /// Out of descriptors or otherwise stuck: the backlog is still pending.
    Backoff,
}

impl AcceptFailure {
    fn of(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => AcceptFailure::Drained,
            io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset => AcceptFailure::Retry,
            _ => AcceptFailure::Backoff,
        }
    }
}

impl<H: PacketHandler> ListenerHandler<H> {
    /// The listener is edge-triggered, so a backlog left behind produces no
    /// new notification. Waits, then re-arms it so the next wait reports it
    /// again if connections are still queued.
    fn rearm_after_backoff(&self) {
        thread::sleep(self.backoff);
        if let Err(e) = self
            .acceptor
            .modify(self.listener.as_raw_fd(), LISTENER, Interest::READABLE)
        {
            error!(error = %e, "failed to re-arm listener");
        }
    }

    fn admit(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let core = &self.ctx.core;

        if self.ctx.connection_count() >= core.config.max_connections {
            warn!(
                peer = %peer_addr,
                max = core.config.max_connections,
                "max connections reached, rejecting client"
            );
            drop(stream);
            let err = NetworkError::MaxConnectionsReached(peer_addr);
            self.handler.on_error(&self.ctx, None, &err);
            self.handler
                .on_event(&self.ctx, NetworkEvent::ConnectionRejected(peer_addr));
            return;
        }

        if let Err(e) = stream.set_nodelay(core.config.no_delay) {
            warn!(peer = %peer_addr, error = %e, "failed to set TCP_NODELAY");
        }

        let conn_id = ConnectionId(core.next_conn_id.fetch_add(1, Ordering::Relaxed));
        let worker = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.reactors.len();
        let conn = Arc::new(ConnectionContext::new(
            conn_id,
            peer_addr,
            worker,
            stream,
            Arc::clone(&self.reactors[worker]),
            core.pool.acquire(),
        ));
        core.insert(Arc::clone(&conn));
        debug!(conn = %conn_id, peer = %peer_addr, worker, "connection accepted");

        if let Err(e) = self.handler.on_connect(&self.ctx, conn_id, peer_addr) {
            teardown(&self.ctx, &*self.handler, conn_id, Some(NetworkError::handler(e)));
            return;
        }
        self.handler.on_event(
            &self.ctx,
            NetworkEvent::ConnectionEstablished(conn_id, peer_addr),
        );

        if let Err(e) = conn.watch() {
            teardown(&self.ctx, &*self.handler, conn_id, Some(NetworkError::Reactor(e)));
        }
    }
}

struct Running {
    acceptor: ThreadPool,
    workers: ThreadPool,
}

/// Multi-threaded TCP server delivering framed packets to a [`PacketHandler`].
///
/// The server can be started, stopped and started again. Dropping a running
/// server stops it.
pub struct TcpServer<H: PacketHandler> {
    core: Arc<ServerCore>,
    handler: Arc<H>,
    runtime: Mutex<Option<Running>>,
}

impl<H: PacketHandler> TcpServer<H> {
    pub fn new(config: TcpServerConfig, handler: H) -> Result<Self> {
        config.validate()?;
        let pool = context_pool(config.pool_size, config.buffer_capacity());

        Ok(Self {
            core: Arc::new(ServerCore {
                config,
                connections: RwLock::new(HashMap::new()),
                connection_count: AtomicUsize::new(0),
                next_conn_id: AtomicU64::new(1),
                pool,
                running: AtomicBool::new(false),
                last_error: Mutex::new(None),
                local_addr: Mutex::new(None),
            }),
            handler: Arc::new(handler),
            runtime: Mutex::new(None),
        })
    }

    /// Binds the listener and spawns the worker and acceptor threads.
    pub fn start(&self) -> Result<()> {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            return Err(NetworkError::AlreadyRunning);
        }

        let config = &self.core.config;
        let listener = TcpListener::bind(config.address).map_err(|source| NetworkError::Bind {
            addr: config.address,
            source,
        })?;
        let local_addr = listener.local_addr()?;

        let reactors = (0..config.workers)
            .map(|_| PlatformReactor::new(config.events_capacity).map(Arc::new))
            .collect::<io::Result<Vec<_>>>()
            .map_err(NetworkError::Reactor)?;
        let acceptor_reactor =
            Arc::new(PlatformReactor::new(config.events_capacity).map_err(NetworkError::Reactor)?);
        acceptor_reactor
            .register(listener.as_raw_fd(), LISTENER, Interest::READABLE)
            .map_err(NetworkError::Reactor)?;

        let ctx = self.context();
        let connections: Arc<dyn EventHandler> = Arc::new(ConnectionHandler {
            ctx: ctx.clone(),
            handler: Arc::clone(&self.handler),
        });
        let workers = ThreadPool::spawn(
            "mill-frame-worker",
            reactors.clone(),
            connections,
            config.poll_timeout,
            config.events_capacity,
        )?;

        self.core.running.store(true, Ordering::Release);
        let listening: Arc<dyn EventHandler> = Arc::new(ListenerHandler {
            listener,
            acceptor: Arc::clone(&acceptor_reactor),
            backoff: config.poll_timeout,
            reactors,
            next_worker: AtomicUsize::new(0),
            ctx: ctx.clone(),
            handler: Arc::clone(&self.handler),
        });
        let acceptor = match ThreadPool::spawn(
            "mill-frame-acceptor",
            vec![acceptor_reactor],
            listening,
            config.poll_timeout,
            config.events_capacity,
        ) {
            Ok(acceptor) => acceptor,
            Err(e) => {
                self.core.running.store(false, Ordering::Release);
                return Err(e.into());
            }
        };

        *self.core.local_addr.lock() = Some(local_addr);
        *runtime = Some(Running { acceptor, workers });
        drop(runtime);

        info!(address = %local_addr, workers = config.workers, "server listening");
        self.handler
            .on_event(&ctx, NetworkEvent::Listening(local_addr));
        Ok(())
    }

    /// Stops accepting, joins every thread and closes the remaining
    /// connections, each with one `on_disconnect`. Does nothing if the server
    /// is not running.
    pub fn stop(&self) {
        let mut runtime = self.runtime.lock();
        let Some(mut running) = runtime.take() else {
            return;
        };

        self.core.running.store(false, Ordering::Release);
        running.acceptor.shutdown();
        running.workers.shutdown();
        drop(running);

        let ctx = self.context();
        let remaining: Vec<ConnectionId> = self
            .core
            .connections
            .read()
            .keys()
            .map(|id| ConnectionId(*id))
            .collect();
        for conn_id in &remaining {
            teardown(&ctx, &*self.handler, *conn_id, None);
        }
        *self.core.local_addr.lock() = None;
        drop(runtime);

        info!(closed = remaining.len(), "server stopped");
        self.handler.on_event(&ctx, NetworkEvent::Stopped);
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire)
    }

    pub fn connection_count(&self) -> usize {
        self.core.connection_count.load(Ordering::Acquire)
    }

    /// Address the listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.core.local_addr.lock()
    }

    pub fn context(&self) -> ServerContext {
        ServerContext {
            core: Arc::clone(&self.core),
        }
    }

    /// Description of the most recent per-connection failure.
    pub fn last_error(&self) -> Option<String> {
        self.core.last_error.lock().clone()
    }

    /// Idle connection contexts ready for reuse.
    pub fn pool_available(&self) -> usize {
        self.core.pool.available()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }
}

impl<H: PacketHandler> Drop for TcpServer<H> {
    fn drop(&mut self) {
        self.stop();
    }
}
