use std::net::SocketAddr;
use std::time::Duration;

use crate::buffer::capacity_for;
use crate::net::errors::NetworkError;
use crate::reactor::{DEFAULT_EVENTS_CAPACITY, DEFAULT_POLL_TIMEOUT_MS};
use crate::utils::get_default_capacity;

/// Default ceiling on concurrently connected clients.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Default number of idle connection contexts kept for reuse.
pub const DEFAULT_POOL_SIZE: usize = 64;

/// Configuration for TCP server.
///
/// Controls the bind address, connection limits, buffer sizing, the worker
/// thread layout and socket options. Use TcpServerConfig::builder() for
/// ergonomic construction.
///
/// ## Buffer sizing
///
/// Every connection owns one receive and one send buffer of
/// [`buffer_capacity`](Self::buffer_capacity) bytes, derived from
/// `max_message_size` as `max(2 * max_message_size, DEFAULT_CAPACITY)`. A
/// peer announcing a packet larger than that capacity is disconnected.
///
/// ## Threads
///
/// `workers` event-loop threads each own one reactor; accepted connections are
/// spread over them round-robin. One extra thread accepts connections.
#[derive(Debug, Clone)]
pub struct TcpServerConfig {
    /// Address to bind to
    pub address: SocketAddr,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Largest packet a peer may send
    pub max_message_size: usize,
    /// Number of worker threads
    pub workers: usize,
    /// Kernel events fetched per wait
    pub events_capacity: usize,
    /// Upper bound on one blocking wait
    pub poll_timeout: Duration,
    /// Enable TCP_NODELAY
    pub no_delay: bool,
    /// Idle connection contexts kept for reuse (also pre-allocated)
    pub pool_size: usize,
}

impl TcpServerConfig {
    /// Create a new builder for TcpServerConfig
    pub fn builder() -> TcpServerConfigBuilder {
        TcpServerConfigBuilder::new()
    }

    /// Per-direction buffer size of each connection.
    pub fn buffer_capacity(&self) -> usize {
        capacity_for(self.max_message_size)
    }

    pub(crate) fn validate(&self) -> Result<(), NetworkError> {
        if self.workers == 0 {
            return Err(NetworkError::Configuration(
                "at least one worker thread is required".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(NetworkError::Configuration(
                "max_connections must be greater than zero".into(),
            ));
        }
        if self.events_capacity == 0 {
            return Err(NetworkError::Configuration(
                "events_capacity must be greater than zero".into(),
            ));
        }
        if self.pool_size == 0 {
            return Err(NetworkError::Configuration(
                "pool_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_message_size: 0,
            workers: get_default_capacity(),
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            no_delay: true,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// Builder for TcpServerConfig using the builder pattern.
///
/// All fields are optional and will use defaults from TcpServerConfig::default()
/// if not explicitly set.
#[derive(Debug, Default)]
pub struct TcpServerConfigBuilder {
    address: Option<SocketAddr>,
    max_connections: Option<usize>,
    max_message_size: Option<usize>,
    workers: Option<usize>,
    events_capacity: Option<usize>,
    poll_timeout: Option<Duration>,
    no_delay: Option<bool>,
    pool_size: Option<usize>,
}

impl TcpServerConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address to bind to
    pub fn address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Set the largest packet a peer may send
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    /// Set the number of worker threads
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set how many kernel events are fetched per wait
    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = Some(capacity);
        self
    }

    /// Set the upper bound on one blocking wait
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = Some(enabled);
        self
    }

    /// Set how many idle connection contexts are kept for reuse.
    /// Must be at least one.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Build the TcpServerConfig
    pub fn build(self) -> TcpServerConfig {
        let default = TcpServerConfig::default();
        TcpServerConfig {
            address: self.address.unwrap_or(default.address),
            max_connections: self.max_connections.unwrap_or(default.max_connections),
            max_message_size: self.max_message_size.unwrap_or(default.max_message_size),
            workers: self.workers.unwrap_or(default.workers),
            events_capacity: self.events_capacity.unwrap_or(default.events_capacity),
            poll_timeout: self.poll_timeout.unwrap_or(default.poll_timeout),
            no_delay: self.no_delay.unwrap_or(default.no_delay),
            pool_size: self.pool_size.unwrap_or(default.pool_size),
        }
    }
}
