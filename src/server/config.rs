//! Server and listener settings.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use super::BackoffConfig;
use crate::{lifecycle::RestartPolicy, socket::SocketOptions};

/// Default cap on concurrently registered sessions.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Default `listen(2)` backlog.
pub const DEFAULT_BACKLOG: u32 = 1024;

/// Settings shared by every listener of a [`Server`](super::Server).
///
/// # Examples
///
/// ```
/// use wiresession::{server::ServerConfig, socket::SocketOptions};
///
/// let config = ServerConfig::default()
///     .max_connections(64)
///     .socket_options(SocketOptions::default().nodelay(true));
/// assert_eq!(config.connection_limit(), 64);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub(crate) max_connections: usize,
    pub(crate) socket_options: SocketOptions,
    pub(crate) backoff: BackoffConfig,
    pub(crate) restart_policy: RestartPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            socket_options: SocketOptions::default(),
            backoff: BackoffConfig::default(),
            restart_policy: RestartPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Refuse connections once this many sessions (including ones still
    /// being set up) are registered.
    #[must_use]
    pub fn max_connections(mut self, limit: usize) -> Self {
        self.max_connections = limit;
        self
    }

    /// Options applied to listening sockets and accepted connections.
    #[must_use]
    pub fn socket_options(mut self, options: SocketOptions) -> Self {
        self.socket_options = options;
        self
    }

    /// Pacing for retries after `accept()` failures.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff.normalized();
        self
    }

    /// What a failed server start leaves behind.
    #[must_use]
    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Configured connection limit.
    #[must_use]
    pub const fn connection_limit(&self) -> usize { self.max_connections }
}

/// Where and how one listener binds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerConfig {
    pub(crate) addr: SocketAddr,
    pub(crate) backlog: u32,
}

impl ListenerConfig {
    /// Listen on `addr`. Port `0` picks an ephemeral port.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            backlog: DEFAULT_BACKLOG,
        }
    }

    /// Listen on every IPv4 interface at `port`.
    #[must_use]
    pub const fn port(port: u16) -> Self { Self::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)) }

    /// Listen on the IPv4 loopback interface at `port`.
    #[must_use]
    pub const fn localhost(port: u16) -> Self { Self::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)) }

    /// Set the `listen(2)` backlog.
    #[must_use]
    pub const fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Requested address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr { self.addr }
}

impl From<SocketAddr> for ListenerConfig {
    fn from(addr: SocketAddr) -> Self { Self::new(addr) }
}
