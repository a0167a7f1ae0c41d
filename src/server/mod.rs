//! Listening side: accepts TCP connections and runs a [`Session`] for each.
//!
//! A [`Server`] walks the shared lifecycle. Once running it can own any
//! number of listeners, keyed by their bound port, each driven by its own
//! accept loop. Every accepted connection is configured, counted against the
//! connection limit, given a pre-reserved [`SessionId`], and registered
//! before its session starts. Sessions deregister themselves when they
//! close, whether the peer left, the stream failed, or the server stopped
//! them.

use std::{
    fmt,
    net::SocketAddr,
    ops::ControlFlow,
    sync::{Arc, Weak},
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::join_all;
use log::{debug, info, warn};
use tokio::{
    net::{TcpSocket, TcpStream},
    task::JoinHandle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::Instrument;

use crate::{
    codec::MessageCodec,
    lifecycle::{LifecycleError, LifecycleState, StateCell, StopTicket},
    metrics,
    registry::{SessionId, SessionRegistry},
    session::{Session, SessionConfig},
};

mod accept;
mod backoff;
mod builder;
mod config;
mod error;

pub use backoff::BackoffConfig;
pub use builder::ServerBuilder;
pub use config::{DEFAULT_BACKLOG, DEFAULT_MAX_CONNECTIONS, ListenerConfig, ServerConfig};
pub use error::ServerError;

use self::accept::accept_loop;

/// Error type returned by a [`Configurator`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Per-connection setup run after a session is created and before it is
/// registered. Returning an error closes the connection.
pub type Configurator<C> = Arc<dyn Fn(&Arc<Session<C>>) -> Result<(), BoxError> + Send + Sync>;

/// Notifications about the server's own lifecycle.
pub trait ServerHooks: Send + Sync + 'static {
    /// The server reached `Running`.
    fn on_started(&self) {}

    /// Every listener and session has been torn down.
    fn on_stopped(&self) {}
}

struct ListenerEntry {
    config: ListenerConfig,
    local_addr: SocketAddr,
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// TCP server owning listeners and the sessions they accept.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use async_trait::async_trait;
/// use bytes::Bytes;
/// use wiresession::{
///     codec::FixedHeaderCodec,
///     server::{ListenerConfig, Server},
///     session::{Session, SessionBehavior},
/// };
///
/// struct Echo;
///
/// #[async_trait]
/// impl SessionBehavior<FixedHeaderCodec> for Echo {
///     async fn on_received(&self, session: &Arc<Session<FixedHeaderCodec>>, message: Bytes) {
///         let _ = session.send_message(&message).await;
///     }
/// }
///
/// # async fn run() -> Result<(), wiresession::server::ServerError> {
/// let server = Server::builder()
///     .codec(FixedHeaderCodec::default())
///     .behavior(Echo)
///     .build();
/// server.start()?;
/// let addr = server.start_listener(ListenerConfig::localhost(0))?;
/// println!("listening on {addr}");
/// server.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server<C: MessageCodec> {
    state: StateCell,
    config: ServerConfig,
    session_config: SessionConfig<C>,
    configurator: Option<Configurator<C>>,
    hooks: Option<Arc<dyn ServerHooks>>,
    registry: Arc<SessionRegistry<Session<C>>>,
    listeners: DashMap<u16, ListenerEntry>,
    tracker: TaskTracker,
}

impl<C: MessageCodec> fmt::Debug for Server<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state.get())
            .field("config", &self.config)
            .field("listeners", &self.local_addrs())
            .field("sessions", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<C: MessageCodec> Server<C> {
    /// Start configuring a server.
    #[must_use]
    pub fn builder() -> ServerBuilder<C> { ServerBuilder::new() }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState { self.state.get() }

    /// Settings the server was built with.
    #[must_use]
    pub fn config(&self) -> &ServerConfig { &self.config }

    /// Registry of accepted sessions.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry<Session<C>>> { &self.registry }

    /// Look up a registered session.
    #[must_use]
    pub fn session(&self, id: &SessionId) -> Option<Arc<Session<C>>> { self.registry.get(id) }

    /// Number of registered sessions, excluding reservations.
    #[must_use]
    pub fn session_count(&self) -> usize { self.registry.ids().len() }

    /// Bound addresses of every active listener.
    #[must_use]
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .map(|entry| entry.value().local_addr)
            .collect()
    }

    /// Configuration of the listener bound to `port`.
    #[must_use]
    pub fn listener_config(&self, port: u16) -> Option<ListenerConfig> {
        self.listeners.get(&port).map(|entry| entry.value().config)
    }

    /// Move to `Running`.
    ///
    /// Listeners are added afterwards with
    /// [`start_listener`](Self::start_listener).
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::ConfigurationMissing`] when no codec factory
    /// was configured, and the usual lifecycle errors when the server is not
    /// in `None`.
    pub fn start(&self) -> Result<(), ServerError> {
        self.state.begin_start()?;
        if !self.session_config.has_codec_factory() {
            let state = self.state.abort_start(self.config.restart_policy);
            warn!("server start failed: reason=missing codec factory, state={state}");
            return Err(LifecycleError::ConfigurationMissing("codec factory").into());
        }
        self.state.finish_start()?;
        if let Some(hooks) = &self.hooks {
            hooks.on_started();
        }
        info!("server started");
        Ok(())
    }

    /// Bind a listener and start accepting on it.
    ///
    /// Returns the bound address, which differs from the requested one when
    /// port `0` was used.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Lifecycle`] unless the server is running,
    /// [`ServerError::ListenerExists`] when the port already has a listener,
    /// and [`ServerError::Bind`] when the socket cannot be bound.
    pub fn start_listener(self: &Arc<Self>, config: ListenerConfig) -> Result<SocketAddr, ServerError> {
        let actual = self.state.get();
        if actual != LifecycleState::Running {
            return Err(LifecycleError::rejected(LifecycleState::Running, actual).into());
        }
        let requested = config.addr;
        if requested.port() != 0 && self.listeners.contains_key(&requested.port()) {
            return Err(ServerError::ListenerExists {
                port: requested.port(),
            });
        }

        let bind_err = |source| ServerError::Bind {
            addr: requested,
            source,
        };
        let socket = if requested.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;
        self.config
            .socket_options
            .apply(&socket)
            .map_err(bind_err)?;
        socket.bind(requested).map_err(bind_err)?;
        let listener = socket.listen(config.backlog).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let Entry::Vacant(slot) = self.listeners.entry(local_addr.port()) else {
            return Err(ServerError::ListenerExists {
                port: local_addr.port(),
            });
        };
        let token = CancellationToken::new();
        let server = Arc::downgrade(self);
        let span = tracing::info_span!("listener", addr = %local_addr);
        let task = self.tracker.spawn(
            accept_loop(
                Arc::new(listener),
                token.clone(),
                self.config.backoff,
                move |stream, peer_addr| Self::dispatch(&server, stream, peer_addr),
            )
            .instrument(span),
        );
        slot.insert(ListenerEntry {
            config,
            local_addr,
            token: token.clone(),
            task,
        });

        // A stop that began after the state check may have collected the
        // listener ports before this insert.
        let actual = self.state.get();
        if actual != LifecycleState::Running {
            self.listeners.remove(&local_addr.port());
            token.cancel();
            debug!("listener abandoned by stopping server: local_addr={local_addr}");
            return Err(LifecycleError::rejected(LifecycleState::Running, actual).into());
        }
        info!("listener started: local_addr={local_addr}");
        Ok(local_addr)
    }

    /// Stop the listener bound to `port` and wait for its accept loop.
    ///
    /// Sessions it accepted keep running. Returns `false` if no listener is
    /// bound to `port`.
    pub async fn stop_listener(&self, port: u16) -> bool {
        let Some((_, entry)) = self.listeners.remove(&port) else {
            return false;
        };
        entry.token.cancel();
        if let Err(e) = entry.task.await {
            warn!("listener task failed: port={port}, error={e}");
        }
        info!("listener stopped: local_addr={}", entry.local_addr);
        true
    }

    /// Stop every listener, then every session, and wait for both.
    ///
    /// Only the first caller tears down; concurrent and later callers return
    /// `Ok(())` immediately.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidState`] if the server never reached
    /// `Running`.
    pub async fn stop(&self) -> Result<(), ServerError> {
        match self.state.begin_stop() {
            StopTicket::Won => {}
            StopTicket::AlreadyStopping => return Ok(()),
            StopTicket::NotRunning(actual) => {
                return Err(LifecycleError::InvalidState {
                    expected: LifecycleState::Running,
                    actual,
                }
                .into());
            }
        }

        let ports: Vec<u16> = self.listeners.iter().map(|entry| *entry.key()).collect();
        for port in ports {
            self.stop_listener(port).await;
        }
        self.tracker.close();
        self.tracker.wait().await;

        let sessions = self.registry.all();
        let count = sessions.len();
        join_all(sessions.iter().map(|session| async move {
            if let Err(e) = session.stop().await {
                debug!("session stop skipped: id={}, error={e}", session.id());
            }
        }))
        .await;

        if let Some(hooks) = &self.hooks {
            hooks.on_stopped();
        }
        self.state.finish_stop();
        info!("server stopped: sessions_closed={count}");
        Ok(())
    }

    /// Send already-framed bytes to every running session.
    ///
    /// Returns the number of sessions that accepted the write.
    pub async fn broadcast(&self, bytes: &[u8]) -> usize {
        let sessions = self.registry.all();
        let sends = sessions
            .iter()
            .filter(|session| session.is_running())
            .map(|session| async move { session.send(bytes).await.is_ok() });
        join_all(sends).await.into_iter().filter(|sent| *sent).count()
    }

    fn dispatch(server: &Weak<Self>, stream: TcpStream, peer_addr: SocketAddr) -> ControlFlow<()> {
        match server.upgrade() {
            Some(server) => {
                server.accept_connection(stream, peer_addr);
                ControlFlow::Continue(())
            }
            None => ControlFlow::Break(()),
        }
    }

    fn reject(&self, peer_addr: SocketAddr, reason: &str) {
        warn!("connection rejected: peer_addr={peer_addr}, reason={reason}");
        metrics::inc_rejected();
    }

    fn accept_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        if let Err(e) = self.config.socket_options.apply_to_stream(&stream) {
            self.reject(peer_addr, &format!("socket options: {e}"));
            return;
        }
        // Reserve before checking: the count then includes this connection
        // and every accept racing it on other listeners.
        let Some(id) = self.registry.preoccupy_id() else {
            self.reject(peer_addr, "no free session id");
            return;
        };
        if self.registry.len() > self.config.max_connections {
            self.registry.release(&id);
            self.reject(peer_addr, "connection limit reached");
            return;
        }

        let session = Session::new(id, stream, Some(peer_addr), self.session_config.clone());
        let registry = Arc::downgrade(&self.registry);
        session.set_close_callback(move |id| {
            if let Some(registry) = registry.upgrade() {
                registry.remove(&id);
            }
        });
        if let Some(configure) = &self.configurator
            && let Err(e) = configure(&session)
        {
            self.registry.release(&id);
            self.reject(peer_addr, &format!("configurator failed: {e}"));
            return;
        }
        if !self.registry.add(id, Arc::clone(&session)) {
            self.reject(peer_addr, "session id already registered");
            return;
        }
        if let Err(e) = session.start() {
            self.registry.remove(&id);
            self.reject(peer_addr, &format!("session start failed: {e}"));
            return;
        }
        debug!("connection accepted: id={id}, peer_addr={peer_addr}");

        // A stop that snapshotted the registry before this session was added
        // will not see it.
        if !self.state.is_running() {
            tokio::spawn(async move {
                if let Err(e) = session.stop().await {
                    debug!("late session stop skipped: id={id}, error={e}");
                }
            });
        }
    }
}
