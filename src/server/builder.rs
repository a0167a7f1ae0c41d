//! Builder for [`Server`].

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::task::TaskTracker;

use super::{BackoffConfig, BoxError, Configurator, Server, ServerConfig, ServerHooks};
use crate::{
    codec::MessageCodec,
    lifecycle::{RestartPolicy, StateCell},
    registry::SessionRegistry,
    session::{Session, SessionBehavior, SessionConfig},
    socket::SocketOptions,
};

/// Collects the collaborators of a [`Server`].
///
/// A codec factory is required before [`Server::start`] succeeds; every
/// other setting has a default.
pub struct ServerBuilder<C: MessageCodec> {
    config: ServerConfig,
    session_config: SessionConfig<C>,
    configurator: Option<Configurator<C>>,
    hooks: Option<Arc<dyn ServerHooks>>,
}

impl<C: MessageCodec> Default for ServerBuilder<C> {
    fn default() -> Self { Self::new() }
}

impl<C: MessageCodec> ServerBuilder<C> {
    /// Builder with default settings and no codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            session_config: SessionConfig::new(),
            configurator: None,
            hooks: None,
        }
    }

    /// Replace every server-wide setting at once.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the per-session configuration at once.
    #[must_use]
    pub fn session_config(mut self, config: SessionConfig<C>) -> Self {
        self.session_config = config;
        self
    }

    /// Produce a fresh codec for every accepted session.
    #[must_use]
    pub fn codec_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        self.session_config = self.session_config.codec_factory(factory);
        self
    }

    /// Clone `codec` for every accepted session.
    #[must_use]
    pub fn codec(mut self, codec: C) -> Self
    where
        C: Clone,
    {
        self.session_config = self.session_config.codec(codec);
        self
    }

    /// Callbacks shared by every accepted session.
    #[must_use]
    pub fn behavior<B: SessionBehavior<C>>(mut self, behavior: B) -> Self {
        self.session_config = self.session_config.behavior(behavior);
        self
    }

    /// Shared callbacks, when the caller keeps a handle to them.
    #[must_use]
    pub fn shared_behavior(mut self, behavior: Arc<dyn SessionBehavior<C>>) -> Self {
        self.session_config = self.session_config.shared_behavior(behavior);
        self
    }

    /// Run `configure` on every new session before it is registered.
    ///
    /// An error closes the connection and releases its reserved id.
    #[must_use]
    pub fn configurator<F>(mut self, configure: F) -> Self
    where
        F: Fn(&Arc<Session<C>>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.configurator = Some(Arc::new(configure));
        self
    }

    /// Observe the server's own start and stop.
    #[must_use]
    pub fn hooks<H: ServerHooks>(mut self, hooks: H) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Cap on registered sessions.
    #[must_use]
    pub fn max_connections(mut self, limit: usize) -> Self {
        self.config = self.config.max_connections(limit);
        self
    }

    /// Options applied to listening sockets and accepted connections.
    #[must_use]
    pub fn socket_options(mut self, options: SocketOptions) -> Self {
        self.config = self.config.socket_options(options);
        self
    }

    /// Pacing for retries after `accept()` failures.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config = self.config.backoff(backoff);
        self
    }

    /// What a failed start leaves behind, for the server and its sessions.
    #[must_use]
    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.config = self.config.restart_policy(policy);
        self.session_config = self.session_config.restart_policy(policy);
        self
    }

    /// Finish building. The server starts in `None`.
    #[must_use]
    pub fn build(self) -> Arc<Server<C>> {
        Arc::new(Server {
            state: StateCell::new(),
            config: self.config,
            session_config: self.session_config,
            configurator: self.configurator,
            hooks: self.hooks,
            registry: Arc::new(SessionRegistry::new()),
            listeners: DashMap::new(),
            tracker: TaskTracker::new(),
        })
    }
}
