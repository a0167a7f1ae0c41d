//! Builder for [`Client`].

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use super::Client;
use crate::{
    codec::MessageCodec,
    lifecycle::{RestartPolicy, StateCell},
    session::{SessionBehavior, SessionConfig},
    socket::SocketOptions,
};

/// Collects the collaborators of a [`Client`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use wiresession::{client::Client, codec::FixedHeaderCodec, lifecycle::LifecycleState};
///
/// let client = Client::builder()
///     .codec(FixedHeaderCodec::default())
///     .nodelay(true)
///     .connect_timeout(Duration::from_secs(2))
///     .build();
/// assert_eq!(client.state(), LifecycleState::None);
/// ```
pub struct ClientBuilder<C: MessageCodec> {
    session_config: SessionConfig<C>,
    socket_options: SocketOptions,
    connect_timeout: Option<Duration>,
    restart_policy: RestartPolicy,
}

impl<C: MessageCodec> Default for ClientBuilder<C> {
    fn default() -> Self { Self::new() }
}

impl<C: MessageCodec> ClientBuilder<C> {
    /// Builder with default settings and no codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_config: SessionConfig::new(),
            socket_options: SocketOptions::default(),
            connect_timeout: None,
            restart_policy: RestartPolicy::default(),
        }
    }

    /// Produce the session codec with `factory`.
    #[must_use]
    pub fn codec_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        self.session_config = self.session_config.codec_factory(factory);
        self
    }

    /// Use a clone of `codec` for the session.
    #[must_use]
    pub fn codec(mut self, codec: C) -> Self
    where
        C: Clone,
    {
        self.session_config = self.session_config.codec(codec);
        self
    }

    /// Callbacks for inbound messages and lifecycle events.
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

    /// Replace the socket options applied before connecting.
    #[must_use]
    pub fn socket_options(mut self, options: SocketOptions) -> Self {
        self.socket_options = options;
        self
    }

    /// Configure `TCP_NODELAY` for the connection.
    #[must_use]
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.socket_options = self.socket_options.nodelay(enabled);
        self
    }

    /// Configure `SO_KEEPALIVE` for the connection.
    #[must_use]
    pub fn keepalive(mut self, idle: Option<Duration>) -> Self {
        self.socket_options = self.socket_options.keepalive(idle);
        self
    }

    /// Give up connecting after `limit`.
    #[must_use]
    pub fn connect_timeout(mut self, limit: Duration) -> Self {
        self.connect_timeout = Some(limit);
        self
    }

    /// What a failed connect leaves behind, for the client and its session.
    #[must_use]
    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self.session_config = self.session_config.restart_policy(policy);
        self
    }

    /// Finish building. The client starts in `None`.
    #[must_use]
    pub fn build(self) -> Client<C> {
        Client {
            state: Arc::new(StateCell::new()),
            session_config: self.session_config,
            socket_options: self.socket_options,
            connect_timeout: self.connect_timeout,
            restart_policy: self.restart_policy,
            session: Mutex::new(None),
        }
    }
}
