//! Outbound side: one connection wrapped in one [`Session`].
//!
//! A [`Client`] follows the same lifecycle as sessions and servers. When the
//! peer closes the connection the client moves to `Stopped` on its own,
//! through the session's close callback.

use std::{
    fmt,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use log::{debug, info, warn};
use tokio::{net::TcpSocket, time::timeout};

use crate::{
    channel::{SendError, StatsSnapshot},
    codec::MessageCodec,
    lifecycle::{LifecycleError, LifecycleState, RestartPolicy, StateCell, StopTicket},
    registry::SessionId,
    session::{Session, SessionConfig},
    socket::SocketOptions,
};

mod builder;
mod error;

pub use builder::ClientBuilder;
pub use error::ClientError;

/// TCP client driving a single session.
///
/// # Examples
///
/// ```no_run
/// use std::net::SocketAddr;
///
/// use bytes::Bytes;
/// use wiresession::{client::Client, codec::FixedHeaderCodec};
///
/// # async fn run(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::builder().codec(FixedHeaderCodec::default()).build();
/// client.connect(addr).await?;
/// client.send_message(&Bytes::from_static(b"Hello World")).await?;
/// client.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Client<C: MessageCodec> {
    state: Arc<StateCell>,
    session_config: SessionConfig<C>,
    socket_options: SocketOptions,
    connect_timeout: Option<Duration>,
    restart_policy: RestartPolicy,
    session: Mutex<Option<Arc<Session<C>>>>,
}

impl<C: MessageCodec> fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state.get())
            .field("session", &self.session())
            .finish_non_exhaustive()
    }
}

/// Move a client whose session ended to `Stopped`.
fn retire(state: &StateCell) {
    if state.begin_stop() == StopTicket::Won {
        state.finish_stop();
    }
}

impl<C: MessageCodec> Client<C> {
    /// Start configuring a client.
    #[must_use]
    pub fn builder() -> ClientBuilder<C> { ClientBuilder::new() }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState { self.state.get() }

    /// The connected session, once [`connect`](Self::connect) succeeded.
    #[must_use]
    pub fn session(&self) -> Option<Arc<Session<C>>> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Traffic counters of the connected session.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.session()
            .map(|session| session.stats())
            .unwrap_or_default()
    }

    /// Connect to `addr` and start the session.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] or [`ClientError::Timeout`] when the
    /// connection cannot be established and [`ClientError::Lifecycle`] when
    /// the client is not in `None` or has no codec factory. A failed connect
    /// reverts the state according to the configured [`RestartPolicy`].
    pub async fn connect(&self, addr: SocketAddr) -> Result<(), ClientError> {
        self.state.begin_start()?;
        let result = self.try_connect(addr).await;
        if let Err(err) = &result {
            let state = self.state.abort_start(self.restart_policy);
            warn!("client connect failed: addr={addr}, error={err}, state={state}");
        }
        result
    }

    async fn try_connect(&self, addr: SocketAddr) -> Result<(), ClientError> {
        if !self.session_config.has_codec_factory() {
            return Err(LifecycleError::ConfigurationMissing("codec factory").into());
        }
        let connect_err = |source| ClientError::Connect { addr, source };
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(connect_err)?;
        self.socket_options.apply(&socket).map_err(connect_err)?;
        let stream = match self.connect_timeout {
            Some(after) => timeout(after, socket.connect(addr))
                .await
                .map_err(|_| ClientError::Timeout { addr, after })?,
            None => socket.connect(addr).await,
        }
        .map_err(connect_err)?;

        let session = Session::new(
            SessionId::generate(),
            stream,
            Some(addr),
            self.session_config.clone(),
        );
        let state = Arc::clone(&self.state);
        session.set_close_callback(move |id| {
            debug!("client session closed: id={id}");
            retire(&state);
        });
        session.start()?;
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&session));
        self.state.finish_start()?;

        // The session may have closed before the client reached `Running`,
        // in which case its callback found nothing to retire.
        if session.state().is_winding_down() {
            retire(&self.state);
        }
        info!("client connected: addr={addr}, id={}", session.id());
        Ok(())
    }

    /// Stop the session. The close callback moves the client to `Stopped`.
    ///
    /// Idempotent once the client is stopping.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidState`] if the client never
    /// connected.
    pub async fn stop(&self) -> Result<(), ClientError> {
        let actual = self.state.get();
        if actual.is_winding_down() {
            return Ok(());
        }
        let session = match (actual, self.session()) {
            (LifecycleState::Running, Some(session)) => session,
            _ => {
                return Err(LifecycleError::InvalidState {
                    expected: LifecycleState::Running,
                    actual,
                }
                .into());
            }
        };
        session.stop().await?;
        Ok(())
    }

    /// Wait until the session has closed. Returns at once if the client
    /// never connected.
    pub async fn closed(&self) {
        if let Some(session) = self.session() {
            session.closed().await;
        }
    }

    /// Send already-framed bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotRunning`] unless the client is connected.
    pub async fn send(&self, bytes: &[u8]) -> Result<usize, SendError> {
        self.running_session()?.send(bytes).await
    }

    /// Encode `message` with the client's codec and send it.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus [`SendError::Codec`] when encoding
    /// fails.
    pub async fn send_message(&self, message: &C::Message) -> Result<usize, SendError> {
        self.running_session()?.send_message(message).await
    }

    fn running_session(&self) -> Result<Arc<Session<C>>, SendError> {
        if !self.state.is_running() {
            return Err(SendError::NotRunning);
        }
        self.session().ok_or(SendError::NotRunning)
    }
}
