//! Session lifecycle over a single connection.
//!
//! A [`Session`] owns one [`ConnectionChannel`] and walks the shared
//! lifecycle (`None -> Starting -> Running -> Stopping -> Stopped`). Every
//! transition is a compare-and-swap on a [`StateCell`], so when `stop` races
//! with a peer disconnect or a decode failure exactly one path runs the
//! teardown: [`SessionBehavior::on_stopped`], the owner's close callback, and
//! the final move to `Stopped` each happen at most once.

use std::{
    fmt,
    io,
    net::SocketAddr,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        OnceLock,
        PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    channel::{
        ChannelEvents,
        CloseReason,
        ConnectionChannel,
        SendError,
        SessionError,
        StatsSnapshot,
        Transport,
    },
    codec::{CodecFactory, MessageCodec},
    lifecycle::{LifecycleError, LifecycleState, RestartPolicy, StateCell, StopTicket},
    metrics,
    registry::SessionId,
};

tokio::task_local! {
    /// Id of the session whose receive loop is running on this task.
    static RECEIVE_LOOP: SessionId;
}

/// Callback run once when a session reaches its terminal state.
pub type CloseCallback = Box<dyn FnOnce(SessionId) + Send>;

/// Application callbacks for one session.
///
/// Only [`on_received`](Self::on_received) is required; every other hook
/// defaults to a no-op.
#[async_trait]
pub trait SessionBehavior<C: MessageCodec>: Send + Sync + 'static {
    /// Runs once the session's collaborators are in place, before its
    /// channel exists.
    fn on_start_before(&self, _session: &Arc<Session<C>>) {}

    /// Runs once the session is running, before its receive loop dispatches
    /// the first message.
    fn on_start_after(&self, _session: &Arc<Session<C>>) {}

    /// Handles one decoded message. The next message is not decoded until
    /// this returns.
    async fn on_received(&self, session: &Arc<Session<C>>, message: C::Message);

    /// Reports a failure that is about to close the session.
    fn on_error(&self, _session: &Arc<Session<C>>, _error: &SessionError) {}

    /// Runs once during teardown, before the owner is notified.
    async fn on_stopped(&self, _session: &Arc<Session<C>>, _reason: CloseReason) {}
}

/// Collaborators a session needs before it can start.
pub struct SessionConfig<C: MessageCodec> {
    codec_factory: Option<CodecFactory<C>>,
    behavior: Option<Arc<dyn SessionBehavior<C>>>,
    restart_policy: RestartPolicy,
}

impl<C: MessageCodec> Default for SessionConfig<C> {
    fn default() -> Self {
        Self {
            codec_factory: None,
            behavior: None,
            restart_policy: RestartPolicy::default(),
        }
    }
}

impl<C: MessageCodec> Clone for SessionConfig<C> {
    fn clone(&self) -> Self {
        Self {
            codec_factory: self.codec_factory.clone(),
            behavior: self.behavior.clone(),
            restart_policy: self.restart_policy,
        }
    }
}

impl<C: MessageCodec> fmt::Debug for SessionConfig<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("codec_factory", &self.codec_factory.is_some())
            .field("behavior", &self.behavior.is_some())
            .field("restart_policy", &self.restart_policy)
            .finish()
    }
}

impl<C: MessageCodec> SessionConfig<C> {
    /// Empty configuration; a codec factory must be supplied before start.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Produce a fresh codec for every session with `factory`.
    #[must_use]
    pub fn codec_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        self.codec_factory = Some(Arc::new(factory));
        self
    }

    /// Clone `codec` for every session.
    #[must_use]
    pub fn codec(self, codec: C) -> Self
    where
        C: Clone,
    {
        self.codec_factory(move || codec.clone())
    }

    /// Install the application callbacks.
    #[must_use]
    pub fn behavior<B: SessionBehavior<C>>(self, behavior: B) -> Self {
        self.shared_behavior(Arc::new(behavior))
    }

    /// Install callbacks shared with other sessions.
    #[must_use]
    pub fn shared_behavior(mut self, behavior: Arc<dyn SessionBehavior<C>>) -> Self {
        self.behavior = Some(behavior);
        self
    }

    /// Choose what a failed start leaves behind.
    #[must_use]
    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Returns `true` if a codec factory has been configured.
    #[must_use]
    pub fn has_codec_factory(&self) -> bool { self.codec_factory.is_some() }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> { mutex.lock().unwrap_or_else(PoisonError::into_inner) }

/// One connection and the state machine guarding it.
pub struct Session<C: MessageCodec> {
    id: SessionId,
    peer_addr: Option<SocketAddr>,
    state: StateCell,
    restart_policy: RestartPolicy,
    codec_factory: Mutex<Option<CodecFactory<C>>>,
    behavior: Mutex<Option<Arc<dyn SessionBehavior<C>>>>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    channel: OnceLock<ConnectionChannel<C>>,
    on_close: Mutex<Option<CloseCallback>>,
    loop_spawned: AtomicBool,
    loop_finished: CancellationToken,
    terminated: CancellationToken,
    span: tracing::Span,
}

impl<C: MessageCodec> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl<C: MessageCodec> Session<C> {
    /// Wrap `stream` in a session that has not started yet.
    pub fn new<S: Transport>(
        id: SessionId,
        stream: S,
        peer_addr: Option<SocketAddr>,
        config: SessionConfig<C>,
    ) -> Arc<Self> {
        let SessionConfig {
            codec_factory,
            behavior,
            restart_policy,
        } = config;
        Arc::new(Self {
            id,
            peer_addr,
            state: StateCell::new(),
            restart_policy,
            codec_factory: Mutex::new(codec_factory),
            behavior: Mutex::new(behavior),
            transport: Mutex::new(Some(Box::new(stream))),
            channel: OnceLock::new(),
            on_close: Mutex::new(None),
            loop_spawned: AtomicBool::new(false),
            loop_finished: CancellationToken::new(),
            terminated: CancellationToken::new(),
            span: tracing::info_span!("session", id = %id, peer_addr = ?peer_addr),
        })
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId { self.id }

    /// Remote address, when the transport has one.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.peer_addr }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState { self.state.get() }

    /// Returns `true` while the session is running.
    #[must_use]
    pub fn is_running(&self) -> bool { self.state.is_running() }

    /// Traffic counters; all zero before the channel exists.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.channel
            .get()
            .map(|channel| channel.stats().snapshot())
            .unwrap_or_default()
    }

    /// Replace the application callbacks. Takes effect at the next start.
    pub fn set_behavior(&self, behavior: Arc<dyn SessionBehavior<C>>) { *lock(&self.behavior) = Some(behavior); }

    /// Replace the codec factory. Takes effect at the next start.
    pub fn set_codec_factory(&self, factory: CodecFactory<C>) { *lock(&self.codec_factory) = Some(factory); }

    /// Run `callback` once when the session reaches `Stopped`.
    ///
    /// Owners use this to deregister the session.
    pub fn set_close_callback(&self, callback: impl FnOnce(SessionId) + Send + 'static) {
        *lock(&self.on_close) = Some(Box::new(callback));
    }

    fn behavior(&self) -> Option<Arc<dyn SessionBehavior<C>>> { lock(&self.behavior).clone() }

    fn inside_own_loop(&self) -> bool { RECEIVE_LOOP.try_with(|id| *id == self.id).unwrap_or(false) }

    /// Start the session and spawn its receive loop.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Terminated`] once the session is stopping
    /// or stopped, [`LifecycleError::InvalidState`] if it already started,
    /// and [`LifecycleError::ConfigurationMissing`] when no codec factory is
    /// configured. A failed start reverts the state according to the
    /// configured [`RestartPolicy`].
    pub fn start(self: &Arc<Self>) -> Result<(), LifecycleError> {
        self.state.begin_start()?;
        let _entered = self.span.enter();
        self.try_start().inspect_err(|err| {
            let state = self.state.abort_start(self.restart_policy);
            warn!("session start failed: id={}, error={err}, state={state}", self.id);
            if state.is_terminal() {
                self.terminated.cancel();
            }
        })
    }

    fn try_start(self: &Arc<Self>) -> Result<(), LifecycleError> {
        let factory = lock(&self.codec_factory)
            .clone()
            .ok_or(LifecycleError::ConfigurationMissing("codec factory"))?;
        let stream = lock(&self.transport)
            .take()
            .ok_or(LifecycleError::ConfigurationMissing("transport"))?;
        let behavior = self.behavior();
        match &behavior {
            Some(behavior) => behavior.on_start_before(self),
            None => warn!("session has no behavior; inbound messages will be dropped: id={}", self.id),
        }

        let (channel, receive) = ConnectionChannel::new(stream, Arc::new(factory()));
        self.channel.get_or_init(|| channel);
        self.state.finish_start()?;
        metrics::inc_sessions();
        debug!("session running: id={}, peer_addr={:?}", self.id, self.peer_addr);

        // Handlers must not see a message before the start callback has run.
        if let Some(behavior) = &behavior {
            behavior.on_start_after(self);
        }

        self.loop_spawned.store(true, Ordering::Release);
        let events = Arc::new(SessionEvents {
            session: Arc::clone(self),
        });
        let finished = self.loop_finished.clone();
        let task = RECEIVE_LOOP.scope(self.id, async move {
            receive.run(events).await;
            finished.cancel();
        });
        tokio::spawn(task.instrument(self.span.clone()));
        Ok(())
    }

    /// Stop the session and wait for its receive loop to finish.
    ///
    /// Only the first caller tears down; concurrent and later callers return
    /// `Ok(())` immediately. Calling this from inside
    /// [`SessionBehavior::on_received`] is allowed and does not wait for the
    /// loop that is running the handler.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidState`] if the session never reached
    /// `Running`.
    pub async fn stop(self: &Arc<Self>) -> Result<(), LifecycleError> {
        match self.state.begin_stop() {
            StopTicket::Won => {}
            StopTicket::AlreadyStopping => return Ok(()),
            StopTicket::NotRunning(actual) => {
                return Err(LifecycleError::InvalidState {
                    expected: LifecycleState::Running,
                    actual,
                });
            }
        }
        if let Some(channel) = self.channel.get() {
            channel.close().await;
        }
        if self.loop_spawned.load(Ordering::Acquire) && !self.inside_own_loop() {
            self.loop_finished.cancelled().await;
        }
        self.finish_teardown(CloseReason::Local).await;
        Ok(())
    }

    /// Wait until the session reaches `Stopped`.
    ///
    /// Never completes for a session that is not started.
    pub async fn closed(&self) { self.terminated.cancelled().await; }

    /// Send already-framed bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotRunning`] unless the session is running and
    /// [`SendError::Io`] if the write fails. Write failures are also reported
    /// to [`SessionBehavior::on_error`] and close the session.
    pub async fn send(self: &Arc<Self>, bytes: &[u8]) -> Result<usize, SendError> {
        let channel = self.running_channel()?;
        let result = channel.send(bytes).await;
        self.report_send_failure(&result);
        result
    }

    /// Encode `message` with the session's codec and send it.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus [`SendError::Codec`] when encoding
    /// fails.
    pub async fn send_message(self: &Arc<Self>, message: &C::Message) -> Result<usize, SendError> {
        let channel = self.running_channel()?;
        let result = channel.send_message(message).await;
        self.report_send_failure(&result);
        result
    }

    fn running_channel(&self) -> Result<&ConnectionChannel<C>, SendError> {
        if !self.state.is_running() {
            return Err(SendError::NotRunning);
        }
        self.channel.get().ok_or(SendError::NotRunning)
    }

    fn report_send_failure(self: &Arc<Self>, result: &Result<usize, SendError>) {
        let Err(SendError::Io(e)) = result else {
            return;
        };
        warn!("session send failed: id={}, error={e}", self.id);
        metrics::inc_errors();
        if let Some(behavior) = self.behavior() {
            let error = SessionError::Io(io::Error::new(e.kind(), e.to_string()));
            behavior.on_error(self, &error);
        }
    }

    async fn finish_teardown(self: &Arc<Self>, reason: CloseReason) {
        if let Some(behavior) = self.behavior() {
            behavior.on_stopped(self, reason).await;
        }
        let callback = lock(&self.on_close).take();
        if let Some(callback) = callback {
            callback(self.id);
        }
        metrics::dec_sessions();
        self.state.finish_stop();
        info!("session stopped: id={}, reason={reason:?}", self.id);
        self.terminated.cancel();
    }
}

/// Bridges channel events into the owning session.
struct SessionEvents<C: MessageCodec> {
    session: Arc<Session<C>>,
}

#[async_trait]
impl<C: MessageCodec> ChannelEvents<C::Message> for SessionEvents<C> {
    async fn on_message(&self, message: C::Message) {
        match self.session.behavior() {
            Some(behavior) => behavior.on_received(&self.session, message).await,
            None => debug!("dropping message without behavior: id={}", self.session.id),
        }
    }

    fn on_error(&self, error: &SessionError) {
        if let Some(behavior) = self.session.behavior() {
            behavior.on_error(&self.session, error);
        }
    }

    async fn on_closed(&self, reason: CloseReason) {
        let session = &self.session;
        if session.state.begin_stop() != StopTicket::Won {
            return;
        }
        debug!("session closed by channel: id={}, reason={reason:?}", session.id);
        if let Some(channel) = session.channel.get() {
            channel.close().await;
        }
        session.finish_teardown(reason).await;
    }
}
