//! Session behaviors that record what they observe.

use std::{
    pin::pin,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{sync::Notify, time::timeout};
use wiresession::{CloseReason, FixedHeaderCodec, Session, SessionBehavior, SessionError};

/// Writes every message back to its sender.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoBehavior;

#[async_trait]
impl SessionBehavior<FixedHeaderCodec> for EchoBehavior {
    async fn on_received(&self, session: &Arc<Session<FixedHeaderCodec>>, message: Bytes) {
        if let Err(err) = session.send_message(&message).await {
            log::warn!("echo failed: id={}, error={err}", session.id());
        }
    }
}

#[derive(Default)]
struct Recorded {
    echo: bool,
    started: Mutex<usize>,
    messages: Mutex<Vec<Bytes>>,
    errors: Mutex<Vec<String>>,
    stops: Mutex<Vec<CloseReason>>,
    changed: Notify,
}

/// Records messages, errors and close reasons, optionally echoing messages.
///
/// Clones share the same record, so a test can keep one handle and give the
/// other to a server or client builder.
#[derive(Clone, Default)]
pub struct RecordingBehavior {
    inner: Arc<Recorded>,
}

fn snapshot<T: Clone>(items: &Mutex<Vec<T>>) -> Vec<T> {
    items.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

impl RecordingBehavior {
    /// Record without replying.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Record and echo every message.
    #[must_use]
    pub fn echoing() -> Self {
        Self {
            inner: Arc::new(Recorded {
                echo: true,
                ..Recorded::default()
            }),
        }
    }

    /// Number of sessions that finished starting.
    #[must_use]
    pub fn started(&self) -> usize { *self.inner.started.lock().unwrap_or_else(PoisonError::into_inner) }

    /// Messages received so far, in arrival order.
    #[must_use]
    pub fn messages(&self) -> Vec<Bytes> { snapshot(&self.inner.messages) }

    /// Errors reported so far, rendered with `Display`.
    #[must_use]
    pub fn errors(&self) -> Vec<String> { snapshot(&self.inner.errors) }

    /// Close reasons of every session that stopped.
    #[must_use]
    pub fn stops(&self) -> Vec<CloseReason> { snapshot(&self.inner.stops) }

    /// Wait until `done` holds for this record, or `limit` elapses.
    ///
    /// Returns whether the condition was met.
    pub async fn wait_until(&self, limit: Duration, mut done: impl FnMut(&Self) -> bool) -> bool {
        let waiting = async {
            loop {
                let mut notified = pin!(self.inner.changed.notified());
                notified.as_mut().enable();
                if done(self) {
                    return;
                }
                notified.await;
            }
        };
        timeout(limit, waiting).await.is_ok()
    }

    /// Wait for at least `count` messages and return them.
    ///
    /// # Panics
    ///
    /// Panics if they do not arrive within five seconds.
    pub async fn expect_messages(&self, count: usize) -> Vec<Bytes> {
        let arrived = self
            .wait_until(Duration::from_secs(5), |rec| rec.messages().len() >= count)
            .await;
        assert!(arrived, "expected {count} messages, got {:?}", self.messages());
        self.messages()
    }

    /// Wait for at least `count` stopped sessions and return their reasons.
    ///
    /// # Panics
    ///
    /// Panics if they do not stop within five seconds.
    pub async fn expect_stops(&self, count: usize) -> Vec<CloseReason> {
        let stopped = self
            .wait_until(Duration::from_secs(5), |rec| rec.stops().len() >= count)
            .await;
        assert!(stopped, "expected {count} stops, got {:?}", self.stops());
        self.stops()
    }

    fn record<T>(&self, items: &Mutex<Vec<T>>, item: T) {
        items.lock().unwrap_or_else(PoisonError::into_inner).push(item);
        self.inner.changed.notify_waiters();
    }
}

#[async_trait]
impl SessionBehavior<FixedHeaderCodec> for RecordingBehavior {
    fn on_start_after(&self, _session: &Arc<Session<FixedHeaderCodec>>) {
        *self.inner.started.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.inner.changed.notify_waiters();
    }

    async fn on_received(&self, session: &Arc<Session<FixedHeaderCodec>>, message: Bytes) {
        self.record(&self.inner.messages, message.clone());
        if self.inner.echo
            && let Err(err) = session.send_message(&message).await
        {
            log::warn!("echo failed: id={}, error={err}", session.id());
        }
    }

    fn on_error(&self, _session: &Arc<Session<FixedHeaderCodec>>, error: &SessionError) {
        self.record(&self.inner.errors, error.to_string());
    }

    async fn on_stopped(&self, _session: &Arc<Session<FixedHeaderCodec>>, reason: CloseReason) {
        self.record(&self.inner.stops, reason);
    }
}
