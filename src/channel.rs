//! Framed I/O over one live byte stream.
//!
//! [`ConnectionChannel::new`] splits a stream into a write side, guarded by
//! an async mutex so concurrent sends never interleave, and a
//! [`ReceiveLoop`] that reads, decodes, and dispatches messages in arrival
//! order. Every way out of the loop (local close, end of stream, read or
//! decode failure, a panicking handler) funnels through one finalizer that
//! reports [`ChannelEvents::on_closed`] exactly once.

use std::{
    io,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use futures::FutureExt;
use log::{debug, error, warn};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    select,
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{CodecError, FrameDecoder, MessageCodec},
    metrics::{self, Direction},
    panic::panic_message,
};

/// Bytes reserved ahead of each read.
const READ_CHUNK: usize = 8 * 1024;

/// Byte streams a channel can drive.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Why a receive loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The local side closed the channel.
    Local,
    /// The peer closed its end of the stream.
    PeerClosed,
    /// A read, decode, or handler failure ended the loop.
    Error,
}

/// Failures reported to [`ChannelEvents::on_error`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// Inbound bytes could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The stream failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// A message handler panicked.
    #[error("message handler panicked: {0}")]
    Panicked(String),
}

/// Failures returned by [`ConnectionChannel::send`].
#[derive(Debug, Error)]
pub enum SendError {
    /// The channel (or its owner) is not running.
    #[error("channel is not running")]
    NotRunning,
    /// The message could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Writing to the stream failed.
    #[error("send failed: {0}")]
    Io(#[from] io::Error),
}

/// Observer for a [`ReceiveLoop`].
#[async_trait]
pub trait ChannelEvents<M>: Send + Sync + 'static {
    /// A complete message arrived. The loop waits for this call to return
    /// before decoding the next message.
    async fn on_message(&self, message: M);

    /// The loop is about to end because of `error`.
    fn on_error(&self, error: &SessionError);

    /// The loop has ended. Called exactly once per loop.
    async fn on_closed(&self, reason: CloseReason);
}

/// Traffic counters for one channel.
#[derive(Debug, Default)]
pub struct ChannelStats {
    bytes_received: AtomicU64,
    bytes_consumed: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
}

/// Point-in-time copy of [`ChannelStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Bytes read from the stream.
    pub bytes_received: u64,
    /// Bytes consumed by decoded frames.
    pub bytes_consumed: u64,
    /// Bytes written to the stream.
    pub bytes_sent: u64,
    /// Messages decoded.
    pub messages_received: u64,
    /// Messages encoded and written.
    pub messages_sent: u64,
}

impl ChannelStats {
    /// Copy the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_consumed: self.bytes_consumed.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
        }
    }

    fn add(counter: &AtomicU64, amount: usize) {
        counter.fetch_add(u64::try_from(amount).unwrap_or(u64::MAX), Ordering::Relaxed);
    }
}

/// Write side of a framed stream.
pub struct ConnectionChannel<C: MessageCodec> {
    codec: Arc<C>,
    writer: Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>,
    shutdown: CancellationToken,
    faulted: Arc<AtomicBool>,
    stats: Arc<ChannelStats>,
}

impl<C: MessageCodec> std::fmt::Debug for ConnectionChannel<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionChannel")
            .field("closed", &self.shutdown.is_cancelled())
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl<C: MessageCodec> ConnectionChannel<C> {
    /// Split `stream` into a channel and the receive loop that drains it.
    ///
    /// The loop does nothing until [`ReceiveLoop::run`] is awaited, usually
    /// on a spawned task.
    pub fn new<S: Transport>(stream: S, codec: Arc<C>) -> (Self, ReceiveLoop<C>) {
        let (reader, writer) = tokio::io::split(stream);
        let shutdown = CancellationToken::new();
        let faulted = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(ChannelStats::default());
        let receive = ReceiveLoop {
            reader: Box::new(reader),
            decoder: FrameDecoder::from_shared(Arc::clone(&codec)),
            shutdown: shutdown.clone(),
            faulted: Arc::clone(&faulted),
            stats: Arc::clone(&stats),
        };
        let channel = Self {
            codec,
            writer: Mutex::new(Some(Box::new(writer))),
            shutdown,
            faulted,
            stats,
        };
        (channel, receive)
    }

    /// Codec shared with the receive loop.
    #[must_use]
    pub fn codec(&self) -> &Arc<C> { &self.codec }

    /// Traffic counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<ChannelStats> { &self.stats }

    /// Returns `true` once [`close`](Self::close) ran or a send failed.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.shutdown.is_cancelled() }

    /// Write already-framed bytes.
    ///
    /// Concurrent sends are serialized; each call's bytes reach the stream
    /// contiguously.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotRunning`] once the channel is closed, including
    /// when [`close`](Self::close) interrupts a write that is still pending,
    /// and [`SendError::Io`] when the write fails. A failed write closes the
    /// channel and ends the receive loop with [`CloseReason::Error`].
    pub async fn send(&self, bytes: &[u8]) -> Result<usize, SendError> {
        if self.shutdown.is_cancelled() {
            return Err(SendError::NotRunning);
        }
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SendError::NotRunning)?;
        // A peer that stops reading must not hold the lock past `close`.
        let written = select! {
            biased;

            () = self.shutdown.cancelled() => return Err(SendError::NotRunning),
            res = async {
                writer.write_all(bytes).await?;
                writer.flush().await
            } => res,
        };
        if let Err(e) = written {
            guard.take();
            self.faulted.store(true, Ordering::Release);
            self.shutdown.cancel();
            return Err(e.into());
        }
        ChannelStats::add(&self.stats.bytes_sent, bytes.len());
        Ok(bytes.len())
    }

    /// Encode `message` with the channel's codec and send it.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Codec`] when encoding fails, otherwise as
    /// [`send`](Self::send).
    pub async fn send_message(&self, message: &C::Message) -> Result<usize, SendError> {
        let mut frame = BytesMut::new();
        self.codec.encode(message, &mut frame)?;
        let written = self.send(&frame).await?;
        ChannelStats::add(&self.stats.messages_sent, 1);
        metrics::inc_frames(Direction::Outbound);
        Ok(written)
    }

    /// Stop the receive loop and shut down the write side.
    ///
    /// Idempotent. An in-flight send is abandoned, so the peer may see a
    /// truncated final frame.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.shutdown().await
        {
            debug!("write shutdown failed: error={e}");
        }
    }
}

/// Read side of a framed stream.
pub struct ReceiveLoop<C: MessageCodec> {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    decoder: FrameDecoder<C>,
    shutdown: CancellationToken,
    faulted: Arc<AtomicBool>,
    stats: Arc<ChannelStats>,
}

impl<C: MessageCodec> ReceiveLoop<C> {
    /// Read and dispatch until the stream ends or the channel is closed.
    ///
    /// Returns the reason already reported through
    /// [`ChannelEvents::on_closed`].
    pub async fn run(self, events: Arc<dyn ChannelEvents<C::Message>>) -> CloseReason {
        let shutdown = self.shutdown.clone();
        let outcome = AssertUnwindSafe(self.drive(events.as_ref()))
            .catch_unwind()
            .await;
        let reason = match outcome {
            Ok(Ok(reason)) => reason,
            Ok(Err(err)) => {
                warn!("receive loop failed: error={err}");
                metrics::inc_errors();
                events.on_error(&err);
                CloseReason::Error
            }
            Err(payload) => {
                let panic_msg = panic_message(&*payload).to_owned();
                error!("message handler panicked: panic={panic_msg}");
                tracing::error!(panic = %panic_msg, "message handler panicked");
                metrics::inc_errors();
                events.on_error(&SessionError::Panicked(panic_msg));
                CloseReason::Error
            }
        };
        shutdown.cancel();
        events.on_closed(reason).await;
        reason
    }

    async fn drive(mut self, events: &dyn ChannelEvents<C::Message>) -> Result<CloseReason, SessionError> {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        loop {
            buf.reserve(READ_CHUNK);
            let read = select! {
                biased;

                () = self.shutdown.cancelled() => None,
                res = self.reader.read_buf(&mut buf) => Some(res),
            };
            let Some(read) = read else {
                return Ok(self.cancelled_reason());
            };
            let read = read?;
            if read == 0 {
                if !buf.is_empty() {
                    let residual = buf.len();
                    warn!("peer closed mid-frame: residual_bytes={residual}");
                    tracing::warn!(residual_bytes = residual, "peer closed mid-frame");
                }
                return Ok(CloseReason::PeerClosed);
            }
            ChannelStats::add(&self.stats.bytes_received, read);

            // Bytes are only released once the frames they hold have been
            // dispatched; a partial frame stays at the front of `buf`.
            let mut consumed = 0;
            while let Some(rest) = buf.get(consumed..).filter(|rest| !rest.is_empty()) {
                let filtered = self.decoder.filter(rest).inspect_err(|e| {
                    debug!("frame rejected: kind={}, offset={consumed}", e.error_type());
                })?;
                let Some(filtered) = filtered else {
                    break;
                };
                consumed += filtered.consumed;
                ChannelStats::add(&self.stats.bytes_consumed, filtered.consumed);
                ChannelStats::add(&self.stats.messages_received, 1);
                metrics::inc_frames(Direction::Inbound);
                if self.shutdown.is_cancelled() {
                    return Ok(self.cancelled_reason());
                }
                events.on_message(filtered.message).await;
            }
            buf.advance(consumed);
        }
    }

    fn cancelled_reason(&self) -> CloseReason {
        if self.faulted.load(Ordering::Acquire) {
            CloseReason::Error
        } else {
            CloseReason::Local
        }
    }
}
