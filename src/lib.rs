#![doc(html_root_url = "https://docs.rs/wiresession/latest")]
//! Session-oriented TCP servers and clients over length-prefixed framing.
//!
//! A [`Server`] accepts connections on any number of listeners and wraps
//! each one in a [`Session`]; a [`Client`] does the same for one outbound
//! connection. Sessions decode inbound bytes with a [`MessageCodec`] and hand
//! every message to a [`SessionBehavior`].

pub mod byte_order;
pub mod channel;
#[cfg(not(loom))]
pub mod client;
pub mod codec;
pub mod lifecycle;
pub mod metrics;
pub mod panic;
pub mod registry;
#[cfg(not(loom))]
pub mod server;
pub mod session;
pub mod socket;

pub use byte_order::ByteOrder;
pub use channel::{CloseReason, ConnectionChannel, SendError, SessionError, StatsSnapshot};
#[cfg(not(loom))]
pub use client::{Client, ClientBuilder, ClientError};
pub use codec::{CodecError, FixedHeaderCodec, FrameDecoder, MessageCodec};
pub use lifecycle::{LifecycleError, LifecycleState, RestartPolicy};
pub use metrics::{CONNECTIONS_REJECTED, Direction, ERRORS_TOTAL, FRAMES_PROCESSED, SESSIONS_ACTIVE};
pub use registry::{SessionId, SessionRegistry};
#[cfg(not(loom))]
pub use server::{ListenerConfig, Server, ServerBuilder, ServerError, ServerHooks};
pub use session::{Session, SessionBehavior, SessionConfig};
pub use socket::SocketOptions;
