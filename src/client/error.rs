//! Error types for [`Client`](super::Client) operations.

use std::{io, net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::lifecycle::LifecycleError;

/// Errors emitted while connecting or stopping a client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client is in the wrong state, or is missing a collaborator.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The TCP connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Remote address.
        addr: SocketAddr,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// The connection attempt exceeded the configured timeout.
    #[error("connecting to {addr} timed out after {after:?}")]
    Timeout {
        /// Remote address.
        addr: SocketAddr,
        /// Configured limit.
        after: Duration,
    },
}
