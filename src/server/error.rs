//! Errors raised by [`Server`](super::Server) operations.

use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::lifecycle::LifecycleError;

/// Errors that may occur while starting, stopping, or adding listeners.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The server is in the wrong state for the operation.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Creating, binding, or listening on a socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// Another listener already owns the port.
    #[error("a listener is already registered on port {port}")]
    ListenerExists {
        /// Conflicting port.
        port: u16,
    },
}
