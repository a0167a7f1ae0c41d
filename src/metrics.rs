//! Metric helpers for `wiresession`.
//!
//! This module defines metric names and small helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking running sessions.
pub const SESSIONS_ACTIVE: &str = "wiresession_sessions_active";
/// Name of the counter tracking decoded and sent frames.
pub const FRAMES_PROCESSED: &str = "wiresession_frames_processed_total";
/// Name of the counter tracking session errors.
pub const ERRORS_TOTAL: &str = "wiresession_errors_total";
/// Name of the counter tracking connections refused at accept time.
pub const CONNECTIONS_REJECTED: &str = "wiresession_connections_rejected_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Frames decoded from the peer.
    Inbound,
    /// Frames written to the peer.
    Outbound,
}

impl Direction {
    /// Label value used for the `direction` label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the running sessions gauge.
pub fn inc_sessions() {
    #[cfg(feature = "metrics")]
    gauge!(SESSIONS_ACTIVE).increment(1.0);
}

/// Decrement the running sessions gauge.
pub fn dec_sessions() {
    #[cfg(feature = "metrics")]
    gauge!(SESSIONS_ACTIVE).decrement(1.0);
}

/// Record a processed frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a session error.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL).increment(1);
}

/// Record a connection refused by the server.
pub fn inc_rejected() {
    #[cfg(feature = "metrics")]
    counter!(CONNECTIONS_REJECTED).increment(1);
}
