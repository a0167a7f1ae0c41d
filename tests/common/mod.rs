//! Fixtures shared by the integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::Arc;

use rstest::fixture;
use wiresession::{FixedHeaderCodec, Server, ServerBuilder};
use wiresession_testing::{RecordingBehavior, start_server};

/// A running server, the address it listens on, and its recorded callbacks.
pub struct EchoServer {
    pub server: Arc<Server<FixedHeaderCodec>>,
    pub addr: std::net::SocketAddr,
    pub behavior: RecordingBehavior,
}

/// Start an echoing server after applying `configure` to its builder.
pub fn echo_server_with(
    configure: impl FnOnce(ServerBuilder<FixedHeaderCodec>) -> ServerBuilder<FixedHeaderCodec>,
) -> EchoServer {
    let behavior = RecordingBehavior::echoing();
    let builder = Server::builder()
        .codec(FixedHeaderCodec::default())
        .behavior(behavior.clone());
    let (server, addr) = start_server(configure(builder));
    EchoServer {
        server,
        addr,
        behavior,
    }
}

#[fixture]
pub fn echo_server() -> EchoServer { echo_server_with(|builder| builder) }
