//! Sockets and servers bound to the loopback interface.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::time::{Instant, sleep};
use wiresession::{ListenerConfig, MessageCodec, Server, ServerBuilder};

/// Build and start a server with one loopback listener on an ephemeral port.
///
/// # Panics
///
/// Panics if the server cannot start or bind.
pub fn start_server<C: MessageCodec>(builder: ServerBuilder<C>) -> (Arc<Server<C>>, SocketAddr) {
    let server = builder.build();
    server.start().expect("server starts");
    let addr = server
        .start_listener(ListenerConfig::localhost(0))
        .expect("listener binds");
    (server, addr)
}

/// A loopback address nothing is listening on.
///
/// # Panics
///
/// Panics if no ephemeral port can be bound.
#[must_use]
pub fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr")
}

/// Poll `check` until it holds or `limit` elapses. Returns the last result.
pub async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(5)).await;
    }
}
