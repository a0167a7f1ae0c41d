//! Demo binary: an echo server and a one-shot client.

mod cli;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use tokio::sync::mpsc;
use wiresession::{Client, FixedHeaderCodec, ListenerConfig, Server, Session, SessionBehavior};

use crate::cli::{Cli, Command};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Writes every message back to its sender.
struct Echo;

#[async_trait]
impl SessionBehavior<FixedHeaderCodec> for Echo {
    async fn on_received(&self, session: &Arc<Session<FixedHeaderCodec>>, message: Bytes) {
        if let Err(err) = session.send_message(&message).await {
            tracing::warn!(id = %session.id(), error = %err, "echo failed");
        }
    }
}

/// Forwards replies to the waiting `send` command.
struct Reply(mpsc::UnboundedSender<Bytes>);

#[async_trait]
impl SessionBehavior<FixedHeaderCodec> for Reply {
    async fn on_received(&self, _session: &Arc<Session<FixedHeaderCodec>>, message: Bytes) {
        // The receiver is gone once the command has printed its reply.
        let _ = self.0.send(message);
    }
}

#[cfg(feature = "metrics")]
fn install_metrics(addr: Option<std::net::SocketAddr>) -> Result<(), BoxError> {
    if let Some(addr) = addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        tracing::info!(%addr, "serving metrics");
    }
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(addr: Option<std::net::SocketAddr>) -> Result<(), BoxError> {
    if addr.is_some() {
        tracing::warn!("built without the `metrics` feature; ignoring --metrics-addr");
    }
    Ok(())
}

async fn serve(port: u16, max_connections: Option<usize>) -> Result<(), BoxError> {
    let mut builder = Server::builder()
        .codec(FixedHeaderCodec::default())
        .behavior(Echo);
    if let Some(limit) = max_connections {
        builder = builder.max_connections(limit);
    }
    let server = builder.build();
    server.start()?;
    let addr = server.start_listener(ListenerConfig::port(port))?;
    tracing::info!(%addr, "echo server listening");

    tokio::signal::ctrl_c().await?;
    tracing::info!(sessions = server.session_count(), "shutting down");
    server.stop().await?;
    Ok(())
}

async fn send(addr: std::net::SocketAddr, message: String, wait: Duration) -> Result<(), BoxError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = Client::builder()
        .codec(FixedHeaderCodec::default())
        .behavior(Reply(tx))
        .nodelay(true)
        .connect_timeout(wait)
        .build();
    client.connect(addr).await?;
    client.send_message(&Bytes::from(message)).await?;

    let reply = tokio::time::timeout(wait, rx.recv()).await;
    client.stop().await?;
    match reply {
        Ok(Some(body)) => {
            println!("{}", String::from_utf8_lossy(&body));
            Ok(())
        }
        Ok(None) => Err("connection closed before a reply arrived".into()),
        Err(_) => Err(format!("no reply within {wait:?}").into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    match Cli::parse().command {
        Command::Serve {
            port,
            metrics_addr,
            max_connections,
        } => {
            install_metrics(metrics_addr)?;
            serve(port, max_connections).await
        }
        Command::Send {
            addr,
            message,
            timeout,
        } => send(addr, message, Duration::from_secs(timeout)).await,
    }
}
