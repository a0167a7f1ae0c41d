//! Command line interface for the `wiresession` demo binary.
//!
//! Shared with `build.rs`, which renders the man page from it, so this file
//! depends on nothing but `clap` and `std`.

use std::net::SocketAddr;

use clap::{Parser, Subcommand};

/// Command line arguments for the `wiresession` binary.
#[derive(Debug, Parser)]
#[command(
    name = "wiresession",
    version,
    about = "Echo server and client over length-prefixed TCP framing"
)]
pub struct Cli {
    /// What to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands of the demo binary.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run an echo server until interrupted.
    Serve {
        /// Port to listen on. `0` picks an ephemeral port.
        #[arg(short, long, default_value_t = 7878)]
        port: u16,
        /// Serve Prometheus metrics on this address.
        #[arg(long)]
        metrics_addr: Option<SocketAddr>,
        /// Maximum number of concurrent sessions.
        #[arg(long)]
        max_connections: Option<usize>,
    },
    /// Send one message and print the reply.
    Send {
        /// Server address.
        #[arg(short, long, default_value = "127.0.0.1:7878")]
        addr: SocketAddr,
        /// Message body.
        #[arg(short, long, default_value = "Hello World")]
        message: String,
        /// Seconds to wait for the connection and the reply.
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
}
