//! Helpers for exercising `wiresession` servers, clients and sessions in
//! tests.
//!
//! ```rust,no_run
//! use wiresession::{FixedHeaderCodec, Server};
//! use wiresession_testing::{RecordingBehavior, read_frame, start_server, write_frame};
//!
//! # async fn example() {
//! let behavior = RecordingBehavior::echoing();
//! let (server, addr) = start_server(
//!     Server::builder()
//!         .codec(FixedHeaderCodec::default())
//!         .behavior(behavior.clone()),
//! );
//! let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
//! write_frame(&mut stream, b"Hello World").await.unwrap();
//! assert_eq!(&read_frame(&mut stream).await.unwrap()[..], b"Hello World");
//! server.stop().await.unwrap();
//! # }
//! ```

pub mod behavior;
pub mod frames;
pub mod metrics;
pub mod net;

pub use behavior::{EchoBehavior, RecordingBehavior};
pub use frames::{frame, read_frame, write_frame};
pub use net::{eventually, start_server, unused_addr};
