//! Checks that the helpers drive a real server end to end.

use std::time::Duration;

use rstest::rstest;
use tokio::net::TcpStream;
use wiresession::{FixedHeaderCodec, Server};
use wiresession_testing::{RecordingBehavior, eventually, read_frame, start_server, unused_addr, write_frame};

#[rstest]
#[tokio::test]
async fn recording_behavior_echoes_and_records() {
    let behavior = RecordingBehavior::echoing();
    let (server, addr) = start_server(
        Server::builder()
            .codec(FixedHeaderCodec::default())
            .behavior(behavior.clone()),
    );

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    write_frame(&mut stream, b"one").await.expect("write");
    assert_eq!(&read_frame(&mut stream).await.expect("reply")[..], b"one");
    assert_eq!(behavior.expect_messages(1).await, vec!["one"]);

    drop(stream);
    assert_eq!(behavior.expect_stops(1).await.len(), 1);
    assert!(eventually(Duration::from_secs(5), || server.session_count() == 0).await);
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn unused_addr_refuses_connections() {
    assert!(TcpStream::connect(unused_addr()).await.is_err());
}

#[tokio::test]
async fn wait_until_times_out() {
    let behavior = RecordingBehavior::new();
    assert!(
        !behavior
            .wait_until(Duration::from_millis(20), |rec| !rec.messages().is_empty())
            .await
    );
}
