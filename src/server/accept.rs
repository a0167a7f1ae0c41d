//! Accept loop shared by every listener.

use std::{io, net::SocketAddr, ops::ControlFlow, sync::Arc};

use async_trait::async_trait;
use log::warn;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::sleep,
};
use tokio_util::sync::CancellationToken;

use super::BackoffConfig;

/// Source of incoming connections consumed by [`accept_loop`].
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub(crate) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> { TcpListener::accept(self).await }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

/// Accept connections until `shutdown` fires or `on_accept` breaks.
///
/// Accept failures are logged and retried after an exponentially growing
/// delay governed by `backoff`; a successful accept resets the delay.
pub(crate) async fn accept_loop<L, H>(
    listener: Arc<L>,
    shutdown: CancellationToken,
    backoff: BackoffConfig,
    mut on_accept: H,
) where
    L: AcceptListener + ?Sized,
    H: FnMut(TcpStream, SocketAddr) -> ControlFlow<()>,
{
    let backoff = backoff.normalized();
    let mut delay = backoff.initial_delay;
    loop {
        let accepted = select! {
            biased;

            () = shutdown.cancelled() => return,
            res = listener.accept() => res,
        };
        match accepted {
            Ok((stream, peer_addr)) => {
                delay = backoff.initial_delay;
                if on_accept(stream, peer_addr).is_break() {
                    return;
                }
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                select! {
                    biased;

                    () = shutdown.cancelled() => return,
                    () = sleep(delay) => {}
                }
                delay = backoff.next_delay(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use tokio::{
        net::TcpListener,
        task::yield_now,
        time::{Instant, advance, timeout},
    };

    use super::*;

    fn failing_listener(calls: &Arc<Mutex<Vec<Instant>>>, num_calls: usize) -> MockAcceptListener {
        let mut listener = MockAcceptListener::new();
        let call_log = Arc::clone(calls);
        listener
            .expect_accept()
            .returning(move || {
                let call_log = Arc::clone(&call_log);
                Box::pin(async move {
                    call_log.lock().expect("lock").push(Instant::now());
                    Err(io::Error::other("mock error"))
                })
            })
            .times(num_calls);
        listener
            .expect_local_addr()
            .returning(|| Ok("127.0.0.1:0".parse().expect("addr parse")))
            .times(num_calls);
        listener
    }

    #[tokio::test(start_paused = true)]
    async fn failures_back_off_exponentially() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let listener = Arc::new(failing_listener(&calls, 4));
        let token = CancellationToken::new();
        let backoff = BackoffConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        };
        let task = tokio::spawn(accept_loop(listener, token.clone(), backoff, |_, _| {
            ControlFlow::Continue(())
        }));

        yield_now().await;
        for ms in [5, 10, 20] {
            advance(Duration::from_millis(ms)).await;
            yield_now().await;
        }
        token.cancel();
        task.await.expect("join accept loop");

        let calls = calls.lock().expect("lock");
        let intervals: Vec<_> = calls
            .windows(2)
            .map(|pair| pair[1].duration_since(pair[0]))
            .collect();
        assert_eq!(
            intervals,
            vec![
                Duration::from_millis(5),
                Duration::from_millis(10),
                Duration::from_millis(20),
            ]
        );
    }

    #[tokio::test]
    async fn shutdown_stops_idle_loop() {
        let listener = Arc::new(TcpListener::bind("127.0.0.1:0").await.expect("bind"));
        let token = CancellationToken::new();
        let task = tokio::spawn(accept_loop(
            listener,
            token.clone(),
            BackoffConfig::default(),
            |_, _| ControlFlow::Continue(()),
        ));

        token.cancel();

        timeout(Duration::from_millis(500), task)
            .await
            .expect("loop should exit promptly")
            .expect("join accept loop");
    }

    #[tokio::test]
    async fn handler_break_ends_loop() {
        let listener = Arc::new(TcpListener::bind("127.0.0.1:0").await.expect("bind"));
        let addr = listener.local_addr().expect("local addr");
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        let task = tokio::spawn(accept_loop(
            listener,
            CancellationToken::new(),
            BackoffConfig::default(),
            move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Break(())
            },
        ));

        let _client = TcpStream::connect(addr).await.expect("connect");

        timeout(Duration::from_secs(5), task)
            .await
            .expect("loop should exit after break")
            .expect("join accept loop");
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }
}
