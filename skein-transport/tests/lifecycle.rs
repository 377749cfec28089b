//! Reset, disposal, graceful close, connection loss, idle timeout and ping.

mod common;

use std::time::Duration;

use common::{connected_pair, connected_pair_with, run_local, settle};
use skein_transport::{
    CancellationToken, ConnectionOptions, ConnectionState, DefaultErrorCodes, StreamState,
    TransportError,
};

#[test]
fn test_reset_code_reaches_peer() {
    run_local(async {
        let (client, server) = connected_pair().await;
        let cancel = CancellationToken::new();

        let stream = client.create_stream(true).expect("create");
        stream.write(b"partial", &cancel).await.expect("write");
        let accepted = server.accept_stream(&cancel).await.expect("accept");
        stream.reset(42);
        assert_eq!(stream.state(), StreamState::Reset);

        // already buffered data may or may not be read before the reset lands
        let outcome = loop {
            let mut buf = [0u8; 64];
            match accepted.read(&mut buf, &cancel).await {
                Ok(0) => panic!("reset stream reported a clean end"),
                Ok(_) => continue,
                Err(e) => break e,
            }
        };
        assert_eq!(outcome, TransportError::StreamAborted { code: 42 });
        assert_eq!(accepted.reset_code(), Some(42));
        assert!(matches!(
            stream.write(b"more", &cancel).await,
            Err(TransportError::StreamAborted { code: 42 })
        ));
    });
}

#[test]
fn test_cancelled_read_resets_stream() {
    run_local(async {
        let (client, server) = connected_pair().await;
        let cancel = CancellationToken::new();

        let stream = client.create_stream(true).expect("create");
        stream.write(b"ping", &cancel).await.expect("write");
        let accepted = server.accept_stream(&cancel).await.expect("accept");
        let mut buf = [0u8; 4];
        accepted.read_exact(&mut buf, &cancel).await.expect("read");

        let read_cancel = CancellationToken::new();
        tokio::task::spawn_local({
            let read_cancel = read_cancel.clone();
            async move {
                settle().await;
                read_cancel.cancel();
            }
        });
        assert_eq!(
            accepted.read(&mut buf, &read_cancel).await,
            Err(TransportError::Cancelled)
        );
        assert_eq!(accepted.state(), StreamState::Reset);

        assert_eq!(
            stream.read(&mut buf, &cancel).await,
            Err(TransportError::StreamAborted {
                code: DefaultErrorCodes::CANCELLED
            })
        );
    });
}

#[test]
fn test_dispose_is_idempotent() {
    run_local(async {
        let (client, server) = connected_pair().await;
        let cancel = CancellationToken::new();

        let stream = client.create_stream(true).expect("create");
        stream.write(b"x", &cancel).await.expect("write");
        stream.dispose();
        stream.dispose();
        assert_eq!(stream.reset_code(), Some(DefaultErrorCodes::DISPOSED));
        assert!(matches!(
            stream.write(b"y", &cancel).await,
            Err(TransportError::StreamAborted { .. })
        ));

        let accepted = server.accept_stream(&cancel).await.expect("accept");
        let mut buf = [0u8; 1];
        let _ = accepted.read(&mut buf, &cancel).await;
        assert!(matches!(
            accepted.read(&mut buf, &cancel).await,
            Err(TransportError::StreamAborted {
                code: DefaultErrorCodes::DISPOSED
            })
        ));

        client.dispose();
        client.dispose();
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(client.closed().await, Err(TransportError::ConnectionClosedLocally));
    });
}

#[test]
fn test_read_after_clean_end_keeps_returning_zero() {
    run_local(async {
        let (client, server) = connected_pair().await;
        let cancel = CancellationToken::new();

        let stream = client.create_stream(false).expect("create");
        stream.write_and_finish(b"abc", &cancel).await.expect("write");
        let accepted = server.accept_stream(&cancel).await.expect("accept");

        let mut buf = [0u8; 3];
        accepted.read_exact(&mut buf, &cancel).await.expect("read");
        assert_eq!(&buf, b"abc");
        assert_eq!(accepted.read(&mut buf, &cancel).await, Ok(0));
        assert_eq!(accepted.read(&mut buf, &cancel).await, Ok(0));
        assert_eq!(
            accepted.read_exact(&mut buf, &cancel).await,
            Err(TransportError::UnexpectedEof)
        );
        assert_eq!(accepted.state(), StreamState::Closed);
        assert_eq!(stream.finish(&cancel).await, Ok(()));
        assert_eq!(
            stream.write(b"late", &cancel).await,
            Err(TransportError::WritesClosed)
        );
    });
}

#[test]
fn test_losing_the_connection_fails_pending_operations() {
    run_local(async {
        let (client, server) = connected_pair().await;
        let cancel = CancellationToken::new();

        let stream = client.create_stream(true).expect("create");
        stream.write(b"x", &cancel).await.expect("write");
        let accepted = server.accept_stream(&cancel).await.expect("accept");
        let pending = tokio::task::spawn_local(async move {
            let cancel = CancellationToken::new();
            let mut buf = [0u8; 8];
            accepted.read_exact(&mut buf, &cancel).await
        });
        settle().await;

        client.dispose();
        assert_eq!(
            stream.write(b"y", &cancel).await,
            Err(TransportError::ConnectionClosedLocally)
        );

        let result = pending.await.expect("pending read");
        assert!(
            matches!(result, Err(TransportError::ConnectionLost(_))),
            "{result:?}"
        );
        assert!(matches!(
            server.closed().await,
            Err(TransportError::ConnectionLost(_))
        ));
        assert!(server.create_stream(true).is_err());
    });
}

#[test]
fn test_graceful_close_lets_open_streams_finish() {
    run_local(async {
        let (client, server) = connected_pair().await;
        let cancel = CancellationToken::new();

        let request = client.create_stream(true).expect("create");
        request.write(b"req", &cancel).await.expect("write");
        let handled = server.accept_stream(&cancel).await.expect("accept");

        let closing = tokio::task::spawn_local({
            let client = client.clone();
            async move { client.close(0, &CancellationToken::new()).await }
        });

        // accept observes the peer's CLOSE
        assert_eq!(
            server.accept_stream(&cancel).await.err(),
            Some(TransportError::ConnectionClosedByPeer { code: 0 })
        );
        assert_eq!(server.state(), ConnectionState::Closing);
        assert!(matches!(
            server.create_stream(true),
            Err(TransportError::ConnectionClosedByPeer { code: 0 })
        ));
        assert!(matches!(
            client.create_stream(true),
            Err(TransportError::ConnectionClosedLocally)
        ));

        settle().await;
        assert!(!closing.is_finished(), "close finished with a stream open");

        request.finish(&cancel).await.expect("finish");
        assert_eq!(handled.read_to_end(&cancel).await.expect("read"), b"req");
        handled.write_and_finish(b"resp", &cancel).await.expect("reply");
        assert_eq!(request.read_to_end(&cancel).await.expect("read"), b"resp");

        closing.await.expect("close task").expect("graceful close");
        assert_eq!(server.closed().await, Ok(()));
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(server.state(), ConnectionState::Closed);
    });
}

#[test]
fn test_close_right_after_first_write_keeps_the_stream() {
    run_local(async {
        let (client, server) = connected_pair().await;
        let cancel = CancellationToken::new();

        let request = client.create_stream(true).expect("create");
        request.write(b"req", &cancel).await.expect("write");

        // start closing before the writer task had a chance to run
        let never = CancellationToken::new();
        let closing = client.close(0, &never);
        tokio::pin!(closing);
        tokio::select! {
            biased;
            result = &mut closing => panic!("close finished with a stream open: {result:?}"),
            _ = std::future::ready(()) => {}
        }
        assert_eq!(client.state(), ConnectionState::Closing);

        let handled = server
            .accept_stream(&cancel)
            .await
            .expect("stream started before CLOSE is accepted");
        request.finish(&cancel).await.expect("finish");
        assert_eq!(handled.read_to_end(&cancel).await.expect("read"), b"req");
        handled.write_and_finish(b"resp", &cancel).await.expect("reply");
        assert_eq!(request.read_to_end(&cancel).await.expect("read"), b"resp");

        closing.await.expect("graceful close");
        assert_eq!(server.closed().await, Ok(()));
        assert_eq!(server.metrics().streams_reset, 0);
    });
}

#[test]
fn test_stream_reset_before_its_data_left_still_surfaces() {
    run_local(async {
        let (client, server) = connected_pair().await;
        let cancel = CancellationToken::new();

        let stream = client.create_stream(false).expect("create");
        stream.write(b"never sent", &cancel).await.expect("write");
        stream.reset(7);

        let accepted = server.accept_stream(&cancel).await.expect("accept");
        assert_eq!(accepted.reset_code(), Some(7));
        let mut buf = [0u8; 16];
        assert_eq!(
            accepted.read(&mut buf, &cancel).await,
            Err(TransportError::StreamAborted { code: 7 })
        );

        // the connection keeps working for later streams
        let next = client.create_stream(false).expect("create");
        next.write_and_finish(b"after", &cancel).await.expect("write");
        let second = server.accept_stream(&cancel).await.expect("accept");
        assert_eq!(second.read_to_end(&cancel).await.expect("read"), b"after");
    });
}

#[test]
fn test_close_refuses_streams_never_accepted() {
    run_local(async {
        let (client, server) = connected_pair().await;
        let cancel = CancellationToken::new();

        let unwanted = client.create_stream(true).expect("create");
        unwanted.write(b"too late", &cancel).await.expect("write");
        settle().await;

        let closing = tokio::task::spawn_local({
            let server = server.clone();
            async move { server.close(0, &CancellationToken::new()).await }
        });

        let mut buf = [0u8; 8];
        assert_eq!(
            unwanted.read(&mut buf, &cancel).await,
            Err(TransportError::StreamAborted {
                code: DefaultErrorCodes::REFUSED
            })
        );
        drop(unwanted);
        closing.await.expect("close task").expect("graceful close");
        assert_eq!(client.closed().await, Ok(()));
    });
}

#[test]
fn test_idle_connection_times_out() {
    run_local(async {
        let options =
            ConnectionOptions::default().with_idle_timeout(Some(Duration::from_millis(100)));
        let (client, server) = connected_pair_with(options.clone(), options).await;

        let result = client.closed().await;
        assert!(
            matches!(
                result,
                Err(TransportError::ConnectionIdle) | Err(TransportError::ConnectionLost(_))
            ),
            "{result:?}"
        );
        assert!(server.closed().await.is_err());
    });
}

#[test]
fn test_keep_alive_prevents_idle_timeout() {
    run_local(async {
        let options = ConnectionOptions::default()
            .with_idle_timeout(Some(Duration::from_millis(200)))
            .with_keep_alive(true);
        let (client, server) = connected_pair_with(options.clone(), options).await;

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(client.state(), ConnectionState::Active);
        assert_eq!(server.state(), ConnectionState::Active);
        assert!(client.metrics().pongs_received > 0);
    });
}

#[test]
fn test_ping_measures_round_trip() {
    run_local(async {
        let (client, _server) = connected_pair().await;
        let cancel = CancellationToken::new();

        let rtt = client.ping(&cancel).await.expect("ping");
        assert!(rtt < Duration::from_secs(5));
        let metrics = client.metrics();
        assert_eq!(metrics.pongs_received, 1);
        assert_eq!(metrics.last_rtt, Some(rtt));
    });
}
