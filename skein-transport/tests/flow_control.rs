//! Per-stream credit: writers stall on a slow reader and resume on WINDOW_UPDATE.

mod common;

use std::cell::Cell;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use common::{connected_pair_with, pattern, pipe, providers, run_local, settle};
use skein_transport::frame::Frame;
use skein_transport::{
    CancellationToken, ConnectionOptions, MultiplexedConnection, Role, StreamId, TransportError,
    MIN_FRAME_SIZE,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[test]
fn test_writer_suspends_until_reader_consumes() {
    run_local(async {
        let server_options = ConnectionOptions::default().with_initial_stream_window(4096);
        let (client, server) =
            connected_pair_with(ConnectionOptions::default(), server_options).await;
        let data = pattern(16 * 1024);

        let done = Rc::new(Cell::new(false));
        let writer = tokio::task::spawn_local({
            let client = client.clone();
            let done = done.clone();
            let data = data.clone();
            async move {
                let cancel = CancellationToken::new();
                let stream = client.create_stream(false).expect("create");
                stream.write_and_finish(&data, &cancel).await.expect("write");
                done.set(true);
                stream.flush(&cancel).await.expect("flush");
            }
        });

        settle().await;
        assert!(!done.get(), "write completed beyond the stream window");

        let cancel = CancellationToken::new();
        let stream = server.accept_stream(&cancel).await.expect("accept");
        let received = stream.read_to_end(&cancel).await.expect("read");
        writer.await.expect("writer task");
        assert!(done.get());
        assert_eq!(received, data);
    });
}

#[test]
fn test_slow_stream_does_not_block_other_streams() {
    run_local(async {
        let server_options = ConnectionOptions::default().with_initial_stream_window(4096);
        let (client, server) =
            connected_pair_with(ConnectionOptions::default(), server_options).await;
        let cancel = CancellationToken::new();

        let stalled = client.create_stream(false).expect("create");
        let stalled_write = tokio::task::spawn_local(async move {
            let cancel = CancellationToken::new();
            let result = stalled.write(&pattern(64 * 1024), &cancel).await;
            (stalled, result)
        });
        settle().await;

        let quick = client.create_stream(false).expect("create");
        quick.write_and_finish(b"not stuck", &cancel).await.expect("write");

        let slow_side = server.accept_stream(&cancel).await.expect("accept");
        let quick_side = server.accept_stream(&cancel).await.expect("accept");
        assert_eq!(
            quick_side.read_to_end(&cancel).await.expect("read"),
            b"not stuck"
        );

        slow_side.abandon_reads();
        let (_stalled, result) = stalled_write.await.expect("stalled task");
        result.expect("write completes once the reader abandons");
    });
}

#[test]
fn test_abandoned_reads_keep_credit_flowing() {
    run_local(async {
        let server_options = ConnectionOptions::default().with_initial_stream_window(4096);
        let (client, server) =
            connected_pair_with(ConnectionOptions::default(), server_options).await;
        let cancel = CancellationToken::new();

        let stream = client.create_stream(false).expect("create");
        stream.write(b"hello", &cancel).await.expect("write");
        let accepted = server.accept_stream(&cancel).await.expect("accept");
        accepted.abandon_reads();

        stream
            .write_and_finish(&pattern(256 * 1024), &cancel)
            .await
            .expect("writes never stall on an abandoned stream");
        stream.flush(&cancel).await.expect("flush");

        let mut buf = [0u8; 16];
        assert!(matches!(
            accepted.read(&mut buf, &cancel).await,
            Err(TransportError::InvalidState(_))
        ));
    });
}

#[test]
fn test_peer_exceeding_window_is_a_protocol_violation() {
    run_local(async {
        let (local, mut raw) = pipe();
        let options = ConnectionOptions::default()
            .with_initial_stream_window(1024)
            .with_max_frame_size(MIN_FRAME_SIZE);
        let server = MultiplexedConnection::new(providers(), local, Role::Server, options);

        let peer = async {
            let mut out = BytesMut::new();
            Frame::Settings(ConnectionOptions::default().local_settings()).encode(&mut out);
            let id = StreamId::new(0, false, Role::Client);
            Frame::Stream {
                stream_id: id,
                fin: false,
                data: Bytes::from(vec![1u8; 1024]),
            }
            .encode(&mut out);
            Frame::Stream {
                stream_id: id,
                fin: false,
                data: Bytes::from_static(b"x"),
            }
            .encode(&mut out);
            raw.write_all(&out).await.expect("raw write");
        };
        let cancel = CancellationToken::new();
        let (connected, ()) = tokio::join!(server.connect(&cancel), peer);
        connected.expect("connect");

        let result = server.closed().await;
        assert!(
            matches!(result, Err(TransportError::ProtocolViolation(_))),
            "{result:?}"
        );

        // the raw peer still holds its end; the server hung up on it
        let mut sink = Vec::new();
        raw.read_to_end(&mut sink).await.expect("drain");
    });
}
