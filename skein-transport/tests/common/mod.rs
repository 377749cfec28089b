//! Shared helpers for the transport integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use skein_core::{MemoryNetworkProvider, TokioProviders};
use skein_transport::{CancellationToken, ConnectionOptions, MultiplexedConnection, Role};
use tokio::io::DuplexStream;

pub type TestProviders = TokioProviders<MemoryNetworkProvider>;
pub type TestConnection = MultiplexedConnection<TestProviders>;

/// Route `tracing` output through the test harness. `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Run `future` on a current-thread runtime inside a `LocalSet`.
pub fn run_local<F: Future>(future: F) -> F::Output {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build local runtime");
    tokio::task::LocalSet::new().block_on(&runtime, future)
}

pub fn providers() -> TestProviders {
    TokioProviders::memory(MemoryNetworkProvider::new())
}

/// Two ends of an in-memory pipe.
pub fn pipe() -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(256 * 1024)
}

/// Connection pair that has not run its handshake yet.
pub fn unconnected_pair(
    client: ConnectionOptions,
    server: ConnectionOptions,
) -> (TestConnection, TestConnection) {
    let (a, b) = pipe();
    (
        MultiplexedConnection::new(providers(), a, Role::Client, client),
        MultiplexedConnection::new(providers(), b, Role::Server, server),
    )
}

/// Connected client and server over an in-memory pipe.
pub async fn connected_pair_with(
    client: ConnectionOptions,
    server: ConnectionOptions,
) -> (Rc<TestConnection>, Rc<TestConnection>) {
    let (client, server) = unconnected_pair(client, server);
    let cancel = CancellationToken::new();
    let (c, s) = tokio::join!(client.connect(&cancel), server.connect(&cancel));
    c.expect("client connect");
    s.expect("server connect");
    (Rc::new(client), Rc::new(server))
}

pub async fn connected_pair() -> (Rc<TestConnection>, Rc<TestConnection>) {
    connected_pair_with(ConnectionOptions::default(), ConnectionOptions::default()).await
}

/// Deterministic test payload.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Let the reader and writer tasks run for a while.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
