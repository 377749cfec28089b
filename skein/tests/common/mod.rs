//! Shared helpers for the RPC integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use skein::{
    BytesPayload, CancellationToken, ClientConnection, ClientOptions, DispatchError, Dispatcher,
    IncomingRequest, InlineDispatcher, OutgoingResponse, Server, ServerOptions,
};
use skein_core::{MemoryNetworkProvider, TokioProviders};

pub type TestProviders = TokioProviders<MemoryNetworkProvider>;
pub type TestClient = ClientConnection<TestProviders>;
pub type TestServer = Server<TestProviders>;

pub const SERVER_ADDR: &str = "rpc-server";

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

/// Dispatcher answering every request with its own payload.
pub fn echo() -> impl Dispatcher {
    InlineDispatcher::new(|mut request: IncomingRequest| async move {
        let body = request.read_payload().await?;
        Ok::<_, DispatchError>(OutgoingResponse::ok().with_payload(BytesPayload::new(body)))
    })
}

/// Start a server on [`SERVER_ADDR`] of the memory network behind `providers`.
pub async fn start_server(
    providers: &TestProviders,
    dispatcher: Rc<dyn Dispatcher>,
    options: ServerOptions,
) -> Rc<TestServer> {
    let server = Server::new(providers.clone(), dispatcher, options);
    server.listen(SERVER_ADDR).await.expect("listen");
    server
}

pub async fn connect_client(providers: &TestProviders) -> TestClient {
    connect_client_with(providers, ClientOptions::default())
        .await
        .expect("client connect")
}

pub async fn connect_client_with(
    providers: &TestProviders,
    options: ClientOptions,
) -> skein::RpcResult<TestClient> {
    ClientConnection::connect(
        providers.clone(),
        SERVER_ADDR,
        options,
        &CancellationToken::new(),
    )
    .await
}

/// Deterministic test payload.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Let background tasks run for a while.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
