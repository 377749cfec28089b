//! Server side: accepting connections and dispatching their streams.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use skein_core::{
    CancellationToken, DuplexConnection, HeaderCodec, JsonCodec, Listener, NetworkProvider,
    Providers, Role, TaskProvider, TimeProvider,
};
use skein_transport::{MultiplexedConnection, MultiplexedStream};
use tokio::task::JoinHandle;

use crate::dispatcher::dispatch_contained;
use crate::fields::RequestFieldKey;
use crate::header::{read_header, write_header, RequestHeader, ResponseHeader};
use crate::payload::{send_payload, IncomingPayload};
use crate::{
    Deadline, Dispatcher, IncomingRequest, OutgoingResponse, RemoteAddress, RpcError,
    RpcErrorCode, RpcErrorCodes, RpcResult, ServerOptions, StatusCode,
};

type ListenerOf<P> = <<P as Providers>::Network as NetworkProvider>::Listener;

/// Serves one dispatcher to every accepted connection.
///
/// Each accepted stream is dispatched on its own task: the request header is
/// read, the request goes through the effective dispatcher and, for two-way
/// requests, the response is written back on the same stream.
///
/// ```rust,ignore
/// let dispatcher = Router::new().map("/greeter", Greeter).build();
/// let server = Server::new(providers, dispatcher, ServerOptions::default());
/// let addr = server.listen("127.0.0.1:0").await?;
/// // ...
/// server.shutdown(&CancellationToken::new()).await?;
/// ```
pub struct Server<P: Providers, C: HeaderCodec = JsonCodec> {
    providers: P,
    dispatcher: Rc<dyn Dispatcher>,
    options: ServerOptions,
    codec: C,
    stopping: CancellationToken,
    connections: RefCell<HashMap<u64, Rc<MultiplexedConnection<P>>>>,
    next_connection: Cell<u64>,
    listeners: RefCell<Vec<JoinHandle<()>>>,
}

impl<P: Providers> Server<P> {
    /// A server dispatching to `dispatcher` with the JSON header codec.
    pub fn new(providers: P, dispatcher: Rc<dyn Dispatcher>, options: ServerOptions) -> Rc<Self> {
        Self::with_codec(providers, dispatcher, options, JsonCodec)
    }
}

impl<P: Providers, C: HeaderCodec> Server<P, C> {
    /// A server encoding headers with `codec`.
    pub fn with_codec(
        providers: P,
        dispatcher: Rc<dyn Dispatcher>,
        options: ServerOptions,
        codec: C,
    ) -> Rc<Self> {
        Rc::new(Self {
            providers,
            dispatcher,
            options,
            codec,
            stopping: CancellationToken::new(),
            connections: RefCell::new(HashMap::new()),
            next_connection: Cell::new(0),
            listeners: RefCell::new(Vec::new()),
        })
    }

    /// Bind `addr` and accept connections in the background until
    /// [`shutdown`](Self::shutdown). Returns the bound address.
    pub async fn listen(self: &Rc<Self>, addr: &str) -> RpcResult<String> {
        let listener = self.providers.network().bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "server listening");

        let server = self.clone();
        let handle = self
            .providers
            .task()
            .spawn_task("skein_accept_loop", async move {
                server.accept_loop(listener).await;
            });
        self.listeners.borrow_mut().push(handle);
        Ok(local_addr)
    }

    /// Serve an already established duplex connection.
    pub fn serve_connection(self: &Rc<Self>, duplex: impl DuplexConnection, peer: String) {
        if self.stopping.is_cancelled() {
            tracing::debug!(%peer, "server stopping, dropping connection");
            return;
        }
        let id = self.next_connection.get();
        self.next_connection.set(id + 1);

        let connection = Rc::new(
            MultiplexedConnection::new(
                self.providers.clone(),
                duplex,
                Role::Server,
                self.options.connection.clone(),
            )
            .with_security(self.options.security.clone())
            .with_error_codes(RpcErrorCodes),
        );
        self.connections.borrow_mut().insert(id, connection.clone());

        let server = self.clone();
        self.providers
            .task()
            .spawn_task("skein_connection", async move {
                server.run_connection(&connection, &peer).await;
                server.connections.borrow_mut().remove(&id);
            });
    }

    /// Number of connections currently served.
    pub fn connection_count(&self) -> usize {
        self.connections.borrow().len()
    }

    /// Stop accepting, close every connection gracefully and dispose the ones
    /// still open after [`ServerOptions::shutdown_timeout`].
    ///
    /// In-flight dispatches are allowed to finish within that bound.
    pub async fn shutdown(&self, cancel: &CancellationToken) -> RpcResult<()> {
        self.stopping.cancel();
        for listener in self.listeners.borrow_mut().drain(..) {
            listener.abort();
        }

        let connections: Vec<_> = self.connections.borrow().values().cloned().collect();
        tracing::info!(connections = connections.len(), "server shutting down");

        let closing: Vec<_> = connections
            .iter()
            .map(|connection| {
                let connection = connection.clone();
                let cancel = cancel.clone();
                self.providers
                    .task()
                    .spawn_task("skein_close_connection", async move {
                        if let Err(e) = connection
                            .close(RpcErrorCode::NoError.code(), &cancel)
                            .await
                        {
                            tracing::debug!(error = %e, "connection did not close gracefully");
                        }
                    })
            })
            .collect();
        let all_closed = async {
            for handle in closing {
                let _ = handle.await;
            }
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(RpcError::Cancelled),
            outcome = self.providers.time().timeout(self.options.shutdown_timeout, all_closed) => {
                if outcome.is_err() {
                    tracing::warn!(
                        timeout = ?self.options.shutdown_timeout,
                        "graceful shutdown timed out, disposing connections"
                    );
                }
                Ok(())
            }
        };
        for connection in &connections {
            connection.dispose();
        }
        result
    }

    async fn accept_loop(self: Rc<Self>, listener: ListenerOf<P>) {
        loop {
            let accepted = tokio::select! {
                _ = self.stopping.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((duplex, peer)) => {
                    tracing::debug!(%peer, "accepted connection");
                    self.serve_connection(duplex, peer);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "listener failed, no longer accepting");
                    break;
                }
            }
        }
    }

    async fn run_connection(
        self: &Rc<Self>,
        connection: &Rc<MultiplexedConnection<P>>,
        peer: &str,
    ) {
        if let Err(e) = connection.connect(&self.stopping).await {
            tracing::warn!(%peer, error = %e, "connection handshake failed");
            return;
        }
        tracing::debug!(%peer, "connection established");

        let never = CancellationToken::new();
        loop {
            match connection.accept_stream(&never).await {
                Ok(stream) => {
                    let server = self.clone();
                    let peer = peer.to_string();
                    self.providers
                        .task()
                        .spawn_task("skein_dispatch", async move {
                            server.dispatch_stream(stream, peer).await;
                        });
                }
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "no longer accepting streams");
                    break;
                }
            }
        }

        match connection.closed().await {
            Ok(()) => tracing::debug!(%peer, "connection closed"),
            Err(e) => tracing::debug!(%peer, error = %e, "connection ended"),
        }
    }

    async fn dispatch_stream(&self, stream: MultiplexedStream, peer: String) {
        let stream = Rc::new(stream);
        let io_cancel = CancellationToken::new();
        let max = self.options.max_header_size;

        let header: RequestHeader = match read_header(&stream, &self.codec, max, &io_cancel).await
        {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "unreadable request header, resetting stream");
                stream.reset(RpcErrorCode::InvalidData.code());
                return;
            }
        };

        let oneway = !stream.is_bidirectional();
        let deadline = header
            .fields
            .get_u64(RequestFieldKey::Deadline)
            .map(Duration::from_millis);
        let request_cancel = CancellationToken::new();
        let mut request = IncomingRequest::new(header.path, header.operation)
            .with_oneway(oneway)
            .with_fields(header.fields)
            .with_payload(IncomingPayload::from_stream(stream.clone()))
            .with_cancellation(request_cancel.clone());
        request.features_mut().set(RemoteAddress(peer));
        if let Some(deadline) = deadline {
            request.features_mut().set(Deadline(deadline));
        }

        let dispatch = dispatch_contained(&*self.dispatcher, request);
        tokio::pin!(dispatch);
        let response = match deadline {
            None => dispatch.await,
            Some(deadline) => tokio::select! {
                response = &mut dispatch => response,
                _ = self.providers.time().sleep(deadline) => {
                    request_cancel.cancel();
                    // one last poll so the dispatcher observes its token before it is dropped
                    tokio::select! {
                        biased;
                        _ = &mut dispatch => {}
                        _ = std::future::ready(()) => {}
                    }
                    OutgoingResponse::error(StatusCode::DeadlineExceeded, "deadline exceeded")
                }
            },
        };

        if oneway {
            tracing::trace!(status = %response.status(), "oneway request dispatched");
            return;
        }
        if let Err(e) = self.write_response(&stream, response, &io_cancel).await {
            tracing::debug!(error = %e, "response not delivered");
            stream.reset(RpcErrorCode::InternalError.code());
        }
    }

    async fn write_response(
        &self,
        stream: &MultiplexedStream,
        mut response: OutgoingResponse,
        cancel: &CancellationToken,
    ) -> RpcResult<()> {
        let header = ResponseHeader {
            status: response.status(),
            error_message: response.error_message().map(str::to_string),
            fields: response.fields().clone(),
        };
        write_header(stream, &self.codec, &header, self.options.max_header_size, cancel).await?;
        if let Some(mut payload) = response.take_payload() {
            let sent = send_payload(payload.as_mut(), stream, cancel).await;
            payload.complete();
            sent?;
        }
        stream.finish(cancel).await?;
        stream.flush(cancel).await?;
        Ok(())
    }
}
