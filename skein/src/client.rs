//! Client side: dialing a server and invoking requests on it.

use std::rc::Rc;

use async_trait::async_trait;
use skein_core::{
    CancellationToken, DuplexConnection, HeaderCodec, JsonCodec, NetworkProvider, Providers, Role,
    TimeProvider,
};
use skein_transport::{ConnectionState, MultiplexedConnection, MultiplexedStream, PeerSettings};

use crate::fields::RequestFieldKey;
use crate::header::{read_header, write_header, RequestHeader, ResponseHeader};
use crate::payload::{send_payload, IncomingPayload, PayloadSource};
use crate::{
    ClientOptions, Deadline, IncomingResponse, OutgoingRequest, RpcError, RpcErrorCode,
    RpcErrorCodes, RpcResult,
};

/// Something that can send an [`OutgoingRequest`].
///
/// On success a two-way request carries its [`IncomingResponse`]; a oneway
/// request has been fully handed to the transport.
#[async_trait(?Send)]
pub trait Invoker {
    /// Send `request` and, for a two-way request, wait for the response header.
    async fn invoke(
        &self,
        request: &mut OutgoingRequest,
        cancel: &CancellationToken,
    ) -> RpcResult<()>;
}

/// An RPC client over one multiplexed connection.
///
/// Every invocation uses its own stream: bidirectional for two-way requests,
/// unidirectional for oneway ones. Request paths are resolved by whichever
/// server this connection reached; the server part of an absolute
/// [`ServiceAddress`](crate::ServiceAddress) is not consulted.
pub struct ClientConnection<P: Providers, C: HeaderCodec = JsonCodec> {
    providers: P,
    connection: MultiplexedConnection<P>,
    codec: C,
    max_header_size: usize,
    peer_settings: PeerSettings,
}

impl<P: Providers> ClientConnection<P> {
    /// Dial `addr` and connect with the JSON header codec.
    pub async fn connect(
        providers: P,
        addr: &str,
        options: ClientOptions,
        cancel: &CancellationToken,
    ) -> RpcResult<Self> {
        let duplex = tokio::select! {
            _ = cancel.cancelled() => return Err(RpcError::Cancelled),
            duplex = providers.network().connect(addr) => duplex?,
        };
        tracing::debug!(%addr, "dialed server");
        Self::connect_with_codec(providers, duplex, options, JsonCodec, cancel).await
    }

    /// Connect over an already established duplex connection.
    pub async fn connect_duplex(
        providers: P,
        duplex: impl DuplexConnection,
        options: ClientOptions,
        cancel: &CancellationToken,
    ) -> RpcResult<Self> {
        Self::connect_with_codec(providers, duplex, options, JsonCodec, cancel).await
    }
}

impl<P: Providers, C: HeaderCodec> ClientConnection<P, C> {
    /// Connect over `duplex`, encoding headers with `codec`.
    ///
    /// # Errors
    ///
    /// `Transport(AuthenticationFailed)` when the secure channel rejects the
    /// peer, `Transport(ConnectFailed)` for other handshake failures and
    /// `Cancelled` when `cancel` fires first.
    pub async fn connect_with_codec(
        providers: P,
        duplex: impl DuplexConnection,
        options: ClientOptions,
        codec: C,
        cancel: &CancellationToken,
    ) -> RpcResult<Self> {
        let connection = MultiplexedConnection::new(
            providers.clone(),
            duplex,
            Role::Client,
            options.connection.clone(),
        )
        .with_security(options.security.clone())
        .with_error_codes(RpcErrorCodes);
        let peer_settings = connection.connect(cancel).await?;
        tracing::debug!(?peer_settings, "client connection established");
        Ok(Self {
            providers,
            connection,
            codec,
            max_header_size: options.max_header_size,
            peer_settings,
        })
    }

    /// The underlying multiplexed connection.
    pub fn connection(&self) -> &MultiplexedConnection<P> {
        &self.connection
    }

    /// Settings announced by the server.
    pub fn peer_settings(&self) -> &PeerSettings {
        &self.peer_settings
    }

    /// Lifecycle state of the connection.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Close gracefully: in-flight invocations finish, new ones fail.
    pub async fn shutdown(&self, cancel: &CancellationToken) -> RpcResult<()> {
        self.connection
            .close(RpcErrorCode::NoError.code(), cancel)
            .await?;
        Ok(())
    }

    /// Abort the connection and every in-flight invocation. Idempotent.
    pub fn dispose(&self) {
        self.connection.dispose();
    }

    /// Invoke `request`, check the response status and read the response
    /// payload. A oneway request yields an empty body.
    pub async fn call(
        &self,
        request: &mut OutgoingRequest,
        cancel: &CancellationToken,
    ) -> RpcResult<Vec<u8>> {
        self.invoke(request, cancel).await?;
        let Some(response) = request.response_mut() else {
            return Ok(Vec::new());
        };
        response.check()?;
        response.read_payload(cancel).await
    }

    async fn exchange(
        &self,
        stream: &Rc<MultiplexedStream>,
        header: &RequestHeader,
        payload: &mut Option<Box<dyn PayloadSource>>,
        oneway: bool,
        cancel: &CancellationToken,
    ) -> RpcResult<Option<IncomingResponse>> {
        write_header(stream, &self.codec, header, self.max_header_size, cancel).await?;
        if let Some(payload) = payload.as_mut() {
            send_payload(&mut **payload, stream, cancel).await?;
        }
        stream.finish(cancel).await?;

        if oneway {
            stream.flush(cancel).await?;
            return Ok(None);
        }

        let header: ResponseHeader =
            read_header(stream, &self.codec, self.max_header_size, cancel).await?;
        let response = IncomingResponse::new(
            header.status,
            IncomingPayload::from_stream(stream.clone()),
        )
        .with_error_message(header.error_message)
        .with_fields(header.fields);
        Ok(Some(response))
    }
}

#[async_trait(?Send)]
impl<P: Providers, C: HeaderCodec> Invoker for ClientConnection<P, C> {
    async fn invoke(
        &self,
        request: &mut OutgoingRequest,
        cancel: &CancellationToken,
    ) -> RpcResult<()> {
        let budget = request.features().get::<Deadline>().map(|deadline| deadline.0);
        if budget.is_some_and(|budget| budget.is_zero()) {
            return Err(RpcError::DeadlineExceeded);
        }

        let (mut fields, mut payload) = request.begin_send()?;
        if let Some(budget) = budget {
            let millis = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
            fields.set_u64(RequestFieldKey::Deadline, millis);
        }
        let header = RequestHeader {
            path: request.service_address().path().to_string(),
            operation: request.operation().to_string(),
            fields,
        };
        let oneway = request.is_oneway();

        let stream = match self.connection.create_stream(!oneway) {
            Ok(stream) => Rc::new(stream),
            Err(e) => {
                if let Some(payload) = payload.as_mut() {
                    payload.complete();
                }
                return Err(e.into());
            }
        };
        tracing::debug!(%request, oneway, "invoking");

        let exchange = self.exchange(&stream, &header, &mut payload, oneway, cancel);
        let outcome = match budget {
            None => exchange.await,
            Some(budget) => tokio::select! {
                outcome = exchange => outcome,
                _ = self.providers.time().sleep(budget) => {
                    stream.reset(RpcErrorCode::Canceled.code());
                    Err(RpcError::DeadlineExceeded)
                }
            },
        };
        if let Some(payload) = payload.as_mut() {
            payload.complete();
        }

        match outcome {
            Ok(Some(response)) => request.set_response(response),
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::debug!(%request, error = %e, "invocation failed");
                Err(e)
            }
        }
    }
}
