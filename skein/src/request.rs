//! Outgoing and incoming requests.

use std::fmt;

use skein_core::CancellationToken;

use crate::fields::{Fields, RequestFieldKey};
use crate::payload::{IncomingPayload, PayloadSource};
use crate::{FeatureCollection, IncomingResponse, RpcError, RpcResult, ServiceAddress};

/// A request built by the application and handed to an invoker.
///
/// Fields and payload may only change before the request is sent; features
/// stay editable. The request owns at most one [`IncomingResponse`] at a time.
///
/// Dropping the request disposes it.
pub struct OutgoingRequest {
    address: ServiceAddress,
    operation: String,
    oneway: bool,
    features: FeatureCollection,
    fields: Fields<RequestFieldKey>,
    payload: Option<Box<dyn PayloadSource>>,
    response: Option<IncomingResponse>,
    sent: bool,
    disposed: bool,
}

impl OutgoingRequest {
    /// A two-way request to `address` with an empty operation and payload.
    pub fn new(address: ServiceAddress) -> Self {
        Self {
            address,
            operation: String::new(),
            oneway: false,
            features: FeatureCollection::new(),
            fields: Fields::new(),
            payload: None,
            response: None,
            sent: false,
            disposed: false,
        }
    }

    /// Set the operation name.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    /// Mark the request oneway: no response is created or awaited.
    pub fn with_oneway(mut self, oneway: bool) -> Self {
        self.oneway = oneway;
        self
    }

    /// Set the payload producer.
    pub fn with_payload(mut self, payload: impl PayloadSource + 'static) -> Self {
        self.payload = Some(Box::new(payload));
        self
    }

    /// Target service.
    pub fn service_address(&self) -> &ServiceAddress {
        &self.address
    }

    /// Operation to invoke.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Whether the request is oneway.
    pub fn is_oneway(&self) -> bool {
        self.oneway
    }

    /// Whether the request was handed to the connection.
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Whether the request was disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Request-scoped features.
    pub fn features(&self) -> &FeatureCollection {
        &self.features
    }

    /// Mutable features. Always allowed.
    pub fn features_mut(&mut self) -> &mut FeatureCollection {
        &mut self.features
    }

    /// Request fields.
    pub fn fields(&self) -> &Fields<RequestFieldKey> {
        &self.fields
    }

    /// Mutable fields, until the request is sent.
    pub fn fields_mut(&mut self) -> RpcResult<&mut Fields<RequestFieldKey>> {
        self.check_unsent()?;
        Ok(&mut self.fields)
    }

    /// Replace the payload producer, until the request is sent.
    ///
    /// The replaced producer is completed.
    pub fn set_payload(&mut self, payload: impl PayloadSource + 'static) -> RpcResult<()> {
        self.check_unsent()?;
        if let Some(mut previous) = self.payload.replace(Box::new(payload)) {
            previous.complete();
        }
        Ok(())
    }

    /// The current response.
    pub fn response(&self) -> Option<&IncomingResponse> {
        self.response.as_ref()
    }

    /// Mutable access to the current response, to read its payload.
    pub fn response_mut(&mut self) -> Option<&mut IncomingResponse> {
        self.response.as_mut()
    }

    /// Make `response` current, disposing the previous one first.
    ///
    /// # Errors
    ///
    /// `RequestDisposed` once the request was disposed; `response` is
    /// disposed in that case.
    pub fn set_response(&mut self, mut response: IncomingResponse) -> RpcResult<()> {
        if self.disposed {
            response.dispose();
            return Err(RpcError::RequestDisposed);
        }
        if let Some(mut previous) = self.response.take() {
            previous.dispose();
        }
        self.response = Some(response);
        Ok(())
    }

    /// Complete the payload producer and dispose the current response. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(mut payload) = self.payload.take() {
            payload.complete();
        }
        if let Some(response) = self.response.as_mut() {
            response.dispose();
        }
        tracing::trace!(request = %self, "request disposed");
    }

    /// Freeze the request and hand its fields and payload to the invoker.
    pub(crate) fn begin_send(
        &mut self,
    ) -> RpcResult<(Fields<RequestFieldKey>, Option<Box<dyn PayloadSource>>)> {
        self.check_unsent()?;
        self.sent = true;
        Ok((self.fields.clone(), self.payload.take()))
    }

    fn check_unsent(&self) -> RpcResult<()> {
        if self.disposed {
            return Err(RpcError::RequestDisposed);
        }
        if self.sent {
            return Err(RpcError::RequestAlreadySent);
        }
        Ok(())
    }
}

impl Drop for OutgoingRequest {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Display for OutgoingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' on '{}'", self.operation, self.address)
    }
}

impl fmt::Debug for OutgoingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingRequest")
            .field("address", &self.address)
            .field("operation", &self.operation)
            .field("oneway", &self.oneway)
            .field("sent", &self.sent)
            .field("disposed", &self.disposed)
            .finish()
    }
}

/// A request as seen by dispatchers.
#[derive(Debug)]
pub struct IncomingRequest {
    path: String,
    operation: String,
    oneway: bool,
    fields: Fields<RequestFieldKey>,
    features: FeatureCollection,
    payload: IncomingPayload,
    cancel: CancellationToken,
}

impl IncomingRequest {
    /// A two-way request for `operation` on `path` with an empty payload.
    pub fn new(path: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operation: operation.into(),
            oneway: false,
            fields: Fields::new(),
            features: FeatureCollection::new(),
            payload: IncomingPayload::empty(),
            cancel: CancellationToken::new(),
        }
    }

    /// Mark the request oneway.
    pub fn with_oneway(mut self, oneway: bool) -> Self {
        self.oneway = oneway;
        self
    }

    /// Set the fields received in the header.
    pub fn with_fields(mut self, fields: Fields<RequestFieldKey>) -> Self {
        self.fields = fields;
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: IncomingPayload) -> Self {
        self.payload = payload;
        self
    }

    /// Use `cancel` as the request's cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Path of the target service.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Whether the caller expects no response.
    pub fn is_oneway(&self) -> bool {
        self.oneway
    }

    /// Fields received in the header.
    pub fn fields(&self) -> &Fields<RequestFieldKey> {
        &self.fields
    }

    /// Request-scoped features.
    pub fn features(&self) -> &FeatureCollection {
        &self.features
    }

    /// Mutable features, for middlewares handing context to the dispatcher.
    pub fn features_mut(&mut self) -> &mut FeatureCollection {
        &mut self.features
    }

    /// The payload consumer.
    pub fn payload_mut(&mut self) -> &mut IncomingPayload {
        &mut self.payload
    }

    /// Fires when the deadline expires or the server gives up on the request.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Read the whole payload, bounded by the request's cancellation token.
    pub async fn read_payload(&mut self) -> RpcResult<Vec<u8>> {
        let cancel = self.cancel.clone();
        self.payload.read_to_end(&cancel).await
    }
}

impl fmt::Display for IncomingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' on '{}'", self.operation, self.path)
    }
}
