//! Outgoing and incoming responses.

use std::fmt;

use skein_core::CancellationToken;

use crate::fields::{Fields, ResponseFieldKey};
use crate::payload::{IncomingPayload, PayloadSource};
use crate::{RpcError, RpcResult, StatusCode};

/// Response produced by a dispatcher.
pub struct OutgoingResponse {
    status: StatusCode,
    error_message: Option<String>,
    fields: Fields<ResponseFieldKey>,
    payload: Option<Box<dyn PayloadSource>>,
}

impl OutgoingResponse {
    /// A successful response with an empty payload.
    pub fn ok() -> Self {
        Self {
            status: StatusCode::Ok,
            error_message: None,
            fields: Fields::new(),
            payload: None,
        }
    }

    /// A failure response.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            error_message: Some(message.into()),
            fields: Fields::new(),
            payload: None,
        }
    }

    /// `NotFound` for an unmapped path.
    pub fn not_found(path: &str) -> Self {
        Self::error(StatusCode::NotFound, format!("no dispatcher mapped to '{path}'"))
    }

    /// Generic failure sent in place of an unhandled dispatch fault.
    pub fn internal_error() -> Self {
        Self::error(StatusCode::InternalError, "dispatch failed")
    }

    /// Set the payload producer.
    pub fn with_payload(mut self, payload: impl PayloadSource + 'static) -> Self {
        if let Some(mut previous) = self.payload.replace(Box::new(payload)) {
            previous.complete();
        }
        self
    }

    /// Response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Error message of a failure response.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Response fields.
    pub fn fields(&self) -> &Fields<ResponseFieldKey> {
        &self.fields
    }

    /// Mutable response fields.
    pub fn fields_mut(&mut self) -> &mut Fields<ResponseFieldKey> {
        &mut self.fields
    }

    pub(crate) fn take_payload(&mut self) -> Option<Box<dyn PayloadSource>> {
        self.payload.take()
    }
}

impl Drop for OutgoingResponse {
    fn drop(&mut self) {
        if let Some(mut payload) = self.payload.take() {
            payload.complete();
        }
    }
}

impl fmt::Debug for OutgoingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingResponse")
            .field("status", &self.status)
            .field("error_message", &self.error_message)
            .field("fields", &self.fields)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// Response received for a two-way request.
///
/// Owned by its [`OutgoingRequest`](crate::OutgoingRequest).
///
/// Dropping the response disposes it.
#[derive(Debug)]
pub struct IncomingResponse {
    status: StatusCode,
    error_message: Option<String>,
    fields: Fields<ResponseFieldKey>,
    payload: IncomingPayload,
    disposed: bool,
}

impl IncomingResponse {
    /// A response with `status` and `payload`.
    pub fn new(status: StatusCode, payload: IncomingPayload) -> Self {
        Self {
            status,
            error_message: None,
            fields: Fields::new(),
            payload,
            disposed: false,
        }
    }

    /// Set the error message.
    pub fn with_error_message(mut self, message: Option<String>) -> Self {
        self.error_message = message;
        self
    }

    /// Set the fields.
    pub fn with_fields(mut self, fields: Fields<ResponseFieldKey>) -> Self {
        self.fields = fields;
        self
    }

    /// Response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Error message of a failure response.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Response fields.
    pub fn fields(&self) -> &Fields<ResponseFieldKey> {
        &self.fields
    }

    /// The payload consumer.
    pub fn payload_mut(&mut self) -> &mut IncomingPayload {
        &mut self.payload
    }

    /// `Ok(())` for a successful status, `RpcError::Remote` otherwise.
    pub fn check(&self) -> RpcResult<()> {
        if self.status.is_ok() {
            return Ok(());
        }
        Err(RpcError::Remote {
            status: self.status,
            message: self
                .error_message
                .clone()
                .unwrap_or_else(|| self.status.to_string()),
        })
    }

    /// Read the whole payload.
    pub async fn read_payload(&mut self, cancel: &CancellationToken) -> RpcResult<Vec<u8>> {
        if self.disposed {
            return Err(RpcError::RequestDisposed);
        }
        self.payload.read_to_end(cancel).await
    }

    /// Complete the payload. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.payload.complete();
    }

    /// Whether the response was disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for IncomingResponse {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BytesPayload;

    #[test]
    fn test_check_maps_failure_status() {
        let ok = IncomingResponse::new(StatusCode::Ok, IncomingPayload::empty());
        assert!(ok.check().is_ok());

        let failed = IncomingResponse::new(StatusCode::NotFound, IncomingPayload::empty())
            .with_error_message(Some("no dispatcher mapped to '/x'".into()));
        assert!(matches!(
            failed.check(),
            Err(RpcError::Remote { status: StatusCode::NotFound, ref message })
                if message == "no dispatcher mapped to '/x'"
        ));

        let bare = IncomingResponse::new(StatusCode::Unavailable, IncomingPayload::empty());
        assert!(matches!(
            bare.check(),
            Err(RpcError::Remote { ref message, .. }) if message == "unavailable"
        ));
    }

    #[tokio::test]
    async fn test_disposed_response_refuses_reads() {
        let cancel = CancellationToken::new();
        let mut response =
            IncomingResponse::new(StatusCode::Ok, IncomingPayload::from_bytes("body"));
        response.dispose();
        response.dispose();
        assert!(response.payload_mut().is_completed());
        assert!(matches!(
            response.read_payload(&cancel).await,
            Err(RpcError::RequestDisposed)
        ));
    }

    #[test]
    fn test_outgoing_constructors() {
        let response = OutgoingResponse::ok().with_payload(BytesPayload::new("hi"));
        assert_eq!(response.status(), StatusCode::Ok);
        assert!(response.error_message().is_none());

        let internal = OutgoingResponse::internal_error();
        assert_eq!(internal.status(), StatusCode::InternalError);
        assert_eq!(internal.error_message(), Some("dispatch failed"));
        assert_eq!(
            OutgoingResponse::not_found("/missing").status(),
            StatusCode::NotFound
        );
    }
}
