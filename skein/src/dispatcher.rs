//! The dispatcher capability and the fault-containment boundary.

use std::future::Future;
use std::rc::Rc;

use async_trait::async_trait;

use crate::{DispatchError, IncomingRequest, OutgoingResponse};

/// Turns a request into a response.
///
/// Services, middlewares and routers all implement this one capability.
/// `Err` is an unhandled fault: it aborts the dispatch and is replaced by a
/// generic failure response at the pipeline boundary.
#[async_trait(?Send)]
pub trait Dispatcher {
    /// Handle `request`.
    async fn dispatch(&self, request: IncomingRequest) -> Result<OutgoingResponse, DispatchError>;
}

#[async_trait(?Send)]
impl<D: Dispatcher + ?Sized + 'static> Dispatcher for Rc<D> {
    async fn dispatch(&self, request: IncomingRequest) -> Result<OutgoingResponse, DispatchError> {
        (**self).dispatch(request).await
    }
}

/// A dispatcher backed by a closure.
///
/// ```rust,ignore
/// let echo = InlineDispatcher::new(|mut request: IncomingRequest| async move {
///     let body = request.read_payload().await?;
///     Ok(OutgoingResponse::ok().with_payload(BytesPayload::new(body)))
/// });
/// ```
pub struct InlineDispatcher<F> {
    handler: F,
}

impl<F, Fut> InlineDispatcher<F>
where
    F: Fn(IncomingRequest) -> Fut,
    Fut: Future<Output = Result<OutgoingResponse, DispatchError>>,
{
    /// Dispatch every request through `handler`.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait(?Send)]
impl<F, Fut> Dispatcher for InlineDispatcher<F>
where
    F: Fn(IncomingRequest) -> Fut + 'static,
    Fut: Future<Output = Result<OutgoingResponse, DispatchError>> + 'static,
{
    async fn dispatch(&self, request: IncomingRequest) -> Result<OutgoingResponse, DispatchError> {
        (self.handler)(request).await
    }
}

/// Run `dispatcher`, converting an unhandled fault into a generic
/// `InternalError` response. The fault is logged here and nowhere else.
pub async fn dispatch_contained(
    dispatcher: &dyn Dispatcher,
    request: IncomingRequest,
) -> OutgoingResponse {
    let path = request.path().to_string();
    let operation = request.operation().to_string();
    match dispatcher.dispatch(request).await {
        Ok(response) => response,
        Err(fault) => {
            tracing::error!(%path, %operation, error = %fault, "dispatch failed");
            OutgoingResponse::internal_error()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatusCode;

    #[tokio::test]
    async fn test_fault_becomes_generic_failure() {
        let faulty = InlineDispatcher::new(|_request: IncomingRequest| async {
            Err(DispatchError::new("database password is hunter2"))
        });
        let response = dispatch_contained(&faulty, IncomingRequest::new("/db", "query")).await;
        assert_eq!(response.status(), StatusCode::InternalError);
        assert_eq!(response.error_message(), Some("dispatch failed"));
    }

    #[tokio::test]
    async fn test_rc_dispatcher_delegates() {
        let target: Rc<dyn Dispatcher> = Rc::new(InlineDispatcher::new(
            |request: IncomingRequest| async move {
                Ok(OutgoingResponse::error(
                    StatusCode::ApplicationError,
                    request.operation().to_string(),
                ))
            },
        ));
        let response = target
            .dispatch(IncomingRequest::new("/x", "op"))
            .await
            .expect("dispatch");
        assert_eq!(response.error_message(), Some("op"));
    }
}
