//! Middleware composition.
//!
//! A middleware wraps the next dispatcher and returns a new one. Registered as
//! `[M0, M1, ..., Mn]` and composed once, `M0` ends up outermost: a request
//! passes M0, M1, ..., Mn, the target, then the response travels back out in
//! reverse order.

use std::rc::Rc;

use async_trait::async_trait;

use crate::{DispatchError, Dispatcher, IncomingRequest, OutgoingResponse};

/// Factory wrapping the next dispatcher.
pub type Middleware = Rc<dyn Fn(Rc<dyn Dispatcher>) -> Rc<dyn Dispatcher>>;

/// Compose `middlewares` around `target` into one effective dispatcher.
pub fn compose(middlewares: &[Middleware], target: Rc<dyn Dispatcher>) -> Rc<dyn Dispatcher> {
    middlewares
        .iter()
        .rev()
        .fold(target, |next, middleware| middleware(next))
}

/// Middleware logging each dispatch and its outcome at debug level.
pub fn logger() -> Middleware {
    Rc::new(|next: Rc<dyn Dispatcher>| -> Rc<dyn Dispatcher> {
        Rc::new(Logger { next })
    })
}

struct Logger {
    next: Rc<dyn Dispatcher>,
}

#[async_trait(?Send)]
impl Dispatcher for Logger {
    async fn dispatch(&self, request: IncomingRequest) -> Result<OutgoingResponse, DispatchError> {
        let path = request.path().to_string();
        let operation = request.operation().to_string();
        tracing::debug!(%path, %operation, oneway = request.is_oneway(), "dispatch started");
        let result = self.next.dispatch(request).await;
        match &result {
            Ok(response) => {
                let status = response.status();
                tracing::debug!(%path, %operation, %status, "dispatch completed")
            }
            Err(fault) => tracing::debug!(%path, %operation, error = %fault, "dispatch faulted"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::InlineDispatcher;

    struct Recorder {
        name: &'static str,
        log: Rc<RefCell<Vec<String>>>,
        next: Rc<dyn Dispatcher>,
    }

    #[async_trait(?Send)]
    impl Dispatcher for Recorder {
        async fn dispatch(
            &self,
            request: IncomingRequest,
        ) -> Result<OutgoingResponse, DispatchError> {
            self.log.borrow_mut().push(format!("{} before", self.name));
            let response = self.next.dispatch(request).await;
            self.log.borrow_mut().push(format!("{} after", self.name));
            response
        }
    }

    fn recorder(name: &'static str, log: &Rc<RefCell<Vec<String>>>) -> Middleware {
        let log = log.clone();
        Rc::new(move |next: Rc<dyn Dispatcher>| -> Rc<dyn Dispatcher> {
            Rc::new(Recorder {
                name,
                log: log.clone(),
                next,
            })
        })
    }

    #[tokio::test]
    async fn test_first_registered_is_outermost() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let target_log = log.clone();
        let target: Rc<dyn Dispatcher> = Rc::new(InlineDispatcher::new(
            move |_request: IncomingRequest| {
                target_log.borrow_mut().push("target".to_string());
                async { Ok(OutgoingResponse::ok()) }
            },
        ));

        let effective = compose(
            &[recorder("A", &log), logger(), recorder("B", &log)],
            target,
        );
        effective
            .dispatch(IncomingRequest::new("/svc", "op"))
            .await
            .expect("dispatch");

        assert_eq!(
            *log.borrow(),
            vec!["A before", "B before", "target", "B after", "A after"]
        );
    }

    #[tokio::test]
    async fn test_no_middleware_is_the_target() {
        let target: Rc<dyn Dispatcher> = Rc::new(InlineDispatcher::new(
            |_request: IncomingRequest| async { Ok(OutgoingResponse::ok()) },
        ));
        let effective = compose(&[], target.clone());
        assert!(Rc::ptr_eq(&effective, &target));
    }
}
