//! Router and middleware behavior, without a network in between.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use common::run_local;
use skein::{
    dispatch_contained, middleware, DispatchError, Dispatcher, IncomingRequest, InlineDispatcher,
    Middleware, OutgoingResponse, Router, StatusCode,
};

type Log = Rc<RefCell<Vec<String>>>;

struct Tagging {
    tag: &'static str,
    log: Log,
    next: Rc<dyn Dispatcher>,
}

#[async_trait(?Send)]
impl Dispatcher for Tagging {
    async fn dispatch(&self, request: IncomingRequest) -> Result<OutgoingResponse, DispatchError> {
        self.log.borrow_mut().push(format!("{}-before", self.tag));
        let response = self.next.dispatch(request).await;
        self.log.borrow_mut().push(format!("{}-after", self.tag));
        response
    }
}

fn tagging(tag: &'static str, log: &Log) -> Middleware {
    let log = log.clone();
    Rc::new(move |next: Rc<dyn Dispatcher>| -> Rc<dyn Dispatcher> {
        Rc::new(Tagging {
            tag,
            log: log.clone(),
            next,
        })
    })
}

fn target(log: &Log) -> impl Dispatcher {
    let log = log.clone();
    InlineDispatcher::new(move |_request: IncomingRequest| {
        log.borrow_mut().push("target".to_string());
        async { Ok::<_, DispatchError>(OutgoingResponse::ok()) }
    })
}

#[test]
fn test_middleware_runs_in_registration_order() {
    run_local(async {
        let log: Log = Rc::default();
        let dispatcher = Router::new()
            .use_middleware(tagging("A", &log))
            .use_middleware(tagging("B", &log))
            .map("/svc", target(&log))
            .build();

        let response = dispatch_contained(&*dispatcher, IncomingRequest::new("/svc", "op")).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(
            *log.borrow(),
            vec!["A-before", "B-before", "target", "B-after", "A-after"]
        );
    });
}

#[test]
fn test_middleware_wraps_unmapped_paths_too() {
    run_local(async {
        let log: Log = Rc::default();
        let dispatcher = Router::new()
            .use_middleware(tagging("A", &log))
            .map("/svc", target(&log))
            .build();

        let response =
            dispatch_contained(&*dispatcher, IncomingRequest::new("/other", "op")).await;
        assert_eq!(response.status(), StatusCode::NotFound);
        assert_eq!(*log.borrow(), vec!["A-before", "A-after"]);
    });
}

#[test]
fn test_faulting_middleware_skips_the_target() {
    run_local(async {
        let log: Log = Rc::default();
        let dispatcher = Router::new()
            .use_middleware(tagging("A", &log))
            .with_middleware(|_next: Rc<dyn Dispatcher>| -> Rc<dyn Dispatcher> {
                Rc::new(InlineDispatcher::new(|_request: IncomingRequest| async {
                    Err::<OutgoingResponse, _>(DispatchError::new("policy store unreachable"))
                }))
            })
            .use_middleware(tagging("C", &log))
            .map("/svc", target(&log))
            .build();

        let response = dispatch_contained(&*dispatcher, IncomingRequest::new("/svc", "op")).await;
        assert_eq!(response.status(), StatusCode::InternalError);
        assert_eq!(response.error_message(), Some("dispatch failed"));
        assert_eq!(*log.borrow(), vec!["A-before", "A-after"]);
    });
}

#[test]
fn test_middleware_may_answer_without_the_target() {
    run_local(async {
        let log: Log = Rc::default();
        let dispatcher = Router::new()
            .with_middleware(|next: Rc<dyn Dispatcher>| -> Rc<dyn Dispatcher> {
                Rc::new(InlineDispatcher::new(move |request: IncomingRequest| {
                    let next = next.clone();
                    async move {
                        if request.operation() == "admin" {
                            return Ok(OutgoingResponse::error(
                                StatusCode::Unauthorized,
                                "admin operations are disabled",
                            ));
                        }
                        next.dispatch(request).await
                    }
                }))
            })
            .use_middleware(middleware::logger())
            .map("/svc", target(&log))
            .build();

        let denied = dispatch_contained(&*dispatcher, IncomingRequest::new("/svc", "admin")).await;
        assert_eq!(denied.status(), StatusCode::Unauthorized);
        assert!(log.borrow().is_empty());

        let allowed = dispatch_contained(&*dispatcher, IncomingRequest::new("/svc", "read")).await;
        assert_eq!(allowed.status(), StatusCode::Ok);
        assert_eq!(*log.borrow(), vec!["target"]);
    });
}
