//! Path-based routing.

use std::rc::Rc;

use async_trait::async_trait;

use crate::middleware::{compose, Middleware};
use crate::service_address::normalize_path;
use crate::{DispatchError, Dispatcher, IncomingRequest, OutgoingResponse};

/// Builds the effective dispatcher of a server: a middleware chain in front of
/// a route table.
///
/// ```rust,ignore
/// let dispatcher = Router::new()
///     .use_middleware(skein::middleware::logger())
///     .map("/greeter", Greeter)
///     .mount("/admin", AdminService)
///     .build();
/// ```
#[derive(Default)]
pub struct Router {
    middlewares: Vec<Middleware>,
    routes: Vec<(String, Rc<dyn Dispatcher>)>,
    mounts: Vec<(String, Rc<dyn Dispatcher>)>,
}

impl Router {
    /// An empty router. Every path resolves to `NotFound`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware. The first one registered runs outermost.
    pub fn with_middleware(
        mut self,
        middleware: impl Fn(Rc<dyn Dispatcher>) -> Rc<dyn Dispatcher> + 'static,
    ) -> Self {
        self.middlewares.push(Rc::new(middleware));
        self
    }

    /// Append an already boxed middleware.
    pub fn use_middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Route requests for exactly `path` to `dispatcher`. A later mapping of
    /// the same path replaces the earlier one.
    pub fn map(mut self, path: &str, dispatcher: impl Dispatcher + 'static) -> Self {
        insert(&mut self.routes, normalize_path(path), Rc::new(dispatcher));
        self
    }

    /// Route requests for `prefix` and every path below it to `dispatcher`.
    pub fn mount(mut self, prefix: &str, dispatcher: impl Dispatcher + 'static) -> Self {
        insert(&mut self.mounts, normalize_path(prefix), Rc::new(dispatcher));
        self
    }

    /// Compose the middleware chain over the route table.
    pub fn build(self) -> Rc<dyn Dispatcher> {
        tracing::debug!(
            routes = self.routes.len(),
            mounts = self.mounts.len(),
            middlewares = self.middlewares.len(),
            "router built"
        );
        let table = Rc::new(RouteTable {
            routes: self.routes,
            mounts: self.mounts,
        });
        compose(&self.middlewares, table)
    }
}

fn insert(
    entries: &mut Vec<(String, Rc<dyn Dispatcher>)>,
    path: String,
    dispatcher: Rc<dyn Dispatcher>,
) {
    match entries.iter_mut().find(|(existing, _)| *existing == path) {
        Some(entry) => entry.1 = dispatcher,
        None => entries.push((path, dispatcher)),
    }
}

struct RouteTable {
    routes: Vec<(String, Rc<dyn Dispatcher>)>,
    mounts: Vec<(String, Rc<dyn Dispatcher>)>,
}

impl RouteTable {
    fn resolve(&self, path: &str) -> Option<&Rc<dyn Dispatcher>> {
        if let Some((_, dispatcher)) = self.routes.iter().find(|(route, _)| route == path) {
            return Some(dispatcher);
        }
        self.mounts
            .iter()
            .filter(|(prefix, _)| is_under(path, prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, dispatcher)| dispatcher)
    }
}

/// Whether `path` equals `prefix` or lies below it on a segment boundary.
fn is_under(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[async_trait(?Send)]
impl Dispatcher for RouteTable {
    async fn dispatch(&self, request: IncomingRequest) -> Result<OutgoingResponse, DispatchError> {
        let path = normalize_path(request.path());
        match self.resolve(&path) {
            Some(dispatcher) => dispatcher.dispatch(request).await,
            None => {
                tracing::debug!(%path, "no dispatcher mapped");
                Ok(OutgoingResponse::not_found(&path))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InlineDispatcher, StatusCode};

    fn named(name: &'static str) -> impl Dispatcher {
        InlineDispatcher::new(move |_request: IncomingRequest| async move {
            Ok(OutgoingResponse::error(StatusCode::ApplicationError, name))
        })
    }

    async fn route(dispatcher: &Rc<dyn Dispatcher>, path: &str) -> OutgoingResponse {
        dispatcher
            .dispatch(IncomingRequest::new(path, "op"))
            .await
            .expect("dispatch")
    }

    #[tokio::test]
    async fn test_exact_route_wins_over_mount() {
        let router = Router::new()
            .mount("/svc", named("mounted"))
            .map("/svc/special", named("exact"))
            .build();
        assert_eq!(route(&router, "/svc/special").await.error_message(), Some("exact"));
        assert_eq!(route(&router, "/svc/other").await.error_message(), Some("mounted"));
    }

    #[tokio::test]
    async fn test_longest_mount_on_segment_boundary() {
        let router = Router::new()
            .mount("/", named("root"))
            .mount("/a", named("a"))
            .mount("/a/b", named("ab"))
            .build();
        assert_eq!(route(&router, "/a/b/c").await.error_message(), Some("ab"));
        assert_eq!(route(&router, "/a/bc").await.error_message(), Some("a"));
        assert_eq!(route(&router, "/ab").await.error_message(), Some("root"));
    }

    #[tokio::test]
    async fn test_unmapped_path_is_not_found() {
        let router = Router::new().map("/greeter", named("greeter")).build();
        let response = route(&router, "/greeter/extra").await;
        assert_eq!(response.status(), StatusCode::NotFound);
        assert_eq!(route(&router, "/greeter/").await.error_message(), Some("greeter"));
    }

    #[tokio::test]
    async fn test_remap_replaces_route() {
        let router = Router::new()
            .map("/svc", named("first"))
            .map("/svc", named("second"))
            .build();
        assert_eq!(route(&router, "/svc").await.error_message(), Some("second"));
    }
}
