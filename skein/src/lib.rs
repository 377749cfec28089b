//! # skein
//!
//! Request/response invocation over skein multiplexed streams.
//!
//! ## Components
//!
//! - [`OutgoingRequest`] / [`IncomingResponse`]: the client's view of a call
//! - [`IncomingRequest`] / [`OutgoingResponse`]: the dispatcher's view
//! - [`Dispatcher`]: the one capability services, middlewares and routers share
//! - [`middleware`]: `Fn(Rc<dyn Dispatcher>) -> Rc<dyn Dispatcher>` factories
//! - [`Router`]: exact and prefix routes behind a middleware chain
//! - [`ClientConnection`] and [`Server`]: the two ends of a connection
//!
//! Every call runs on its own stream. A stream starts with a length-prefixed
//! header followed by the payload; two-way calls get their response on the
//! same stream, oneway calls use a unidirectional stream and get nothing back.
//!
//! ## Example
//!
//! ```rust,ignore
//! let dispatcher = Router::new()
//!     .use_middleware(middleware::logger())
//!     .map("/echo", InlineDispatcher::new(|mut request: IncomingRequest| async move {
//!         let body = request.read_payload().await?;
//!         Ok(OutgoingResponse::ok().with_payload(BytesPayload::new(body)))
//!     }))
//!     .build();
//! let server = Server::new(providers.clone(), dispatcher, ServerOptions::default());
//! let addr = server.listen("127.0.0.1:0").await?;
//!
//! let client = ClientConnection::connect(providers, &addr, ClientOptions::default(), &cancel).await?;
//! let mut request = OutgoingRequest::new(ServiceAddress::new("/echo"))
//!     .with_operation("echo")
//!     .with_payload(BytesPayload::new("hello"));
//! let body = client.call(&mut request, &cancel).await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod client;
mod dispatcher;
mod error;
mod features;
pub mod fields;
mod header;
pub mod middleware;
mod options;
pub mod payload;
mod request;
mod response;
mod router;
mod server;
mod service_address;
mod status;

pub use client::{ClientConnection, Invoker};
pub use dispatcher::{dispatch_contained, Dispatcher, InlineDispatcher};
pub use error::{DispatchError, RpcError, RpcResult};
pub use features::{Deadline, FeatureCollection, RemoteAddress};
pub use fields::{Fields, RequestFieldKey, ResponseFieldKey};
pub use middleware::Middleware;
pub use options::{ClientOptions, ServerOptions, DEFAULT_MAX_HEADER_SIZE};
pub use payload::{BytesPayload, IncomingPayload, PayloadSource};
pub use request::{IncomingRequest, OutgoingRequest};
pub use response::{IncomingResponse, OutgoingResponse};
pub use router::Router;
pub use server::Server;
pub use service_address::{ServiceAddress, SCHEME};
pub use status::{RpcErrorCode, RpcErrorCodes, StatusCode, RPC_WIRE_BASE};

pub use skein_core::CancellationToken;
