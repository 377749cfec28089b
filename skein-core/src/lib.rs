//! # skein-core
//!
//! Core abstractions shared by the skein transport and RPC layers.
//!
//! - **Provider traits**: time, tasks and networking, bundled behind [`Providers`]
//! - **Cancellation**: an awaitable [`CancellationToken`] passed to every suspending call
//! - **Secure channel**: the handshake step run before a connection carries frames
//! - **Header codec**: pluggable serialization of request/response headers
//!
//! Everything here assumes a single-threaded runtime (`LocalSet` +
//! `spawn_local`), so no trait carries `Send` bounds.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod cancel;
mod codec;
mod duplex;
mod providers;
mod security;
mod task;
mod time;

pub use cancel::CancellationToken;
pub use codec::{CodecError, HeaderCodec, JsonCodec};
pub use duplex::{
    DuplexConnection, Listener, MemoryListener, MemoryNetworkProvider, NetworkProvider,
    TokioListener, TokioNetworkProvider,
};
pub use providers::{Providers, TokioProviders};
pub use security::{HandshakeError, IdentityChannel, PlainChannel, Role, SecureChannel};
pub use task::{TaskProvider, TokioTaskProvider};
pub use time::{TimeError, TimeProvider, TokioTimeProvider};
