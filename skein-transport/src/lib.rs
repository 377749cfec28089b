//! # skein-transport
//!
//! Many independent, flow-controlled logical streams over one ordered duplex
//! byte connection.
//!
//! ## Components
//!
//! - [`frame`]: the wire codec (`STREAM`, `WINDOW_UPDATE`, `RESET`, `PING`,
//!   `PONG`, `SETTINGS`, `CLOSE`)
//! - [`SendCredit`] / [`ReceiveWindow`]: per-stream credit bookkeeping
//! - [`MultiplexedStream`]: one bidirectional or unidirectional channel
//! - [`MultiplexedConnection`]: handshake, stream table, the single reader
//!   and single writer, graceful close and abort
//!
//! ## Example
//!
//! ```rust,ignore
//! let connection = MultiplexedConnection::new(providers, duplex, Role::Client, ConnectionOptions::default());
//! connection.connect(&cancel).await?;
//!
//! let stream = connection.create_stream(true)?;
//! stream.write_and_finish(b"hello", &cancel).await?;
//! let reply = stream.read_to_end(&cancel).await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod connection;
mod error;
mod error_code;
mod flow;
pub mod frame;
mod metrics;
mod settings;
mod stream;
mod stream_id;

pub use connection::{ConnectionState, MultiplexedConnection};
pub use error::{TransportError, TransportResult};
pub use error_code::{DefaultErrorCodes, ErrorCodeConverter, ResetReason};
pub use flow::{ReceiveWindow, SendCredit, WindowExceeded};
pub use metrics::ConnectionMetrics;
pub use settings::{ConnectionOptions, PeerSettings, MAX_STREAM_WINDOW, MIN_FRAME_SIZE};
pub use stream::{MultiplexedStream, StreamState};
pub use stream_id::StreamId;

pub use skein_core::{CancellationToken, Role};
