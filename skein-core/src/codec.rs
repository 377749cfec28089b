//! Pluggable header serialization.
//!
//! Request and response headers travel at the start of every RPC stream. The
//! [`HeaderCodec`] trait decides how they are turned into bytes; [`JsonCodec`]
//! is the default and keeps frames readable in packet captures.
//!
//! ```rust
//! use skein_core::{HeaderCodec, JsonCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Header {
//!     path: String,
//! }
//!
//! let codec = JsonCodec;
//! let bytes = codec.encode(&Header { path: "/greeter".into() }).unwrap();
//! let header: Header = codec.decode(&bytes).unwrap();
//! assert_eq!(header.path, "/greeter");
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Failed to encode a value to bytes.
    #[error("encode error: {0}")]
    Encode(Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to a value.
    #[error("decode error: {0}")]
    Decode(Box<dyn std::error::Error + Send + Sync>),
}

/// Serialization format for headers.
///
/// Requires `Clone + 'static` so a codec can be stored inside long-lived
/// client and server state.
pub trait HeaderCodec: Clone + 'static {
    /// Encode a serializable value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode a value from bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if the bytes are not a valid encoding.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl HeaderCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}
