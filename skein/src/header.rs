//! Request and response headers at the start of every RPC stream.
//!
//! Layout: `[header_len: u32 LE][header bytes][payload ... FIN]`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use skein_core::{CancellationToken, HeaderCodec};
use skein_transport::{MultiplexedStream, TransportError};

use crate::fields::{Fields, RequestFieldKey, ResponseFieldKey};
use crate::{RpcError, RpcResult, StatusCode};

const LENGTH_PREFIX: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RequestHeader {
    pub(crate) path: String,
    pub(crate) operation: String,
    #[serde(default)]
    pub(crate) fields: Fields<RequestFieldKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ResponseHeader {
    pub(crate) status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) error_message: Option<String>,
    #[serde(default)]
    pub(crate) fields: Fields<ResponseFieldKey>,
}

/// Encode `header` with its length prefix.
pub(crate) fn encode_header<C: HeaderCodec, H: Serialize>(
    codec: &C,
    header: &H,
    max: usize,
) -> RpcResult<Vec<u8>> {
    let body = codec.encode(header)?;
    if body.len() > max {
        return Err(RpcError::HeaderTooLarge {
            size: body.len(),
            max,
        });
    }
    let len = u32::try_from(body.len()).map_err(|_| RpcError::HeaderTooLarge {
        size: body.len(),
        max,
    })?;
    let mut out = Vec::with_capacity(LENGTH_PREFIX + body.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

pub(crate) async fn write_header<C: HeaderCodec, H: Serialize>(
    stream: &MultiplexedStream,
    codec: &C,
    header: &H,
    max: usize,
    cancel: &CancellationToken,
) -> RpcResult<()> {
    let encoded = encode_header(codec, header, max)?;
    stream.write(&encoded, cancel).await?;
    Ok(())
}

pub(crate) async fn read_header<C: HeaderCodec, H: DeserializeOwned>(
    stream: &MultiplexedStream,
    codec: &C,
    max: usize,
    cancel: &CancellationToken,
) -> RpcResult<H> {
    let mut prefix = [0u8; LENGTH_PREFIX];
    stream
        .read_exact(&mut prefix, cancel)
        .await
        .map_err(truncated)?;
    let len = u32::from_le_bytes(prefix) as usize;
    if len > max {
        return Err(RpcError::HeaderTooLarge { size: len, max });
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body, cancel).await.map_err(truncated)?;
    Ok(codec.decode(&body)?)
}

fn truncated(error: TransportError) -> RpcError {
    match error {
        TransportError::UnexpectedEof => {
            RpcError::InvalidHeader("stream ended inside the header".into())
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use skein_core::JsonCodec;

    use super::*;

    #[test]
    fn test_header_is_length_prefixed() {
        let header = RequestHeader {
            path: "/greeter".into(),
            operation: "greet".into(),
            fields: Fields::new(),
        };
        let encoded = encode_header(&JsonCodec, &header, 1024).expect("encode");
        let len = u32::from_le_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
        assert_eq!(len, encoded.len() - LENGTH_PREFIX);

        let decoded: RequestHeader = JsonCodec.decode(&encoded[LENGTH_PREFIX..]).expect("decode");
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_oversized_header_is_rejected() {
        let header = ResponseHeader {
            status: StatusCode::ApplicationError,
            error_message: Some("x".repeat(200)),
            fields: Fields::new(),
        };
        assert!(matches!(
            encode_header(&JsonCodec, &header, 64),
            Err(RpcError::HeaderTooLarge { max: 64, .. })
        ));
    }

    #[test]
    fn test_missing_optional_parts_decode() {
        let decoded: ResponseHeader = JsonCodec.decode(br#"{"status":"Ok"}"#).expect("decode");
        assert_eq!(decoded.status, StatusCode::Ok);
        assert!(decoded.error_message.is_none());
        assert!(decoded.fields.is_empty());
    }
}
