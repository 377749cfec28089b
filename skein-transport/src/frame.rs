//! Frame codec.
//!
//! Frame format: `[type:1][flags:1][length:4][checksum:4][body:length]`
//!
//! - **type**: one of the `FRAME_*` constants
//! - **flags**: `FLAG_FIN` on STREAM frames, zero otherwise
//! - **length**: body size (little-endian u32)
//! - **checksum**: CRC32C of (type + flags + body)
//!
//! Stream-scoped frames start their body with the stream id (little-endian u64).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::settings::PeerSettings;
use crate::stream_id::StreamId;

/// Header size: 1 (type) + 1 (flags) + 4 (length) + 4 (checksum) = 10 bytes.
pub const HEADER_SIZE: usize = 10;

/// Body bytes a STREAM frame spends on its stream id.
pub const STREAM_OVERHEAD: usize = 8;

/// Half-closes the sender's write side of a stream.
pub const FLAG_FIN: u8 = 0x01;

const FRAME_STREAM: u8 = 0;
const FRAME_WINDOW_UPDATE: u8 = 1;
const FRAME_RESET: u8 = 2;
const FRAME_PING: u8 = 3;
const FRAME_PONG: u8 = 4;
const FRAME_SETTINGS: u8 = 5;
const FRAME_CLOSE: u8 = 6;

/// Frame decoding errors. All of them are fatal for the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Checksum verification failed.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the received bytes.
        actual: u32,
    },

    /// Body larger than the receiver accepts.
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge {
        /// Announced body size.
        size: usize,
        /// Largest body accepted.
        max: usize,
    },

    /// Unknown frame type byte.
    #[error("unknown frame type {0}")]
    UnknownType(u8),

    /// The body does not match the frame type's layout.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Stream data, optionally half-closing the sender's write side.
    Stream {
        /// Target stream.
        stream_id: StreamId,
        /// Whether this is the last frame the sender writes on the stream.
        fin: bool,
        /// Payload, possibly empty when `fin` is set.
        data: Bytes,
    },
    /// Grants additional send credit on a stream.
    WindowUpdate {
        /// Target stream.
        stream_id: StreamId,
        /// Additional bytes the receiver may send.
        increment: u64,
    },
    /// Abruptly terminates a stream.
    Reset {
        /// Target stream.
        stream_id: StreamId,
        /// Wire error code.
        code: u64,
    },
    /// Liveness probe, answered with a PONG carrying the same payload.
    Ping {
        /// Opaque payload.
        payload: u64,
    },
    /// Answer to a PING.
    Pong {
        /// Payload echoed from the PING.
        payload: u64,
    },
    /// Connection parameters, only valid as the first frame.
    Settings(PeerSettings),
    /// Graceful connection shutdown.
    Close {
        /// Wire error code.
        code: u64,
    },
}

impl Frame {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Stream { .. } => "STREAM",
            Frame::WindowUpdate { .. } => "WINDOW_UPDATE",
            Frame::Reset { .. } => "RESET",
            Frame::Ping { .. } => "PING",
            Frame::Pong { .. } => "PONG",
            Frame::Settings(_) => "SETTINGS",
            Frame::Close { .. } => "CLOSE",
        }
    }

    /// Stream the frame is scoped to, if any.
    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            Frame::Stream { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Reset { stream_id, .. } => Some(*stream_id),
            _ => None,
        }
    }

    /// Size of the encoded frame, header included.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE
            + match self {
                Frame::Stream { data, .. } => STREAM_OVERHEAD + data.len(),
                Frame::WindowUpdate { .. } | Frame::Reset { .. } => 16,
                Frame::Ping { .. } | Frame::Pong { .. } | Frame::Close { .. } => 8,
                Frame::Settings(settings) => settings.encoded_len(),
            }
    }

    /// Append the encoded frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        let start = dst.len();
        let (frame_type, flags) = match self {
            Frame::Stream { fin, .. } => (FRAME_STREAM, if *fin { FLAG_FIN } else { 0 }),
            Frame::WindowUpdate { .. } => (FRAME_WINDOW_UPDATE, 0),
            Frame::Reset { .. } => (FRAME_RESET, 0),
            Frame::Ping { .. } => (FRAME_PING, 0),
            Frame::Pong { .. } => (FRAME_PONG, 0),
            Frame::Settings(_) => (FRAME_SETTINGS, 0),
            Frame::Close { .. } => (FRAME_CLOSE, 0),
        };
        dst.put_u8(frame_type);
        dst.put_u8(flags);
        // length and checksum are patched once the body is written
        dst.put_u32_le(0);
        dst.put_u32_le(0);

        match self {
            Frame::Stream {
                stream_id, data, ..
            } => {
                dst.put_u64_le(stream_id.value());
                dst.put_slice(data);
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                dst.put_u64_le(stream_id.value());
                dst.put_u64_le(*increment);
            }
            Frame::Reset { stream_id, code } => {
                dst.put_u64_le(stream_id.value());
                dst.put_u64_le(*code);
            }
            Frame::Ping { payload } | Frame::Pong { payload } => dst.put_u64_le(*payload),
            Frame::Settings(settings) => settings.encode_body(dst),
            Frame::Close { code } => dst.put_u64_le(*code),
        }

        let body_len = dst.len() - start - HEADER_SIZE;
        dst[start + 2..start + 6].copy_from_slice(&(body_len as u32).to_le_bytes());
        let checksum = compute_checksum(&dst[start..start + 2], &dst[start + HEADER_SIZE..]);
        dst[start + 6..start + 10].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Try to decode one frame from the front of `src`.
    ///
    /// Returns `Ok(None)` when more bytes are needed; nothing is consumed in
    /// that case. On success the frame's bytes are removed from `src`.
    ///
    /// # Errors
    ///
    /// Any error means the byte stream can no longer be trusted.
    pub fn decode(src: &mut BytesMut, max_body: usize) -> Result<Option<Frame>, FrameError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }
        let frame_type = src[0];
        let flags = src[1];
        let body_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
        let expected = u32::from_le_bytes([src[6], src[7], src[8], src[9]]);

        if frame_type > FRAME_CLOSE {
            return Err(FrameError::UnknownType(frame_type));
        }
        if body_len > max_body {
            return Err(FrameError::TooLarge {
                size: body_len,
                max: max_body,
            });
        }
        if src.len() < HEADER_SIZE + body_len {
            src.reserve(HEADER_SIZE + body_len - src.len());
            return Ok(None);
        }

        let actual = compute_checksum(&src[0..2], &src[HEADER_SIZE..HEADER_SIZE + body_len]);
        if actual != expected {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }

        src.advance(HEADER_SIZE);
        let mut body = src.split_to(body_len).freeze();

        let frame = match frame_type {
            FRAME_STREAM => {
                let stream_id = read_stream_id(&mut body)?;
                Frame::Stream {
                    stream_id,
                    fin: flags & FLAG_FIN != 0,
                    data: body,
                }
            }
            FRAME_WINDOW_UPDATE => {
                let stream_id = read_stream_id(&mut body)?;
                Frame::WindowUpdate {
                    stream_id,
                    increment: read_u64(&mut body, "WINDOW_UPDATE")?,
                }
            }
            FRAME_RESET => {
                let stream_id = read_stream_id(&mut body)?;
                Frame::Reset {
                    stream_id,
                    code: read_u64(&mut body, "RESET")?,
                }
            }
            FRAME_PING => Frame::Ping {
                payload: read_u64(&mut body, "PING")?,
            },
            FRAME_PONG => Frame::Pong {
                payload: read_u64(&mut body, "PONG")?,
            },
            FRAME_SETTINGS => Frame::Settings(PeerSettings::decode_body(&body)?),
            _ => Frame::Close {
                code: read_u64(&mut body, "CLOSE")?,
            },
        };
        Ok(Some(frame))
    }
}

fn compute_checksum(header: &[u8], body: &[u8]) -> u32 {
    crc32c::crc32c_append(crc32c::crc32c(header), body)
}

fn read_stream_id(body: &mut Bytes) -> Result<StreamId, FrameError> {
    if body.len() < STREAM_OVERHEAD {
        return Err(FrameError::Malformed("missing stream id".into()));
    }
    Ok(StreamId::from_value(body.get_u64_le()))
}

fn read_u64(body: &mut Bytes, kind: &str) -> Result<u64, FrameError> {
    if body.len() != 8 {
        return Err(FrameError::Malformed(format!(
            "{kind} body has {} trailing bytes, expected 8",
            body.len()
        )));
    }
    Ok(body.get_u64_le())
}
