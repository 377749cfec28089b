//! Payload producers and consumers.
//!
//! Outgoing payloads are pulled chunk by chunk from a [`PayloadSource`] while
//! the request or response is written to its stream. Incoming payloads are
//! read from the stream through an [`IncomingPayload`]. Both sides are
//! *completed* exactly once: after being fully sent or read, or when their
//! owner is disposed.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use async_trait::async_trait;
use bytes::Bytes;
use skein_core::CancellationToken;
use skein_transport::MultiplexedStream;

use crate::RpcResult;

/// Producer of outgoing payload bytes.
#[async_trait(?Send)]
pub trait PayloadSource {
    /// Next chunk, or `None` once the payload is exhausted.
    async fn next_chunk(&mut self) -> RpcResult<Option<Bytes>>;

    /// Release the producer. Called once, whether or not it was exhausted.
    fn complete(&mut self) {}
}

/// A payload held in memory.
#[derive(Debug, Clone, Default)]
pub struct BytesPayload {
    data: Option<Bytes>,
}

impl BytesPayload {
    /// A payload of `data`.
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            data: (!data.is_empty()).then_some(data),
        }
    }

    /// An empty payload.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait(?Send)]
impl PayloadSource for BytesPayload {
    async fn next_chunk(&mut self) -> RpcResult<Option<Bytes>> {
        Ok(self.data.take())
    }

    fn complete(&mut self) {
        self.data = None;
    }
}

/// Pull every chunk out of `payload` into `stream`. Does not finish the stream.
pub(crate) async fn send_payload(
    payload: &mut dyn PayloadSource,
    stream: &MultiplexedStream,
    cancel: &CancellationToken,
) -> RpcResult<()> {
    while let Some(chunk) = payload.next_chunk().await? {
        stream.write(&chunk, cancel).await?;
    }
    Ok(())
}

enum Source {
    Stream(Rc<MultiplexedStream>),
    Buffered(VecDeque<Bytes>),
    Completed,
}

/// Consumer of an incoming request or response payload.
///
/// Dropping the payload completes it. Completing a stream-backed payload
/// abandons the unread part: the peer's writes keep flowing and the data is
/// discarded.
pub struct IncomingPayload {
    source: Source,
    on_complete: Vec<Box<dyn FnOnce()>>,
}

impl IncomingPayload {
    /// A payload with no bytes.
    pub fn empty() -> Self {
        Self::with_source(Source::Buffered(VecDeque::new()))
    }

    /// A payload backed by bytes already in memory.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let mut chunks = VecDeque::new();
        if !data.is_empty() {
            chunks.push_back(data);
        }
        Self::with_source(Source::Buffered(chunks))
    }

    pub(crate) fn from_stream(stream: Rc<MultiplexedStream>) -> Self {
        Self::with_source(Source::Stream(stream))
    }

    fn with_source(source: Source) -> Self {
        Self {
            source,
            on_complete: Vec::new(),
        }
    }

    /// Run `callback` when the payload is completed.
    pub fn on_complete(&mut self, callback: impl FnOnce() + 'static) {
        if self.is_completed() {
            callback();
        } else {
            self.on_complete.push(Box::new(callback));
        }
    }

    /// Next chunk of at most `max` bytes, or `None` at the end.
    ///
    /// A completed payload reads as empty.
    pub async fn read_chunk(
        &mut self,
        max: usize,
        cancel: &CancellationToken,
    ) -> RpcResult<Option<Bytes>> {
        match &mut self.source {
            Source::Stream(stream) => Ok(stream.read_chunk(max, cancel).await?),
            Source::Buffered(chunks) => {
                let Some(front) = chunks.front_mut() else {
                    return Ok(None);
                };
                if front.len() <= max {
                    return Ok(chunks.pop_front());
                }
                Ok(Some(front.split_to(max.max(1))))
            }
            Source::Completed => Ok(None),
        }
    }

    /// Read everything up to the end, then complete the payload.
    pub async fn read_to_end(&mut self, cancel: &CancellationToken) -> RpcResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read_chunk(usize::MAX, cancel).await? {
            out.extend_from_slice(&chunk);
        }
        self.complete();
        Ok(out)
    }

    /// Release the payload. Idempotent.
    pub fn complete(&mut self) {
        if let Source::Stream(stream) = std::mem::replace(&mut self.source, Source::Completed) {
            stream.abandon_reads();
        }
        for callback in self.on_complete.drain(..) {
            callback();
        }
    }

    /// Whether [`complete`](Self::complete) ran.
    pub fn is_completed(&self) -> bool {
        matches!(self.source, Source::Completed)
    }
}

impl Drop for IncomingPayload {
    fn drop(&mut self) {
        self.complete();
    }
}

impl fmt::Debug for IncomingPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            Source::Stream(stream) => format!("{stream:?}"),
            Source::Buffered(chunks) => format!("{} buffered chunks", chunks.len()),
            Source::Completed => "completed".to_string(),
        };
        f.debug_struct("IncomingPayload")
            .field("source", &source)
            .finish()
    }
}
