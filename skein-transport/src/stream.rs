//! Logical streams.

use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use skein_core::CancellationToken;

use crate::connection::shared::{wait_for, ConnectionShared, StreamShared};
use crate::error_code::ResetReason;
use crate::frame::Frame;
use crate::stream_id::StreamId;
use crate::{ConnectionState, TransportError, TransportResult};

/// Observable state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Created locally, nothing sent yet.
    Idle,
    /// Both sides may still transfer data.
    Open,
    /// One side finished.
    HalfClosed,
    /// Both sides finished.
    Closed,
    /// Terminated by a reset, a disposal or a connection failure.
    Reset,
}

/// One logical channel of a [`MultiplexedConnection`](crate::MultiplexedConnection).
///
/// Reads and writes are independent: a stream can be read from one task while
/// another writes to it through a shared `Rc`. Every suspending call takes a
/// [`CancellationToken`]; cancelling a pending read or write resets the stream.
///
/// Dropping the stream disposes it.
pub struct MultiplexedStream {
    stream: Rc<StreamShared>,
    conn: Rc<ConnectionShared>,
}

impl MultiplexedStream {
    pub(crate) fn new(stream: Rc<StreamShared>, conn: Rc<ConnectionShared>) -> Self {
        Self { stream, conn }
    }

    /// Wire id, assigned when the stream starts.
    pub fn id(&self) -> Option<StreamId> {
        self.stream.core.borrow().id
    }

    /// Whether both sides may write.
    pub fn is_bidirectional(&self) -> bool {
        self.stream.core.borrow().bidirectional
    }

    /// Whether the peer opened the stream.
    pub fn is_remote(&self) -> bool {
        self.stream.core.borrow().remote
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        let core = self.stream.core.borrow();
        if core.reset_code.is_some() || core.error.is_some() || core.disposed.is_some() {
            return StreamState::Reset;
        }
        if core.id.is_none() {
            return StreamState::Idle;
        }
        match (core.local_done(), core.remote_done()) {
            (true, true) => StreamState::Closed,
            (false, false) => StreamState::Open,
            _ => StreamState::HalfClosed,
        }
    }

    /// Error code of the reset that terminated the stream, if any.
    pub fn reset_code(&self) -> Option<u64> {
        self.stream.core.borrow().reset_code
    }

    /// Write `buf`, waiting for send credit as needed.
    ///
    /// Returns once every byte is queued for the connection writer; use
    /// [`flush`](Self::flush) to wait for the bytes to reach the transport.
    ///
    /// # Errors
    ///
    /// - `WritesClosed` after [`finish`](Self::finish)
    /// - `StreamAborted` after a reset or disposal
    /// - the connection error once the connection failed
    /// - `Cancelled`, after resetting the stream
    pub async fn write(&self, buf: &[u8], cancel: &CancellationToken) -> TransportResult<()> {
        if let Some(error) = self.stream.core.borrow().write_error() {
            return Err(error);
        }
        if buf.is_empty() {
            return Ok(());
        }
        let id = self.start(cancel).await?;
        let max_frame = self.conn.inner.borrow().remote.max_frame_size;

        let mut offset = 0;
        while offset < buf.len() {
            let remaining = (buf.len() - offset) as u64;
            let granted = wait_for(&self.stream.changed, cancel, || {
                let mut core = self.stream.core.borrow_mut();
                if let Some(error) = core.write_error() {
                    return Some(Err(error));
                }
                let n = core.send_credit.consume(remaining.min(max_frame));
                (n > 0).then_some(Ok(n as usize))
            })
            .await;
            let n = self.reset_on_cancel(granted)?;
            let data = Bytes::copy_from_slice(&buf[offset..offset + n]);
            self.queue(id, data, false)?;
            offset += n;
        }
        Ok(())
    }

    /// Half-close the write side. Idempotent.
    pub async fn finish(&self, cancel: &CancellationToken) -> TransportResult<()> {
        {
            let core = self.stream.core.borrow();
            if core.fin_queued {
                return Ok(());
            }
            if let Some(error) = core.write_error() {
                return Err(error);
            }
        }
        let id = self.start(cancel).await?;
        self.queue(id, Bytes::new(), true)
    }

    /// Write `buf` then half-close the write side.
    pub async fn write_and_finish(
        &self,
        buf: &[u8],
        cancel: &CancellationToken,
    ) -> TransportResult<()> {
        self.write(buf, cancel).await?;
        self.finish(cancel).await
    }

    /// Wait until everything written so far was handed to the transport.
    pub async fn flush(&self, cancel: &CancellationToken) -> TransportResult<()> {
        let flushed = wait_for(&self.stream.changed, cancel, || {
            let core = self.stream.core.borrow();
            if let Some(error) = &core.error {
                return Some(Err(error.clone()));
            }
            if core.pending_frames == 0 {
                return Some(Ok(()));
            }
            core.reset_code
                .map(|code| Err(TransportError::StreamAborted { code }))
        })
        .await;
        self.reset_on_cancel(flushed)
    }

    /// Read into `buf`, returning the number of bytes read.
    ///
    /// Returns `Ok(0)` at end of stream, and keeps doing so on later calls.
    ///
    /// # Errors
    ///
    /// - `StreamAborted` after a reset or disposal
    /// - the connection error once the connection failed
    /// - `Cancelled`, after resetting the stream
    pub async fn read(&self, buf: &mut [u8], cancel: &CancellationToken) -> TransportResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.read_chunk(buf.len(), cancel).await? {
            Some(chunk) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            None => Ok(0),
        }
    }

    /// Read the next buffered chunk of at most `max` bytes. `None` at end of stream.
    pub async fn read_chunk(
        &self,
        max: usize,
        cancel: &CancellationToken,
    ) -> TransportResult<Option<Bytes>> {
        let chunk = wait_for(&self.stream.changed, cancel, || {
            let mut core = self.stream.core.borrow_mut();
            if let Some(error) = core.read_error() {
                return Some(Err(error));
            }
            if let Some(chunk) = core.pop_chunk(max.max(1)) {
                let update = core.consumed(chunk.len());
                drop(core);
                if let Some((id, increment)) = update {
                    self.conn
                        .inner
                        .borrow_mut()
                        .enqueue_control(Frame::WindowUpdate {
                            stream_id: id,
                            increment,
                        });
                }
                return Some(Ok(Some(chunk)));
            }
            core.recv_fin.then_some(Ok(None))
        })
        .await;
        self.reset_on_cancel(chunk)
    }

    /// Fill `buf` completely.
    ///
    /// # Errors
    ///
    /// `UnexpectedEof` when the stream ends first.
    pub async fn read_exact(&self, buf: &mut [u8], cancel: &CancellationToken) -> TransportResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..], cancel).await? {
                0 => return Err(TransportError::UnexpectedEof),
                n => filled += n,
            }
        }
        Ok(())
    }

    /// Read until end of stream.
    pub async fn read_to_end(&self, cancel: &CancellationToken) -> TransportResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read_chunk(usize::MAX, cancel).await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Stop reading. Buffered and future data is discarded while credit keeps
    /// flowing back to the peer, so its writes never stall on this stream.
    pub fn abandon_reads(&self) {
        let mut inner = self.conn.inner.borrow_mut();
        let mut core = self.stream.core.borrow_mut();
        if !core.has_read_side() || core.discard_reads {
            return;
        }
        core.discard_reads = true;
        let buffered: usize = core.recv_buf.drain(..).map(|b| b.len()).sum();
        if let Some((id, increment)) = core.consumed(buffered) {
            inner.enqueue_control(Frame::WindowUpdate {
                stream_id: id,
                increment,
            });
        }
        self.stream.changed.notify_waiters();
    }

    /// Abruptly terminate the stream with application error `code`.
    ///
    /// The peer observes a RESET; pending local operations fail with
    /// `StreamAborted`. No-op once the stream completed or was already reset.
    pub fn reset(&self, code: u64) {
        let mut inner = self.conn.inner.borrow_mut();
        let mut core = self.stream.core.borrow_mut();
        if core.reset_code.is_some() || core.error.is_some() || core.released {
            return;
        }
        if inner.state == ConnectionState::Closed {
            core.reset_code = Some(code);
        } else {
            inner.send_reset(&self.stream, &mut core, code);
        }
        self.stream.changed.notify_waiters();
    }

    /// Release the stream. Idempotent.
    ///
    /// A stream that has not completed both sides is reset with the
    /// converter's disposed code. A stream whose writes finished and whose
    /// reads were abandoned is left to drain instead.
    pub fn dispose(&self) {
        let code = self
            .conn
            .inner
            .borrow()
            .error_codes
            .reset_code(ResetReason::Disposed);
        {
            let mut core = self.stream.core.borrow_mut();
            if core.disposed.is_some() {
                return;
            }
            core.disposed = Some(code);
            let draining = core.discard_reads && core.local_done();
            if core.released || draining || core.error.is_some() || core.reset_code.is_some() {
                self.stream.changed.notify_waiters();
                return;
            }
        }
        self.reset(code);
    }

    /// Assign an id, waiting for the peer's concurrency limit if needed.
    async fn start(&self, cancel: &CancellationToken) -> TransportResult<StreamId> {
        if let Some(id) = self.stream.core.borrow().id {
            return Ok(id);
        }
        let signals = self.conn.signals.clone();
        wait_for(&signals.changed, cancel, || {
            let mut inner = self.conn.inner.borrow_mut();
            let mut core = self.stream.core.borrow_mut();
            if let Some(id) = core.id {
                return Some(Ok(id));
            }
            if let Some(error) = core.write_error() {
                return Some(Err(error));
            }
            if inner.state != ConnectionState::Active {
                return Some(Err(inner.closed_error()));
            }
            inner.try_open_local(&self.stream, &mut core).map(Ok)
        })
        .await
    }

    fn queue(&self, id: StreamId, data: Bytes, fin: bool) -> TransportResult<()> {
        let mut inner = self.conn.inner.borrow_mut();
        if inner.state == ConnectionState::Closed {
            return Err(inner.closed_error());
        }
        let mut core = self.stream.core.borrow_mut();
        if let Some(error) = core.write_error() {
            return Err(error);
        }
        if fin {
            core.fin_queued = true;
        }
        inner.enqueue_data(
            &self.stream,
            &mut core,
            Frame::Stream {
                stream_id: id,
                fin,
                data,
            },
        );
        if fin {
            inner.maybe_release(&mut core);
        }
        Ok(())
    }

    fn reset_on_cancel<T>(&self, result: TransportResult<T>) -> TransportResult<T> {
        if let Err(TransportError::Cancelled) = result {
            let code = self
                .conn
                .inner
                .borrow()
                .error_codes
                .reset_code(ResetReason::Cancelled);
            self.reset(code);
        }
        result
    }
}

impl Drop for MultiplexedStream {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for MultiplexedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiplexedStream")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
