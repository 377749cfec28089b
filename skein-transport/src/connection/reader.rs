//! The demultiplexing reader loop.

use std::rc::Rc;
use std::time::Duration;

use bytes::BytesMut;
use skein_core::TimeProvider;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::shared::ConnectionShared;
use crate::frame::{Frame, STREAM_OVERHEAD};
use crate::{ConnectionState, TransportError, TransportResult};

const READ_CHUNK: usize = 16 * 1024;

/// Largest frame body accepted for the given max STREAM payload.
pub(crate) fn max_body(max_frame_size: u64) -> usize {
    usize::try_from(max_frame_size).unwrap_or(usize::MAX) + STREAM_OVERHEAD
}

/// Read frames until EOF, failure or shutdown.
///
/// Only appends to per-stream buffers and queues control answers; never waits
/// on a stream consumer.
pub(crate) async fn reader_task<R, T>(
    shared: Rc<ConnectionShared>,
    mut reader: R,
    mut buffer: BytesMut,
    time: T,
    idle_timeout: Option<Duration>,
) where
    R: AsyncRead + Unpin,
    T: TimeProvider,
{
    let shutdown = shared.shutdown.clone();
    let max_body = max_body(shared.inner.borrow().options.max_frame_size);

    loop {
        loop {
            let before = buffer.len();
            match Frame::decode(&mut buffer, max_body) {
                Ok(Some(frame)) => {
                    let size = before - buffer.len();
                    shared.inner.borrow_mut().metrics.record_received(size);
                    tracing::trace!(kind = frame.kind(), size, "frame received");
                    if let Err(error) = handle_frame(&shared, frame, time.now()) {
                        tracing::warn!(%error, "tearing down connection");
                        shared.abort(error);
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("frame decode error: {} - tearing down connection", e);
                    shared.abort(TransportError::ProtocolViolation(e.to_string()));
                    return;
                }
            }
        }

        buffer.reserve(READ_CHUNK);
        let read = async {
            match idle_timeout {
                Some(idle) => time.timeout(idle, reader.read_buf(&mut buffer)).await.ok(),
                None => Some(reader.read_buf(&mut buffer).await),
            }
        };
        let result = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = read => result,
        };

        match result {
            None => {
                tracing::debug!("no data within the idle timeout");
                shared.abort(TransportError::ConnectionIdle);
                return;
            }
            Some(Ok(0)) => {
                on_eof(&shared);
                return;
            }
            Some(Ok(n)) => {
                tracing::trace!("reader: received {} bytes, buffer now {} bytes", n, buffer.len());
            }
            Some(Err(e)) => {
                shared.abort(TransportError::ConnectionLost(e.to_string()));
                return;
            }
        }
    }
}

fn on_eof(shared: &ConnectionShared) {
    let mut inner = shared.inner.borrow_mut();
    if inner.state == ConnectionState::Closed {
        return;
    }
    match inner.close_received {
        Some(code) => {
            inner.read_eof = true;
            inner.fail_open_streams(TransportError::ConnectionClosedByPeer { code });
            inner.progress_close();
            drop(inner);
            shared.stop_if_closed();
        }
        None => {
            drop(inner);
            shared.abort(TransportError::ConnectionLost(
                "peer closed the connection without CLOSE".into(),
            ));
        }
    }
}

pub(crate) fn handle_frame(
    shared: &ConnectionShared,
    frame: Frame,
    now: Duration,
) -> TransportResult<()> {
    let mut inner = shared.inner.borrow_mut();
    match frame {
        Frame::Stream {
            stream_id,
            fin,
            data,
        } => {
            let Some(stream) = inner.open_remote(stream_id)? else {
                tracing::trace!(stream = %stream_id, "dropping data for released stream");
                return Ok(());
            };
            let mut core = stream.core.borrow_mut();
            if !core.has_read_side() {
                return Err(TransportError::ProtocolViolation(format!(
                    "STREAM frame on write-only stream {stream_id}"
                )));
            }
            if core.recv_fin {
                return Err(TransportError::ProtocolViolation(format!(
                    "data after FIN on stream {stream_id}"
                )));
            }
            core.recv_window
                .on_received(data.len() as u64)
                .map_err(|e| {
                    TransportError::ProtocolViolation(format!("stream {stream_id}: {e}"))
                })?;
            if fin {
                core.recv_fin = true;
            }
            if core.discard_reads {
                if let Some((id, increment)) = core.consumed(data.len()) {
                    inner.enqueue_control(Frame::WindowUpdate {
                        stream_id: id,
                        increment,
                    });
                }
            } else if !data.is_empty() {
                core.recv_buf.push_back(data);
            }
            stream.changed.notify_waiters();
            if fin {
                inner.maybe_release(&mut core);
            }
            Ok(())
        }
        Frame::WindowUpdate {
            stream_id,
            increment,
        } => {
            if let Some(stream) = inner.stream(stream_id) {
                stream.core.borrow_mut().send_credit.grant(increment);
                stream.changed.notify_waiters();
            }
            Ok(())
        }
        Frame::Reset { stream_id, code } => {
            if let Some(stream) = inner.reset_target(stream_id)? {
                let code = inner.error_codes.from_wire(code);
                tracing::debug!(stream = %stream_id, code, "stream reset by peer");
                let mut core = stream.core.borrow_mut();
                inner.on_remote_reset(&stream, &mut core, code);
            }
            Ok(())
        }
        Frame::Ping { payload } => {
            inner.enqueue_control(Frame::Pong { payload });
            Ok(())
        }
        Frame::Pong { payload } => {
            let sent = Duration::from_micros(payload);
            inner.metrics.last_rtt = Some(now.saturating_sub(sent));
            inner.metrics.pongs_received += 1;
            shared.signals.changed.notify_waiters();
            Ok(())
        }
        Frame::Settings(_) => Err(TransportError::ProtocolViolation(
            "SETTINGS received after connection establishment".into(),
        )),
        Frame::Close { code } => {
            let code = inner.error_codes.from_wire(code);
            inner.on_close_received(code)
        }
    }
}
