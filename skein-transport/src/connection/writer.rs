//! The single writer and the keep-alive monitor.

use std::rc::Rc;
use std::time::Duration;

use bytes::BytesMut;
use skein_core::TimeProvider;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::shared::{ConnectionShared, StreamShared};
use crate::frame::Frame;
use crate::{ConnectionState, TransportError};

/// Drain the control and data queues into the duplex connection.
///
/// All streams share this one path; control frames go ahead of stream data
/// and CLOSE follows the data queued before it. Once a graceful close drained
/// everything, the write half is shut down.
pub(crate) async fn writer_task<W>(shared: Rc<ConnectionShared>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    let signals = shared.signals.clone();
    let shutdown = shared.shutdown.clone();
    let mut batch = BytesMut::with_capacity(16 * 1024);
    let mut owners: Vec<Rc<StreamShared>> = Vec::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = signals.data_to_send.notified() => {}
        }

        loop {
            let (frames, shutdown_writes) = {
                let mut inner = shared.inner.borrow_mut();
                if inner.state == ConnectionState::Closed {
                    return;
                }
                let frames = inner.fill_batch(&mut batch, &mut owners);
                let shutdown_writes =
                    inner.shutdown_writes && !inner.writes_shut && inner.queues_empty();
                (frames, shutdown_writes)
            };

            if frames == 0 {
                if shutdown_writes {
                    shut_down_writes(&shared, &mut writer).await;
                    return;
                }
                break;
            }

            tracing::trace!("writer: sending {} frames, {} bytes", frames, batch.len());
            let result = tokio::select! {
                _ = shutdown.cancelled() => return,
                result = write_batch(&mut writer, &batch) => result,
            };
            match result {
                Ok(()) => {
                    shared.inner.borrow_mut().metrics.record_sent(frames, batch.len());
                    for owner in owners.drain(..) {
                        owner.on_frame_written();
                    }
                    batch.clear();
                }
                Err(e) => {
                    tracing::debug!("writer: write failed: {:?}", e);
                    shared.abort(TransportError::ConnectionLost(e.to_string()));
                    return;
                }
            }
        }
    }
}

async fn write_batch<W: AsyncWrite + Unpin>(writer: &mut W, batch: &[u8]) -> std::io::Result<()> {
    writer.write_all(batch).await?;
    writer.flush().await
}

async fn shut_down_writes<W: AsyncWrite + Unpin>(shared: &ConnectionShared, writer: &mut W) {
    if let Err(e) = writer.shutdown().await {
        tracing::debug!("writer: shutdown failed: {:?}", e);
    }
    tracing::debug!("writer: write half shut down");
    {
        let mut inner = shared.inner.borrow_mut();
        inner.writes_shut = true;
        inner.finish_if_closed();
    }
    shared.stop_if_closed();
}

/// Send a PING every `interval` so the peer's idle timer never fires.
pub(crate) async fn keep_alive_task<T: TimeProvider>(
    shared: Rc<ConnectionShared>,
    time: T,
    interval: Duration,
) {
    let shutdown = shared.shutdown.clone();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = time.sleep(interval) => {}
        }
        let mut inner = shared.inner.borrow_mut();
        if inner.state == ConnectionState::Closed {
            break;
        }
        inner.enqueue_control(Frame::Ping {
            payload: ping_payload(time.now()),
        });
    }
}

pub(crate) fn ping_payload(now: Duration) -> u64 {
    u64::try_from(now.as_micros()).unwrap_or(u64::MAX)
}
