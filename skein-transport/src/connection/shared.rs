//! State shared between a connection, its streams and its background tasks.
//!
//! Everything lives behind `RefCell`s on a single thread. No borrow is ever
//! held across an `.await`: callers borrow, mutate, notify and drop.
//! When both the connection state and a stream core are needed, the
//! connection is borrowed first.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use skein_core::{CancellationToken, Role};
use tokio::sync::Notify;

use crate::error_code::{ErrorCodeConverter, ResetReason};
use crate::flow::{ReceiveWindow, SendCredit};
use crate::frame::Frame;
use crate::stream_id::{StreamId, StreamIdAllocator};
use crate::{ConnectionMetrics, ConnectionOptions, ConnectionState, PeerSettings};
use crate::{TransportError, TransportResult};

/// Encoded bytes the writer gathers before handing them to the duplex connection.
const BATCH_LIMIT: usize = 64 * 1024;

pub(crate) struct Signals {
    /// Wakes the writer. Uses `notify_one` so a wake-up is never lost.
    pub(crate) data_to_send: Notify,
    /// Connection state, accept queue or stream slots changed.
    pub(crate) changed: Notify,
}

pub(crate) struct ConnectionShared {
    pub(crate) inner: RefCell<ConnectionInner>,
    pub(crate) signals: Rc<Signals>,
    /// Stops the reader, writer and keep-alive tasks.
    pub(crate) shutdown: CancellationToken,
}

impl ConnectionShared {
    pub(crate) fn new(
        role: Role,
        options: ConnectionOptions,
        error_codes: Rc<dyn ErrorCodeConverter>,
    ) -> Self {
        let signals = Rc::new(Signals {
            data_to_send: Notify::new(),
            changed: Notify::new(),
        });
        Self {
            inner: RefCell::new(ConnectionInner {
                role,
                options,
                state: ConnectionState::Connecting,
                remote: PeerSettings::default(),
                error_codes,
                signals: signals.clone(),
                streams: HashMap::new(),
                ids: StreamIdAllocator::new(role),
                next_remote: [0; 2],
                active_local: [0; 2],
                active_remote: [0; 2],
                accept_queue: VecDeque::new(),
                control_queue: VecDeque::new(),
                data_queue: VecDeque::new(),
                close_sent: false,
                closed_locally: false,
                close_received: None,
                shutdown_writes: false,
                writes_shut: false,
                read_eof: false,
                error: None,
                metrics: ConnectionMetrics::default(),
            }),
            signals,
            shutdown: CancellationToken::new(),
        }
    }

    /// Tear the connection down and fail everything pending with `error`.
    pub(crate) fn abort(&self, error: TransportError) {
        self.inner.borrow_mut().abort(error);
        self.shutdown.cancel();
    }

    /// Stop the background tasks once the connection reached `Closed`.
    pub(crate) fn stop_if_closed(&self) {
        if self.inner.borrow().state == ConnectionState::Closed {
            self.shutdown.cancel();
        }
    }
}

/// Re-run `poll` each time `notify` fires until it yields a result.
///
/// The waiter is registered before `poll` runs, so a `notify_waiters` issued
/// between the check and the await is not lost. Cancellation is only observed
/// when `poll` has nothing to return.
pub(crate) async fn wait_for<T>(
    notify: &Notify,
    cancel: &CancellationToken,
    mut poll: impl FnMut() -> Option<TransportResult<T>>,
) -> TransportResult<T> {
    loop {
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if let Some(result) = poll() {
            return result;
        }
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        tokio::select! {
            _ = &mut notified => {}
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
        }
    }
}

/// A frame waiting for the writer in stream data order, with the stream that
/// queued it. CLOSE frames travel here without an owner.
pub(crate) struct QueuedFrame {
    frame: Frame,
    owner: Option<Rc<StreamShared>>,
}

pub(crate) struct ConnectionInner {
    pub(crate) role: Role,
    pub(crate) options: ConnectionOptions,
    pub(crate) state: ConnectionState,
    pub(crate) remote: PeerSettings,
    pub(crate) error_codes: Rc<dyn ErrorCodeConverter>,
    signals: Rc<Signals>,
    streams: HashMap<StreamId, Rc<StreamShared>>,
    ids: StreamIdAllocator,
    /// Next peer sequence expected per direction.
    next_remote: [u64; 2],
    active_local: [u64; 2],
    active_remote: [u64; 2],
    pub(crate) accept_queue: VecDeque<Rc<StreamShared>>,
    control_queue: VecDeque<Frame>,
    data_queue: VecDeque<QueuedFrame>,
    close_sent: bool,
    closed_locally: bool,
    pub(crate) close_received: Option<u64>,
    pub(crate) shutdown_writes: bool,
    pub(crate) writes_shut: bool,
    pub(crate) read_eof: bool,
    pub(crate) error: Option<TransportError>,
    pub(crate) metrics: ConnectionMetrics,
}

impl ConnectionInner {
    /// Error reported to operations attempted on a closing or closed connection.
    pub(crate) fn closed_error(&self) -> TransportError {
        if let Some(error) = &self.error {
            return error.clone();
        }
        match self.close_received {
            Some(code) if !self.closed_locally => TransportError::ConnectionClosedByPeer { code },
            _ => TransportError::ConnectionClosedLocally,
        }
    }

    pub(crate) fn enqueue_control(&mut self, frame: Frame) {
        if self.state == ConnectionState::Closed || self.shutdown_writes {
            return;
        }
        tracing::trace!(kind = frame.kind(), "queued control frame");
        self.control_queue.push_back(frame);
        self.signals.data_to_send.notify_one();
    }

    pub(crate) fn enqueue_data(
        &mut self,
        owner: &Rc<StreamShared>,
        core: &mut StreamCore,
        frame: Frame,
    ) {
        core.pending_frames += 1;
        self.data_queue.push_back(QueuedFrame {
            frame,
            owner: Some(owner.clone()),
        });
        self.signals.data_to_send.notify_one();
    }

    /// Queue CLOSE behind the data already queued, so the peer sees every
    /// stream this side started before it sees the CLOSE.
    fn enqueue_close(&mut self, code: u64) {
        if self.state == ConnectionState::Closed || self.shutdown_writes {
            return;
        }
        let wire = self.error_codes.to_wire(code);
        self.data_queue.push_back(QueuedFrame {
            frame: Frame::Close { code: wire },
            owner: None,
        });
        self.close_sent = true;
        self.signals.data_to_send.notify_one();
    }

    /// Move queued frames into `batch`. Control frames go first, except CLOSE
    /// which keeps its place among the data frames.
    pub(crate) fn fill_batch(
        &mut self,
        batch: &mut BytesMut,
        owners: &mut Vec<Rc<StreamShared>>,
    ) -> u64 {
        let mut frames = 0;
        while batch.len() < BATCH_LIMIT {
            if let Some(frame) = self.control_queue.pop_front() {
                frame.encode(batch);
            } else if let Some(queued) = self.data_queue.pop_front() {
                queued.frame.encode(batch);
                owners.extend(queued.owner);
            } else {
                break;
            }
            frames += 1;
        }
        frames
    }

    pub(crate) fn queues_empty(&self) -> bool {
        self.control_queue.is_empty() && self.data_queue.is_empty()
    }

    pub(crate) fn stream(&self, id: StreamId) -> Option<Rc<StreamShared>> {
        self.streams.get(&id).cloned()
    }

    pub(crate) fn new_stream_core(&self, bidirectional: bool, remote: bool) -> StreamCore {
        StreamCore::new(bidirectional, remote, &self.options, &self.remote)
    }

    /// Give `stream` the next local id if the peer's concurrency limit allows it.
    pub(crate) fn try_open_local(
        &mut self,
        stream: &Rc<StreamShared>,
        core: &mut StreamCore,
    ) -> Option<StreamId> {
        let class = crate::stream_id::direction_index(core.bidirectional);
        if self.active_local[class] >= self.remote.max_streams(core.bidirectional) {
            return None;
        }
        let id = self.ids.next(core.bidirectional);
        core.id = Some(id);
        self.active_local[class] += 1;
        self.metrics.streams_opened += 1;
        self.streams.insert(id, stream.clone());
        tracing::debug!(stream = %id, role = ?self.role, "stream started");
        Some(id)
    }

    /// Resolve a STREAM frame's id to a stream, surfacing new peer streams.
    ///
    /// Returns `Ok(None)` for frames that should be dropped: streams that were
    /// already released and streams refused during graceful close.
    pub(crate) fn open_remote(&mut self, id: StreamId) -> TransportResult<Option<Rc<StreamShared>>> {
        if let Some(stream) = self.stream(id) {
            return Ok(Some(stream));
        }
        if id.initiator() == self.role {
            if self.ids.was_allocated(id) {
                return Ok(None);
            }
            return Err(TransportError::ProtocolViolation(format!(
                "frame for local stream {id} which was never opened"
            )));
        }

        let class = id.class();
        if id.sequence() < self.next_remote[class] {
            return Ok(None);
        }
        // lower sequences the peer reset before sending anything are skipped
        self.next_remote[class] = id.sequence() + 1;

        if self.state != ConnectionState::Active {
            let code = self.error_codes.reset_code(ResetReason::Refused);
            tracing::debug!(stream = %id, "refusing stream opened during close");
            let wire = self.error_codes.to_wire(code);
            self.enqueue_control(Frame::Reset {
                stream_id: id,
                code: wire,
            });
            return Ok(None);
        }

        let bidirectional = id.is_bidirectional();
        let limit = if bidirectional {
            self.options.max_bidirectional_streams
        } else {
            self.options.max_unidirectional_streams
        };
        if self.active_remote[class] >= limit {
            return Err(TransportError::ProtocolViolation(format!(
                "peer opened stream {id} beyond the limit of {limit} concurrent streams"
            )));
        }

        let mut core = self.new_stream_core(bidirectional, true);
        core.id = Some(id);
        let stream = Rc::new(StreamShared::new(core));
        self.streams.insert(id, stream.clone());
        self.active_remote[class] += 1;
        self.metrics.streams_accepted += 1;
        self.accept_queue.push_back(stream.clone());
        self.signals.changed.notify_waiters();
        tracing::debug!(stream = %id, role = ?self.role, "peer stream surfaced");
        Ok(Some(stream))
    }

    /// Resolve a RESET frame's id to a stream.
    ///
    /// A peer stream reset before any of its data was sent surfaces here,
    /// already reset, so the application still observes it.
    pub(crate) fn reset_target(&mut self, id: StreamId) -> TransportResult<Option<Rc<StreamShared>>> {
        if let Some(stream) = self.stream(id) {
            return Ok(Some(stream));
        }
        if id.initiator() == self.role || id.sequence() < self.next_remote[id.class()] {
            return Ok(None);
        }
        if self.state != ConnectionState::Active {
            // nothing to refuse: the peer already gave the stream up
            self.next_remote[id.class()] = id.sequence() + 1;
            return Ok(None);
        }
        self.open_remote(id)
    }

    /// Drop the stream from the table once both sides are complete on the wire.
    pub(crate) fn maybe_release(&mut self, core: &mut StreamCore) {
        if core.released {
            return;
        }
        let Some(id) = core.id else {
            return;
        };
        if !(core.local_done() && core.remote_done()) {
            return;
        }
        core.released = true;
        self.streams.remove(&id);
        let counters = if core.remote {
            &mut self.active_remote
        } else {
            &mut self.active_local
        };
        counters[id.class()] = counters[id.class()].saturating_sub(1);
        tracing::trace!(stream = %id, "stream released");
        self.signals.changed.notify_waiters();
        self.progress_close();
    }

    /// Remove frames `owner` queued but the writer has not picked up yet.
    fn purge_data(&mut self, owner: &Rc<StreamShared>, core: &mut StreamCore) {
        let before = self.data_queue.len();
        self.data_queue
            .retain(|q| !q.owner.as_ref().is_some_and(|o| Rc::ptr_eq(o, owner)));
        core.pending_frames = core.pending_frames.saturating_sub(before - self.data_queue.len());
    }

    /// Reset a started stream from this side.
    pub(crate) fn send_reset(&mut self, owner: &Rc<StreamShared>, core: &mut StreamCore, code: u64) {
        core.reset_code.get_or_insert(code);
        let Some(id) = core.id else {
            return;
        };
        if core.released {
            return;
        }
        let wire = self.error_codes.to_wire(code);
        self.enqueue_control(Frame::Reset {
            stream_id: id,
            code: wire,
        });
        self.purge_data(owner, core);
        self.metrics.streams_reset += 1;
        tracing::debug!(stream = %id, code, "stream reset locally");
        owner.changed.notify_waiters();
        self.maybe_release(core);
    }

    /// Apply a RESET received from the peer.
    pub(crate) fn on_remote_reset(&mut self, owner: &Rc<StreamShared>, core: &mut StreamCore, code: u64) {
        core.reset_code.get_or_insert(code);
        self.purge_data(owner, core);
        self.metrics.streams_reset += 1;
        owner.changed.notify_waiters();
        self.maybe_release(core);
    }

    /// Refuse peer streams that were surfaced but never accepted.
    fn refuse_pending_accepts(&mut self) {
        let pending: Vec<_> = self.accept_queue.drain(..).collect();
        let code = self.error_codes.reset_code(ResetReason::Refused);
        for stream in pending {
            let mut core = stream.core.borrow_mut();
            self.send_reset(&stream, &mut core, code);
        }
    }

    /// Start a graceful close initiated by this side.
    pub(crate) fn begin_close(&mut self, code: u64) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if self.close_received.is_none() {
            self.closed_locally = true;
        }
        if !self.close_sent {
            self.enqueue_close(code);
        }
        self.state = ConnectionState::Closing;
        tracing::debug!(role = ?self.role, code, "graceful close started");
        self.refuse_pending_accepts();
        self.signals.changed.notify_waiters();
        self.progress_close();
    }

    /// Apply a CLOSE received from the peer.
    pub(crate) fn on_close_received(&mut self, code: u64) -> TransportResult<()> {
        if self.close_received.is_some() {
            return Err(TransportError::ProtocolViolation("duplicate CLOSE".into()));
        }
        self.close_received = Some(code);
        if self.state == ConnectionState::Active {
            self.state = ConnectionState::Closing;
        }
        // streams the peer started before its CLOSE stay acceptable
        tracing::debug!(role = ?self.role, code, "peer started graceful close");
        self.signals.changed.notify_waiters();
        self.progress_close();
        Ok(())
    }

    /// Advance a graceful close once the stream table drained.
    pub(crate) fn progress_close(&mut self) {
        if self.state != ConnectionState::Closing || !self.streams.is_empty() {
            return;
        }
        if self.close_received.is_some() && !self.close_sent {
            self.enqueue_close(0);
        }
        if self.close_sent && self.close_received.is_some() && !self.shutdown_writes {
            self.shutdown_writes = true;
            self.signals.data_to_send.notify_one();
        }
        self.finish_if_closed();
    }

    /// Both directions finished: the connection is `Closed`.
    pub(crate) fn finish_if_closed(&mut self) {
        if self.state == ConnectionState::Closing && self.writes_shut && self.read_eof {
            self.state = ConnectionState::Closed;
            tracing::debug!(role = ?self.role, "connection closed gracefully");
            self.signals.changed.notify_waiters();
        }
    }

    /// Fail streams that can no longer complete after the peer hung up.
    pub(crate) fn fail_open_streams(&mut self, error: TransportError) {
        self.accept_queue.clear();
        for (_, stream) in self.streams.drain() {
            let mut core = stream.core.borrow_mut();
            core.error.get_or_insert_with(|| error.clone());
            core.released = true;
            stream.changed.notify_waiters();
        }
        self.active_local = [0; 2];
        self.active_remote = [0; 2];
        self.signals.changed.notify_waiters();
    }

    pub(crate) fn abort(&mut self, error: TransportError) {
        if self.state == ConnectionState::Closed {
            return;
        }
        tracing::debug!(role = ?self.role, %error, "connection aborted");
        self.state = ConnectionState::Closed;
        self.error = Some(error.clone());
        self.fail_open_streams(error.clone());
        self.control_queue.clear();
        for owner in self.data_queue.drain(..).filter_map(|queued| queued.owner) {
            let mut core = owner.core.borrow_mut();
            core.pending_frames = 0;
            core.error.get_or_insert_with(|| error.clone());
            owner.changed.notify_waiters();
        }
        self.signals.data_to_send.notify_one();
    }
}

/// Per-stream state, shared by the stream handle and the connection.
pub(crate) struct StreamShared {
    pub(crate) core: RefCell<StreamCore>,
    /// Data, credit, completion or termination changed.
    pub(crate) changed: Notify,
}

impl StreamShared {
    pub(crate) fn new(core: StreamCore) -> Self {
        Self {
            core: RefCell::new(core),
            changed: Notify::new(),
        }
    }

    pub(crate) fn on_frame_written(&self) {
        let mut core = self.core.borrow_mut();
        core.pending_frames = core.pending_frames.saturating_sub(1);
        if core.pending_frames == 0 {
            self.changed.notify_waiters();
        }
    }
}

pub(crate) struct StreamCore {
    pub(crate) id: Option<StreamId>,
    pub(crate) bidirectional: bool,
    pub(crate) remote: bool,

    pub(crate) recv_buf: VecDeque<Bytes>,
    pub(crate) recv_window: ReceiveWindow,
    pub(crate) recv_fin: bool,
    pub(crate) discard_reads: bool,

    pub(crate) send_credit: SendCredit,
    pub(crate) fin_queued: bool,
    pub(crate) pending_frames: usize,

    pub(crate) reset_code: Option<u64>,
    pub(crate) disposed: Option<u64>,
    pub(crate) error: Option<TransportError>,
    pub(crate) released: bool,
}

impl StreamCore {
    fn new(
        bidirectional: bool,
        remote: bool,
        options: &ConnectionOptions,
        peer: &PeerSettings,
    ) -> Self {
        Self {
            id: None,
            bidirectional,
            remote,
            recv_buf: VecDeque::new(),
            recv_window: ReceiveWindow::new(
                options.initial_stream_window,
                options.window_update_threshold_percent,
            ),
            recv_fin: false,
            discard_reads: false,
            send_credit: SendCredit::new(peer.initial_stream_window),
            fin_queued: false,
            pending_frames: 0,
            reset_code: None,
            disposed: None,
            error: None,
            released: false,
        }
    }

    pub(crate) fn has_read_side(&self) -> bool {
        self.bidirectional || self.remote
    }

    pub(crate) fn has_write_side(&self) -> bool {
        self.bidirectional || !self.remote
    }

    /// Nothing more will be sent by this side.
    pub(crate) fn local_done(&self) -> bool {
        !self.has_write_side() || self.fin_queued || self.reset_code.is_some()
    }

    /// Nothing more will be received from the peer.
    pub(crate) fn remote_done(&self) -> bool {
        !self.has_read_side() || self.recv_fin || self.reset_code.is_some()
    }

    fn termination(&self) -> Option<TransportError> {
        if let Some(code) = self.disposed {
            return Some(TransportError::StreamAborted {
                code: self.reset_code.unwrap_or(code),
            });
        }
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        self.reset_code
            .map(|code| TransportError::StreamAborted { code })
    }

    pub(crate) fn read_error(&self) -> Option<TransportError> {
        if !self.has_read_side() {
            return Some(TransportError::InvalidState(
                "stream has no read side".into(),
            ));
        }
        if let Some(error) = self.termination() {
            return Some(error);
        }
        self.discard_reads
            .then(|| TransportError::InvalidState("reads were abandoned".into()))
    }

    pub(crate) fn write_error(&self) -> Option<TransportError> {
        if !self.has_write_side() {
            return Some(TransportError::InvalidState(
                "stream has no write side".into(),
            ));
        }
        if let Some(error) = self.termination() {
            return Some(error);
        }
        self.fin_queued.then_some(TransportError::WritesClosed)
    }

    /// Take up to `max` buffered bytes.
    pub(crate) fn pop_chunk(&mut self, max: usize) -> Option<Bytes> {
        let front = self.recv_buf.front_mut()?;
        if front.len() <= max {
            return self.recv_buf.pop_front();
        }
        Some(front.split_to(max))
    }

    /// Credit to return after handing `len` bytes to the reader.
    pub(crate) fn consumed(&mut self, len: usize) -> Option<(StreamId, u64)> {
        if self.recv_fin || self.released {
            return None;
        }
        let id = self.id?;
        self.recv_window
            .on_consumed(len as u64)
            .map(|increment| (id, increment))
    }
}
