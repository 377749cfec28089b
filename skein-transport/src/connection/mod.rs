//! Multiplexed connection: handshake, stream table, reader and writer tasks.

mod reader;
pub(crate) mod shared;
mod writer;

use std::cell::RefCell;
use std::rc::Rc;

use bytes::BytesMut;
use skein_core::{
    CancellationToken, DuplexConnection, HandshakeError, PlainChannel, Providers, Role,
    SecureChannel, TaskProvider, TimeProvider,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

use self::shared::{wait_for, ConnectionShared, StreamShared};
use crate::error_code::{DefaultErrorCodes, ErrorCodeConverter};
use crate::frame::Frame;
use crate::{
    ConnectionMetrics, ConnectionOptions, MultiplexedStream, PeerSettings, TransportError,
    TransportResult,
};

/// Lifecycle of a [`MultiplexedConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake and settings exchange not finished.
    Connecting,
    /// Streams may be created and accepted.
    Active,
    /// Graceful close in progress: open streams finish, no new ones start.
    Closing,
    /// Terminal.
    Closed,
}

/// Many independent, flow-controlled streams over one duplex connection.
///
/// Created over an established [`DuplexConnection`], then [`connect`](Self::connect)ed.
/// One reader task demultiplexes inbound frames into per-stream buffers and
/// one writer task serializes every outbound frame. All methods take `&self`
/// so the connection can be shared through an `Rc`.
///
/// Dropping the connection disposes it.
pub struct MultiplexedConnection<P: Providers> {
    providers: P,
    shared: Rc<ConnectionShared>,
    duplex: RefCell<Option<Box<dyn DuplexConnection>>>,
    security: Rc<dyn SecureChannel>,
    tasks: RefCell<Vec<JoinHandle<()>>>,
}

impl<P: Providers> MultiplexedConnection<P> {
    /// Wrap `duplex` without touching it yet.
    pub fn new(
        providers: P,
        duplex: impl DuplexConnection,
        role: Role,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            providers,
            shared: Rc::new(ConnectionShared::new(
                role,
                options,
                Rc::new(DefaultErrorCodes),
            )),
            duplex: RefCell::new(Some(Box::new(duplex))),
            security: Rc::new(PlainChannel),
            tasks: RefCell::new(Vec::new()),
        }
    }

    /// Run `security` before the settings exchange.
    pub fn with_security(mut self, security: impl SecureChannel + 'static) -> Self {
        self.security = Rc::new(security);
        self
    }

    /// Translate error codes with `converter` instead of [`DefaultErrorCodes`].
    pub fn with_error_codes(self, converter: impl ErrorCodeConverter + 'static) -> Self {
        self.shared.inner.borrow_mut().error_codes = Rc::new(converter);
        self
    }

    /// Which end of the connection this is.
    pub fn role(&self) -> Role {
        self.shared.inner.borrow().role
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.borrow().state
    }

    /// Counters for this connection.
    pub fn metrics(&self) -> ConnectionMetrics {
        self.shared.inner.borrow().metrics.clone()
    }

    /// Settings announced by the peer, once connected.
    pub fn peer_settings(&self) -> Option<PeerSettings> {
        let inner = self.shared.inner.borrow();
        (inner.state != ConnectionState::Connecting).then(|| inner.remote.clone())
    }

    /// The error-code converter in use.
    pub fn error_codes(&self) -> Rc<dyn ErrorCodeConverter> {
        self.shared.inner.borrow().error_codes.clone()
    }

    /// Run the secure handshake and exchange SETTINGS.
    ///
    /// On failure the duplex connection is dropped so a peer blocked in its
    /// own `connect` fails promptly too.
    ///
    /// # Errors
    ///
    /// - `AuthenticationFailed` when either side rejected the other's identity
    /// - `ConnectFailed` for any other handshake or settings failure, including timeout
    /// - `Cancelled` when `cancel` fires first
    pub async fn connect(&self, cancel: &CancellationToken) -> TransportResult<PeerSettings> {
        let duplex = {
            let inner = self.shared.inner.borrow();
            if inner.state != ConnectionState::Connecting {
                return Err(TransportError::InvalidState(
                    "connect was already called".into(),
                ));
            }
            self.duplex.borrow_mut().take().ok_or_else(|| {
                TransportError::InvalidState("connect is already in progress".into())
            })?
        };
        let (role, options) = {
            let inner = self.shared.inner.borrow();
            (inner.role, inner.options.clone())
        };
        let local = options.local_settings();
        let max_body = reader::max_body(options.max_frame_size);
        let security = self.security.clone();

        let establish = async move {
            let connection = security.handshake(role, duplex).await.map_err(|e| match e {
                HandshakeError::Authentication(message) => {
                    TransportError::AuthenticationFailed(message)
                }
                other => TransportError::ConnectFailed(other.to_string()),
            })?;
            let (mut read_half, mut write_half) = tokio::io::split(connection);

            let mut out = BytesMut::new();
            Frame::Settings(local).encode(&mut out);
            write_half.write_all(&out).await.map_err(connect_io)?;
            write_half.flush().await.map_err(connect_io)?;

            let mut buffer = BytesMut::with_capacity(16 * 1024);
            let remote = loop {
                match Frame::decode(&mut buffer, max_body)
                    .map_err(|e| TransportError::ConnectFailed(e.to_string()))?
                {
                    Some(Frame::Settings(settings)) => break settings,
                    Some(other) => {
                        return Err(TransportError::ConnectFailed(format!(
                            "expected SETTINGS, received {}",
                            other.kind()
                        )))
                    }
                    None => {
                        if read_half.read_buf(&mut buffer).await.map_err(connect_io)? == 0 {
                            return Err(TransportError::ConnectFailed(
                                "connection closed during settings exchange".into(),
                            ));
                        }
                    }
                }
            };
            Ok::<_, TransportError>((read_half, write_half, buffer, remote))
        };

        let shutdown = self.shared.shutdown.clone();
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            _ = shutdown.cancelled() => Err(TransportError::ConnectionClosedLocally),
            result = self.providers.time().timeout(options.connect_timeout, establish) => {
                result.unwrap_or_else(|_| Err(TransportError::ConnectFailed("connect timed out".into())))
            }
        };

        let (read_half, write_half, buffer, remote) = match result {
            Ok(parts) => parts,
            Err(error) => {
                tracing::debug!(?role, %error, "connect failed");
                self.shared.abort(error.clone());
                return Err(error);
            }
        };

        let idle_timeout = {
            let mut inner = self.shared.inner.borrow_mut();
            if inner.state != ConnectionState::Connecting {
                // disposed while the handshake was running
                return Err(inner.closed_error());
            }
            inner.remote = remote.clone();
            inner.state = ConnectionState::Active;
            inner.options.local_settings().negotiated_idle_timeout(&remote)
        };
        tracing::debug!(?role, ?idle_timeout, "connection established");

        let task = self.providers.task();
        let time = self.providers.time().clone();
        let mut tasks = self.tasks.borrow_mut();
        tasks.push(task.spawn_task(
            "skein_reader",
            reader::reader_task(
                self.shared.clone(),
                read_half,
                buffer,
                time.clone(),
                idle_timeout,
            ),
        ));
        tasks.push(task.spawn_task(
            "skein_writer",
            writer::writer_task(self.shared.clone(), write_half),
        ));
        if let (true, Some(idle)) = (options.keep_alive, idle_timeout) {
            tasks.push(task.spawn_task(
                "skein_keep_alive",
                writer::keep_alive_task(self.shared.clone(), time, idle / 2),
            ));
        }
        Ok(remote)
    }

    /// Create a local stream. Nothing is sent before its first write.
    ///
    /// # Errors
    ///
    /// Fails once the connection is closing or closed.
    pub fn create_stream(&self, bidirectional: bool) -> TransportResult<MultiplexedStream> {
        let inner = self.shared.inner.borrow();
        match inner.state {
            ConnectionState::Active => {}
            ConnectionState::Connecting => {
                return Err(TransportError::InvalidState(
                    "connection is not established".into(),
                ))
            }
            ConnectionState::Closing | ConnectionState::Closed => {
                return Err(inner.closed_error())
            }
        }
        let core = inner.new_stream_core(bidirectional, false);
        Ok(MultiplexedStream::new(
            Rc::new(StreamShared::new(core)),
            self.shared.clone(),
        ))
    }

    /// Wait for the next stream opened by the peer.
    ///
    /// Streams the peer started before its CLOSE are still returned.
    ///
    /// # Errors
    ///
    /// Fails once the connection is closing or closed and no started stream
    /// is waiting, or with `Cancelled`.
    pub async fn accept_stream(
        &self,
        cancel: &CancellationToken,
    ) -> TransportResult<MultiplexedStream> {
        let signals = self.shared.signals.clone();
        let stream = wait_for(&signals.changed, cancel, || {
            let mut inner = self.shared.inner.borrow_mut();
            if let Some(stream) = inner.accept_queue.pop_front() {
                return Some(Ok(stream));
            }
            match inner.state {
                ConnectionState::Active => None,
                ConnectionState::Connecting => Some(Err(TransportError::InvalidState(
                    "connection is not established".into(),
                ))),
                ConnectionState::Closing | ConnectionState::Closed => {
                    Some(Err(inner.closed_error()))
                }
            }
        })
        .await?;
        Ok(MultiplexedStream::new(stream, self.shared.clone()))
    }

    /// Send a PING and wait for its PONG, returning the round-trip time.
    pub async fn ping(&self, cancel: &CancellationToken) -> TransportResult<std::time::Duration> {
        let before = {
            let mut inner = self.shared.inner.borrow_mut();
            if inner.state == ConnectionState::Closed || inner.state == ConnectionState::Connecting
            {
                return Err(inner.closed_error());
            }
            let payload = writer::ping_payload(self.providers.time().now());
            inner.enqueue_control(Frame::Ping { payload });
            inner.metrics.pongs_received
        };
        let signals = self.shared.signals.clone();
        wait_for(&signals.changed, cancel, || {
            let inner = self.shared.inner.borrow();
            if inner.metrics.pongs_received > before {
                return Some(Ok(inner.metrics.last_rtt.unwrap_or_default()));
            }
            (inner.state == ConnectionState::Closed).then(|| Err(inner.closed_error()))
        })
        .await
    }

    /// Close gracefully with application error `code`.
    ///
    /// Sends CLOSE, refuses new peer streams, lets open streams finish and
    /// returns once both sides shut down their writes.
    ///
    /// # Errors
    ///
    /// Returns the abort error if the connection failed before closing
    /// completed, or `Cancelled`. Cancelling leaves the connection closing; call
    /// [`dispose`](Self::dispose) to stop it.
    pub async fn close(&self, code: u64, cancel: &CancellationToken) -> TransportResult<()> {
        {
            let mut inner = self.shared.inner.borrow_mut();
            if inner.state == ConnectionState::Connecting {
                return Err(TransportError::InvalidState(
                    "connection is not established".into(),
                ));
            }
            inner.begin_close(code);
        }
        self.shared.stop_if_closed();
        self.closed_with(cancel).await
    }

    /// Wait until the connection reaches `Closed`.
    ///
    /// Returns `Ok(())` for a graceful close and the abort error otherwise.
    pub async fn closed(&self) -> TransportResult<()> {
        self.closed_with(&CancellationToken::new()).await
    }

    async fn closed_with(&self, cancel: &CancellationToken) -> TransportResult<()> {
        let signals = self.shared.signals.clone();
        wait_for(&signals.changed, cancel, || {
            let inner = self.shared.inner.borrow();
            (inner.state == ConnectionState::Closed).then(|| match &inner.error {
                None => Ok(()),
                Some(error) => Err(error.clone()),
            })
        })
        .await
    }

    /// Abort the connection. Every pending operation fails with
    /// `ConnectionClosedLocally`. Idempotent.
    pub fn dispose(&self) {
        self.duplex.borrow_mut().take();
        self.shared.abort(TransportError::ConnectionClosedLocally);
    }
}

impl<P: Providers> Drop for MultiplexedConnection<P> {
    fn drop(&mut self) {
        self.dispose();
        for task in self.tasks.borrow_mut().drain(..) {
            task.abort();
        }
    }
}

fn connect_io(e: std::io::Error) -> TransportError {
    TransportError::ConnectFailed(e.to_string())
}
