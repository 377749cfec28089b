//! Connection options and the SETTINGS exchanged at connect time.

use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};

use crate::frame::FrameError;

/// Smallest max frame size a peer may announce.
pub const MIN_FRAME_SIZE: u64 = 1024;

/// Largest stream window a peer may announce.
pub const MAX_STREAM_WINDOW: u64 = 1 << 31;

const KEY_INITIAL_STREAM_WINDOW: u16 = 0;
const KEY_MAX_BIDIRECTIONAL_STREAMS: u16 = 1;
const KEY_MAX_UNIDIRECTIONAL_STREAMS: u16 = 2;
const KEY_IDLE_TIMEOUT_MS: u16 = 3;
const KEY_MAX_FRAME_SIZE: u16 = 4;
const PAIR_SIZE: usize = 10;

/// Local configuration of a multiplexed connection.
#[derive(Clone, Debug)]
pub struct ConnectionOptions {
    /// Receive window granted to the peer for each new stream.
    pub initial_stream_window: u64,

    /// Bidirectional streams the peer may have open at once.
    pub max_bidirectional_streams: u64,

    /// Unidirectional streams the peer may have open at once.
    pub max_unidirectional_streams: u64,

    /// Abort the connection when nothing is received for this long.
    ///
    /// The effective value is the smaller of both peers' timeouts.
    pub idle_timeout: Option<Duration>,

    /// Send PING frames at half the idle timeout to keep the connection alive.
    pub keep_alive: bool,

    /// Largest STREAM payload the peer may send in one frame.
    pub max_frame_size: u64,

    /// Return credit to the peer once this percentage of the window was consumed.
    pub window_update_threshold_percent: u8,

    /// Upper bound for the secure handshake plus settings exchange.
    pub connect_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            initial_stream_window: 64 * 1024,
            max_bidirectional_streams: 100,
            max_unidirectional_streams: 100,
            idle_timeout: Some(Duration::from_secs(60)),
            keep_alive: false,
            max_frame_size: 32 * 1024,
            window_update_threshold_percent: 50,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectionOptions {
    /// Set the per-stream receive window.
    pub fn with_initial_stream_window(mut self, window: u64) -> Self {
        self.initial_stream_window = window.clamp(1, MAX_STREAM_WINDOW);
        self
    }

    /// Set the concurrent stream limits granted to the peer.
    pub fn with_max_streams(mut self, bidirectional: u64, unidirectional: u64) -> Self {
        self.max_bidirectional_streams = bidirectional;
        self.max_unidirectional_streams = unidirectional;
        self
    }

    /// Set the idle timeout, `None` to disable it.
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Enable or disable keep-alive pings.
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the largest STREAM payload accepted from the peer.
    pub fn with_max_frame_size(mut self, max_frame_size: u64) -> Self {
        self.max_frame_size = max_frame_size.max(MIN_FRAME_SIZE);
        self
    }

    /// Set the credit replenishment threshold, as a percentage of the window.
    pub fn with_window_update_threshold(mut self, percent: u8) -> Self {
        self.window_update_threshold_percent = percent.clamp(1, 100);
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The SETTINGS this side announces.
    pub fn local_settings(&self) -> PeerSettings {
        PeerSettings {
            initial_stream_window: self.initial_stream_window,
            max_bidirectional_streams: self.max_bidirectional_streams,
            max_unidirectional_streams: self.max_unidirectional_streams,
            idle_timeout: self.idle_timeout,
            max_frame_size: self.max_frame_size,
        }
    }
}

/// Parameters announced by one side in its SETTINGS frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerSettings {
    /// Initial send credit for each stream towards this peer.
    pub initial_stream_window: u64,
    /// Bidirectional streams this peer accepts concurrently.
    pub max_bidirectional_streams: u64,
    /// Unidirectional streams this peer accepts concurrently.
    pub max_unidirectional_streams: u64,
    /// This peer's idle timeout.
    pub idle_timeout: Option<Duration>,
    /// Largest STREAM payload this peer accepts.
    pub max_frame_size: u64,
}

impl Default for PeerSettings {
    fn default() -> Self {
        ConnectionOptions::default().local_settings()
    }
}

impl PeerSettings {
    /// Concurrent stream limit for the given direction.
    pub fn max_streams(&self, bidirectional: bool) -> u64 {
        if bidirectional {
            self.max_bidirectional_streams
        } else {
            self.max_unidirectional_streams
        }
    }

    /// Idle timeout both sides agree on: the smaller of the two announced values.
    pub fn negotiated_idle_timeout(&self, other: &PeerSettings) -> Option<Duration> {
        match (self.idle_timeout, other.idle_timeout) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub(crate) fn encoded_len(&self) -> usize {
        5 * PAIR_SIZE
    }

    pub(crate) fn encode_body(&self, dst: &mut BytesMut) {
        let idle_ms = self
            .idle_timeout
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        for (key, value) in [
            (KEY_INITIAL_STREAM_WINDOW, self.initial_stream_window),
            (KEY_MAX_BIDIRECTIONAL_STREAMS, self.max_bidirectional_streams),
            (KEY_MAX_UNIDIRECTIONAL_STREAMS, self.max_unidirectional_streams),
            (KEY_IDLE_TIMEOUT_MS, idle_ms),
            (KEY_MAX_FRAME_SIZE, self.max_frame_size),
        ] {
            dst.put_u16_le(key);
            dst.put_u64_le(value);
        }
    }

    /// Parse a SETTINGS body. Unknown keys are skipped, missing keys keep their defaults.
    pub(crate) fn decode_body(mut body: &[u8]) -> Result<Self, FrameError> {
        if body.len() % PAIR_SIZE != 0 {
            return Err(FrameError::Malformed(format!(
                "settings body of {} bytes is not a sequence of pairs",
                body.len()
            )));
        }
        let mut settings = PeerSettings::default();
        while body.has_remaining() {
            let key = body.get_u16_le();
            let value = body.get_u64_le();
            match key {
                KEY_INITIAL_STREAM_WINDOW => settings.initial_stream_window = value,
                KEY_MAX_BIDIRECTIONAL_STREAMS => settings.max_bidirectional_streams = value,
                KEY_MAX_UNIDIRECTIONAL_STREAMS => settings.max_unidirectional_streams = value,
                KEY_IDLE_TIMEOUT_MS => {
                    settings.idle_timeout = (value > 0).then(|| Duration::from_millis(value))
                }
                KEY_MAX_FRAME_SIZE => settings.max_frame_size = value,
                _ => tracing::debug!(key, value, "ignoring unknown setting"),
            }
        }
        if settings.initial_stream_window == 0 || settings.initial_stream_window > MAX_STREAM_WINDOW
        {
            return Err(FrameError::Malformed(format!(
                "invalid initial stream window {}",
                settings.initial_stream_window
            )));
        }
        if settings.max_frame_size < MIN_FRAME_SIZE {
            return Err(FrameError::Malformed(format!(
                "max frame size {} below minimum {MIN_FRAME_SIZE}",
                settings.max_frame_size
            )));
        }
        Ok(settings)
    }
}
