//! Connection counters.

use std::time::Duration;

/// Snapshot of a connection's activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionMetrics {
    /// Frames handed to the duplex connection
    pub frames_sent: u64,

    /// Frames decoded from the duplex connection
    pub frames_received: u64,

    /// Encoded bytes written
    pub bytes_sent: u64,

    /// Encoded bytes read
    pub bytes_received: u64,

    /// Streams started by this side
    pub streams_opened: u64,

    /// Streams started by the peer
    pub streams_accepted: u64,

    /// Streams reset, by either side
    pub streams_reset: u64,

    /// PONG frames received
    pub pongs_received: u64,

    /// Round-trip time measured by the most recent PING/PONG
    pub last_rtt: Option<Duration>,
}

impl ConnectionMetrics {
    pub(crate) fn record_sent(&mut self, frames: u64, bytes: usize) {
        self.frames_sent += frames;
        self.bytes_sent += bytes as u64;
    }

    pub(crate) fn record_received(&mut self, bytes: usize) {
        self.frames_received += 1;
        self.bytes_received += bytes as u64;
    }
}
