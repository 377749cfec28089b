//! Per-stream credit bookkeeping.
//!
//! The sender spends [`SendCredit`] for every byte it writes and only gets it
//! back through WINDOW_UPDATE frames. The receiver tracks the same window from
//! its end with [`ReceiveWindow`] and decides when consumed bytes are worth
//! returning to the sender.

/// Credit the local writer may still spend on a stream.
#[derive(Debug, Clone)]
pub struct SendCredit {
    available: u64,
}

impl SendCredit {
    /// Start with the window the peer announced.
    pub fn new(initial: u64) -> Self {
        Self { available: initial }
    }

    /// Bytes that may be sent right now.
    pub fn available(&self) -> u64 {
        self.available
    }

    /// Take up to `wanted` bytes of credit, returning how much was taken.
    pub fn consume(&mut self, wanted: u64) -> u64 {
        let taken = wanted.min(self.available);
        self.available -= taken;
        taken
    }

    /// Add credit granted by a WINDOW_UPDATE.
    pub fn grant(&mut self, increment: u64) {
        self.available = self.available.saturating_add(increment);
    }
}

/// The peer sent more than it was allowed to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("received {received} bytes with only {available} bytes of window left")]
pub struct WindowExceeded {
    /// Bytes carried by the offending frame.
    pub received: u64,
    /// Window left before the frame arrived.
    pub available: u64,
}

/// Receive-side view of a stream window.
#[derive(Debug, Clone)]
pub struct ReceiveWindow {
    available: u64,
    unacknowledged: u64,
    threshold: u64,
}

impl ReceiveWindow {
    /// A window of `window` bytes, replenished once `threshold_percent` of it was consumed.
    pub fn new(window: u64, threshold_percent: u8) -> Self {
        let threshold = (window.saturating_mul(u64::from(threshold_percent)) / 100).max(1);
        Self {
            available: window,
            unacknowledged: 0,
            threshold,
        }
    }

    /// Bytes the peer may still send before it must wait for an update.
    pub fn available(&self) -> u64 {
        self.available
    }

    /// Account for `len` bytes that just arrived.
    ///
    /// # Errors
    ///
    /// Returns [`WindowExceeded`] when the peer overran its credit.
    pub fn on_received(&mut self, len: u64) -> Result<(), WindowExceeded> {
        if len > self.available {
            return Err(WindowExceeded {
                received: len,
                available: self.available,
            });
        }
        self.available -= len;
        Ok(())
    }

    /// Account for `len` bytes handed to the reader.
    ///
    /// Returns the increment to announce once enough bytes piled up.
    pub fn on_consumed(&mut self, len: u64) -> Option<u64> {
        self.unacknowledged += len;
        if self.unacknowledged < self.threshold {
            return None;
        }
        let increment = std::mem::take(&mut self.unacknowledged);
        self.available += increment;
        Some(increment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_credit_never_goes_negative() {
        let mut credit = SendCredit::new(10);
        assert_eq!(credit.consume(4), 4);
        assert_eq!(credit.consume(100), 6);
        assert_eq!(credit.consume(1), 0);
        credit.grant(5);
        assert_eq!(credit.available(), 5);
        credit.grant(u64::MAX);
        assert_eq!(credit.available(), u64::MAX);
    }

    #[test]
    fn test_receive_window_replenishes_at_threshold() {
        let mut window = ReceiveWindow::new(100, 50);
        window.on_received(60).unwrap();
        assert_eq!(window.available(), 40);

        assert_eq!(window.on_consumed(30), None);
        assert_eq!(window.on_consumed(20), Some(50));
        assert_eq!(window.available(), 90);
        assert_eq!(window.on_consumed(10), None);
    }

    #[test]
    fn test_receive_window_detects_overrun() {
        let mut window = ReceiveWindow::new(16, 50);
        window.on_received(16).unwrap();
        assert_eq!(
            window.on_received(1),
            Err(WindowExceeded {
                received: 1,
                available: 0
            })
        );
    }
}
