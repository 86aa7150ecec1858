use std::time::Duration;

/// Size of every data segment except the last one of a transfer.
pub const SEGMENT_SIZE: usize = 255;
/// Number of segments in flight before an acknowledgment is required.
pub const WINDOW_SEGMENTS: usize = 7;
/// Redundant FIN replies sent by the best-effort side of a teardown.
pub const FIN_BURST: usize = 20;

/// Tunables of a single session.
///
/// The defaults are the values the device firmware expects; tests shrink the
/// timeouts to keep lossy runs fast.
#[derive(Debug, Clone)]
pub struct Config {
    pub window_segments: usize,
    pub handshake_timeout: Duration,
    pub ack_timeout: Duration,
    pub fin_timeout: Duration,
    /// Consecutive timeouts tolerated by any retry loop.
    pub max_retries: u32,
    pub fin_burst: usize,
    /// `None` blocks indefinitely while waiting for download data.
    pub idle_timeout: Option<Duration>,
    /// Slice length used to keep indefinite waits cancellable.
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            window_segments: WINDOW_SEGMENTS,
            handshake_timeout: Duration::from_millis(100),
            ack_timeout: Duration::from_millis(100),
            fin_timeout: Duration::from_millis(100),
            max_retries: 50,
            fin_burst: FIN_BURST,
            idle_timeout: None,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl Config {
    /// Width of the send window in bytes (1785 with the defaults).
    pub fn window_bytes(&self) -> u64 {
        (self.window_segments * SEGMENT_SIZE) as u64
    }

    /// Use the same timeout for the handshake, the ack loop and the FIN wait.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self.ack_timeout = timeout;
        self.fin_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_window_segments(mut self, window_segments: usize) -> Self {
        self.window_segments = window_segments.max(1);
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_window_is_seven_segments() {
        let config = Config::default();
        assert_eq!(config.window_bytes(), 1785);
        assert_eq!(config.handshake_timeout, Duration::from_millis(100));
        assert_eq!(config.fin_burst, 20);
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn window_never_collapses_to_zero() {
        let config = Config::default().with_window_segments(0);
        assert_eq!(config.window_bytes(), SEGMENT_SIZE as u64);
    }
}
