//! Konfigurasi connection dan event loop
//!
//! Semua nilai punya default yang masuk akal; override lewat `with_*`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::protocol::message::MAX_MESSAGE_SIZE;

/// Default timeout untuk satu method call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(25);
/// Socket buffer (SO_SNDBUF/SO_RCVBUF)
pub const DEFAULT_SOCKET_BUFFER: usize = 256 * 1024; // 256KB

/// Batas antrean frame yang belum di-dispatch per connection
pub const DEFAULT_MAX_INBOX_LEN: usize = 4096;

/// Callback untuk error loop yang tidak fatal
pub type ErrorSink = Arc<dyn Fn(&Error) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Batas waktu menunggu reply
    pub call_timeout: Duration,
    /// Interval tidur saat menunggu socket/reply
    pub poll_slice: Duration,
    pub socket_buffer_size: usize,
    pub max_message_size: usize,
    /// Signal/frame yang tidak di-dispatch (mis. tanpa event loop) dibuang
    /// dari yang tertua setelah batas ini
    pub max_inbox_len: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            poll_slice: Duration::from_millis(1),
            socket_buffer_size: DEFAULT_SOCKET_BUFFER,
            max_message_size: MAX_MESSAGE_SIZE,
            max_inbox_len: DEFAULT_MAX_INBOX_LEN,
        }
    }
}

impl ConnectionConfig {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_poll_slice(mut self, slice: Duration) -> Self {
        self.poll_slice = slice;
        self
    }

    pub fn with_socket_buffer_size(mut self, size: usize) -> Self {
        self.socket_buffer_size = size;
        self
    }

    /// Tidak bisa melebihi batas protokol
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size.min(MAX_MESSAGE_SIZE);
        self
    }

    /// Minimal 1
    pub fn with_max_inbox_len(mut self, len: usize) -> Self {
        self.max_inbox_len = len.max(1);
        self
    }
}

#[derive(Clone)]
pub struct LoopConfig {
    /// `run()` berhenti dengan `LoopTimeout` setelah durasi ini
    pub deadline: Option<Duration>,
    /// Batas atas satu kali poll; menentukan latency cek deadline
    pub poll_interval: Duration,
    pub error_sink: ErrorSink,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            deadline: None,
            poll_interval: Duration::from_millis(10),
            error_sink: Arc::new(|err: &Error| {
                tracing::warn!(error = %err, "event loop dropped frame");
            }),
        }
    }
}

impl LoopConfig {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_error_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.error_sink = Arc::new(sink);
        self
    }
}

impl fmt::Debug for LoopConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopConfig")
            .field("deadline", &self.deadline)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_defaults() {
        let conn = ConnectionConfig::default();
        assert_eq!(conn.call_timeout, Duration::from_secs(25));
        assert_eq!(conn.socket_buffer_size, 256 * 1024);
        assert_eq!(conn.max_inbox_len, DEFAULT_MAX_INBOX_LEN);
        assert_eq!(ConnectionConfig::default().with_max_inbox_len(0).max_inbox_len, 1);

        let lp = LoopConfig::default();
        assert!(lp.deadline.is_none());
        assert_eq!(lp.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_max_message_size_is_capped() {
        let conn = ConnectionConfig::default().with_max_message_size(usize::MAX);
        assert_eq!(conn.max_message_size, MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_custom_error_sink() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let config = LoopConfig::default().with_error_sink(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (config.error_sink)(&Error::LoopTimeout);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
