use std::time::Duration;

use ntex_util::time::Seconds;

use crate::{consts, frame, frame::Settings, frame::WindowSize};

#[derive(Clone, Debug)]
/// Http2 session configuration
pub struct Config {
    pub(crate) settings: Settings,
    /// Initial window size of streams
    pub(crate) window_sz: WindowSize,
    pub(crate) window_sz_threshold: WindowSize,
    /// Initial window size for new connections.
    pub(crate) connection_window_sz: WindowSize,
    pub(crate) connection_window_sz_threshold: WindowSize,
    /// How long a locally reset stream should ignore frames
    pub(crate) reset_duration: Duration,
    /// Maximum number of locally reset streams to keep at a time
    pub(crate) reset_max: usize,
    /// Maximum number of remote initiated streams
    pub(crate) remote_max_concurrent_streams: Option<u32>,
    /// Limit number of continuation frames for headers
    pub(crate) max_header_continuations: usize,
    /// Connection timeouts
    pub(crate) idle_timeout: Seconds,
    pub(crate) goaway_grace: Seconds,
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}

impl Config {
    /// Create configuration
    pub fn new() -> Self {
        let window_sz = frame::DEFAULT_INITIAL_WINDOW_SIZE;
        let connection_window_sz = consts::DEFAULT_CONNECTION_WINDOW_SIZE;

        let mut settings = Settings::default();
        settings.set_max_concurrent_streams(Some(consts::DEFAULT_MAX_CONCURRENT_STREAMS));
        settings.set_enable_push(false);
        settings.set_max_header_list_size(Some(consts::DEFAULT_SETTINGS_MAX_HEADER_LIST_SIZE));

        Config {
            window_sz,
            window_sz_threshold: window_sz / 2,
            connection_window_sz,
            connection_window_sz_threshold: connection_window_sz / 2,
            settings,
            reset_max: consts::DEFAULT_RESET_STREAM_MAX,
            reset_duration: consts::DEFAULT_RESET_STREAM_SECS.into(),
            remote_max_concurrent_streams: Some(consts::DEFAULT_MAX_CONCURRENT_STREAMS),
            max_header_continuations: consts::DEFAULT_MAX_CONTINUATIONS,
            idle_timeout: consts::DEFAULT_IDLE_TIMEOUT,
            goaway_grace: consts::DEFAULT_GOAWAY_GRACE,
        }
    }
}

impl Config {
    /// Indicates the initial window size (in octets) for stream-level
    /// flow control for received data.
    ///
    /// A WINDOW_UPDATE is emitted once half of the window has been consumed.
    ///
    /// The default value is 65,535.
    pub fn set_initial_window_size(mut self, size: u32) -> Self {
        assert!(size <= consts::MAX_WINDOW_SIZE);
        self.window_sz = size;
        self.window_sz_threshold = size / 2;
        self.settings.set_initial_window_size(Some(size));
        self
    }

    /// Indicates the initial window size (in octets) for connection-level flow control
    /// for received data.
    ///
    /// The default value is 1Mb.
    pub fn set_initial_connection_window_size(mut self, size: u32) -> Self {
        assert!(size <= consts::MAX_WINDOW_SIZE);
        self.connection_window_sz = size;
        self.connection_window_sz_threshold = size / 2;
        self
    }

    /// Indicates the size (in octets) of the largest HTTP/2 frame payload that the
    /// configured session is able to accept.
    ///
    /// The value **must** be between 16,384 and 16,777,215. The default value is 16,384.
    ///
    /// # Panics
    ///
    /// This function panics if `max` is not within the legal range specified
    /// above.
    pub fn set_max_frame_size(mut self, max: u32) -> Self {
        self.settings.set_max_frame_size(Some(max));
        self
    }

    /// Sets the max size of received header frames.
    ///
    /// This advisory setting informs a peer of the maximum size of header list
    /// that the sender is prepared to accept, in octets. The value is based on
    /// the uncompressed size of header fields, including the length of the name
    /// and value in octets plus an overhead of 32 octets for each header field.
    ///
    /// By default value is set to 48Kb.
    pub fn set_max_header_list_size(mut self, max: u32) -> Self {
        self.settings.set_max_header_list_size(Some(max));
        self
    }

    /// Sets the max number of continuation frames for HEADERS
    ///
    /// By default value is set to 5
    pub fn set_max_header_continuation_frames(mut self, max: usize) -> Self {
        self.max_header_continuations = max;
        self
    }

    /// Sets the maximum number of concurrent streams.
    ///
    /// The maximum concurrent streams setting only controls the maximum number
    /// of streams that can be initiated by the remote peer. Streams over the
    /// limit are refused with `REFUSED_STREAM`.
    ///
    /// See [Section 5.1.2] in the HTTP/2 spec for more details.
    ///
    /// [Section 5.1.2]: https://http2.github.io/http2-spec/#rfc.section.5.1.2
    pub fn set_max_concurrent_streams(mut self, max: u32) -> Self {
        self.remote_max_concurrent_streams = Some(max);
        self.settings.set_max_concurrent_streams(Some(max));
        self
    }

    /// Allow the peer to push streams, only meaningful for client sessions.
    pub fn set_enable_push(mut self, enable: bool) -> Self {
        self.settings.set_enable_push(enable);
        self
    }

    /// Sets the maximum number of concurrent locally reset streams.
    ///
    /// The HTTP/2 specification requires that any further frames received for
    /// a locally reset stream must be ignored for "some time". When this max
    /// value is reached, the oldest reset stream is purged from memory.
    ///
    /// The default value is 10.
    pub fn set_max_concurrent_reset_streams(mut self, val: usize) -> Self {
        self.reset_max = val;
        self
    }

    /// Sets how long frames of a locally reset stream are ignored.
    ///
    /// The default value is 10 seconds.
    pub fn set_reset_stream_duration(mut self, dur: Seconds) -> Self {
        self.reset_duration = dur.into();
        self
    }

    /// Set idle timeout.
    ///
    /// An open session without any frame activity for this long is
    /// expired by `Session::on_idle_timeout()`.
    ///
    /// By default idle timeout is 30 seconds.
    pub fn set_idle_timeout(mut self, timeout: Seconds) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set grace period of a going away session.
    ///
    /// By default grace period is 5 seconds.
    pub fn set_goaway_grace(mut self, timeout: Seconds) -> Self {
        self.goaway_grace = timeout;
        self
    }

    /// Local settings sent during handshake
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn max_header_list_size(&self) -> usize {
        self.settings
            .max_header_list_size()
            .unwrap_or(consts::DEFAULT_SETTINGS_MAX_HEADER_LIST_SIZE) as usize
    }

    pub(crate) fn max_frame_size(&self) -> usize {
        self.settings
            .max_frame_size()
            .unwrap_or(frame::DEFAULT_MAX_FRAME_SIZE) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        let cfg = Config::new()
            .set_initial_window_size(1000)
            .set_initial_connection_window_size(4000);
        assert_eq!(cfg.window_sz_threshold, 500);
        assert_eq!(cfg.connection_window_sz_threshold, 2000);
        assert_eq!(cfg.settings().initial_window_size(), Some(1000));
        assert_eq!(cfg.settings().is_push_enabled(), Some(false));
    }
}
