#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
use crate::{consts::MAX_WINDOW_SIZE, frame::WindowSize};

/// Flow-control window
///
/// Send windows track the credit granted by the peer, receive windows
/// track the credit we granted to the peer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Window {
    /// Window the peer knows about.
    ///
    /// This can go negative if a `SETTINGS_INITIAL_WINDOW_SIZE` is received.
    ///
    /// For example, say the peer sends a request and uses 32kb of the window.
    /// We send a `SETTINGS_INITIAL_WINDOW_SIZE` of 16kb. The peer has to adjust
    /// its understanding of the capacity of the window, and that would be:
    ///
    /// ```notrust
    /// default (64kb) - used (32kb) - settings_diff (64kb - 16kb): -16kb
    /// ```
    window_size: i32,
}

/// Window value would exceed 2^31-1
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct WindowOverflow;

impl Window {
    pub(crate) const fn new(sz: i32) -> Window {
        Window { window_size: sz }
    }

    /// Signed window value
    pub(crate) const fn value(self) -> i32 {
        self.window_size
    }

    /// Returns the window size as known by the peer
    pub(crate) const fn window_size(self) -> WindowSize {
        if self.window_size < 0 {
            0
        } else {
            self.window_size as WindowSize
        }
    }

    /// If a `WINDOW_UPDATE` frame should be sent, returns a positive number
    /// representing the increment to be used.
    ///
    /// `cap` is the amount of received data that is not consumed yet.
    /// If there is no available bytes to be reclaimed, or the number of
    /// available bytes does not reach the threshold, this returns `None`.
    pub(crate) fn update(
        &mut self,
        cap: WindowSize,
        max_size: WindowSize,
        threshold_size: WindowSize,
    ) -> Option<WindowSize> {
        let max_size = max_size as i64;
        let current = self.window_size as i64;
        if current >= max_size {
            return None;
        }

        let available = max_size - current - cap as i64;
        if available <= 0 || available < threshold_size as i64 {
            None
        } else {
            self.window_size = (current + available) as i32;
            Some(available as WindowSize)
        }
    }

    /// Apply a signed delta.
    ///
    /// This is called after receiving a `WINDOW_UPDATE` frame or a `SETTINGS`
    /// frame with a new `INITIAL_WINDOW_SIZE` value.
    pub(crate) fn apply(self, delta: i32) -> Result<Self, WindowOverflow> {
        let val = self.window_size as i64 + delta as i64;

        if val > MAX_WINDOW_SIZE as i64 || val < i32::MIN as i64 {
            return Err(WindowOverflow);
        }

        log::trace!(
            "update_window; delta={}; old={}; new={}",
            delta,
            self.window_size,
            val
        );

        Ok(Self::new(val as i32))
    }

    /// Increase the window size.
    pub(crate) fn inc(self, sz: WindowSize) -> Result<Self, WindowOverflow> {
        if sz > MAX_WINDOW_SIZE {
            return Err(WindowOverflow);
        }
        self.apply(sz as i32)
    }

    /// Decrement the window size.
    ///
    /// Receiving side, fails if the peer sent more than it was allowed to.
    pub(crate) fn dec(self, sz: WindowSize) -> Result<Self, WindowOverflow> {
        if sz > self.window_size() {
            Err(WindowOverflow)
        } else {
            log::trace!("dec_window; sz={}; window={}", sz, self.window_size);
            Ok(Self::new(self.window_size - sz as i32))
        }
    }
}
