use std::fmt;

/// A helper macro that unpacks a sequence of 4 bytes found in the buffer with
/// the given identifier, starting at the given offset, into the given integer
/// type. Obviously, the integer type should be able to support at least 4
/// bytes.
///
/// # Examples
///
/// ```ignore
/// # // We ignore this doctest because the macro is not exported.
/// let buf: [u8; 4] = [0, 0, 0, 1];
/// assert_eq!(1u32, unpack_octets_4!(buf, 0, u32));
/// ```
macro_rules! unpack_octets_4 {
    ($buf:expr, $offset:expr, $tip:ty) => {
        (($buf[$offset + 0] as $tip) << 24)
            | (($buf[$offset + 1] as $tip) << 16)
            | (($buf[$offset + 2] as $tip) << 8)
            | (($buf[$offset + 3] as $tip) << 0)
    };
}


mod data;
mod go_away;
mod head;
mod headers;
mod ping;
mod preface;
mod priority;
mod push_promise;
mod reason;
mod reset;
mod settings;
mod stream_id;
mod util;
mod window_update;

pub use self::data::Data;
pub use self::go_away::GoAway;
pub use self::head::{Head, Kind};
pub use self::headers::{Headers, PseudoHeaders};
pub use self::ping::Ping;
pub use self::preface::Preface;
pub use self::priority::{Priority, StreamDependency};
pub use self::push_promise::PushPromise;
pub use self::reason::Reason;
pub use self::reset::Reset;
pub use self::settings::Settings;
pub use self::stream_id::{StreamId, StreamIdOverflow};
pub use self::window_update::WindowUpdate;

// Re-export some constants
pub use self::settings::{
    DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, DEFAULT_SETTINGS_HEADER_TABLE_SIZE,
    MAX_INITIAL_WINDOW_SIZE, MAX_MAX_FRAME_SIZE,
};

pub(crate) use self::headers::HeaderBlock;

pub type FrameSize = u32;
pub type WindowSize = u32;

pub const HEADER_LEN: usize = 9;

/// HTTP/2 frame
///
/// `Preface` is synthetic, it never appears on the wire. It is used to
/// inject the client connection preface (and the settings carried by the
/// `HTTP2-Settings` header) during an HTTP/1.1 upgrade.
///
/// CONTINUATION frames are handled by the codec, the decoder merges them
/// into the preceding HEADERS or PUSH_PROMISE frame and the encoder splits
/// large header blocks into a HEADERS frame followed by CONTINUATION frames.
#[derive(Clone)]
pub enum Frame {
    Data(Data),
    Headers(Headers),
    Priority(Priority),
    Reset(Reset),
    Settings(Settings),
    PushPromise(PushPromise),
    Ping(Ping),
    GoAway(GoAway),
    WindowUpdate(WindowUpdate),
    Preface(Preface),
}

impl Frame {
    /// Stream id the frame is associated with, zero for connection frames
    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::Data(f) => f.stream_id(),
            Frame::Headers(f) => f.stream_id(),
            Frame::Priority(f) => f.stream_id(),
            Frame::Reset(f) => f.stream_id(),
            Frame::PushPromise(f) => f.stream_id(),
            Frame::WindowUpdate(f) => f.stream_id(),
            Frame::Settings(_) | Frame::Ping(_) | Frame::GoAway(_) | Frame::Preface(_) => {
                StreamId::CON
            }
        }
    }

    /// Control frames may be written ahead of queued stream frames
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Frame::WindowUpdate(_)
                | Frame::Ping(_)
                | Frame::Reset(_)
                | Frame::GoAway(_)
                | Frame::Settings(_)
        )
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use self::Frame::*;

        match *self {
            Data(ref frame) => fmt::Debug::fmt(frame, fmt),
            Headers(ref frame) => fmt::Debug::fmt(frame, fmt),
            Priority(ref frame) => fmt::Debug::fmt(frame, fmt),
            Reset(ref frame) => fmt::Debug::fmt(frame, fmt),
            Settings(ref frame) => fmt::Debug::fmt(frame, fmt),
            PushPromise(ref frame) => fmt::Debug::fmt(frame, fmt),
            Ping(ref frame) => fmt::Debug::fmt(frame, fmt),
            GoAway(ref frame) => fmt::Debug::fmt(frame, fmt),
            WindowUpdate(ref frame) => fmt::Debug::fmt(frame, fmt),
            Preface(ref frame) => fmt::Debug::fmt(frame, fmt),
        }
    }
}

/// Errors that can occur during parsing an HTTP/2 frame.
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// A length value other than 8 was set on a PING message.
    #[error("A length value other than 8 was set on a PING message")]
    BadFrameSize,

    /// Frame size exceeded
    #[error("Frame size exceeded")]
    MaxFrameSize,

    /// The padding length was larger than the frame-header-specified
    /// length of the payload.
    #[error("The padding length was larger than the frame-header-specified length of the payload")]
    TooMuchPadding,

    /// An invalid setting value was provided
    #[error("An invalid setting value was provided")]
    InvalidSettingValue,

    /// Initial window size setting is larger than the maximum window size
    #[error("Initial window size setting is larger than the maximum window size")]
    InvalidInitialWindowSize,

    /// An invalid window update value
    #[error("An invalid window update value")]
    InvalidWindowUpdateValue,

    /// The payload length specified by the frame header was not the
    /// value necessary for the specific frame type.
    #[error("Frame payload length does not match the frame type")]
    InvalidPayloadLength,

    /// Received a payload with an ACK settings frame
    #[error("Received a payload with an ACK settings frame")]
    InvalidPayloadAckSettings,

    /// An invalid stream identifier was provided.
    ///
    /// This is returned if a SETTINGS or PING frame is received with a stream
    /// identifier other than zero.
    #[error("An invalid stream identifier was provided")]
    InvalidStreamId,

    /// A request or response is malformed.
    #[error("A request or response is malformed")]
    MalformedMessage,

    /// Header block of a stream is malformed, the connection state is intact
    /// and only the stream must be reset.
    #[error("Malformed header block on stream {0:?}")]
    MalformedStream(StreamId),

    /// An invalid stream dependency ID was provided
    ///
    /// This is returned if a HEADERS or PRIORITY frame is received with an
    /// invalid stream identifier.
    #[error("An invalid stream dependency ID was provided for {0:?}")]
    InvalidDependencyId(StreamId),

    /// An invalid preface
    #[error("An invalid preface")]
    InvalidPreface,

    /// Unexpected push promise
    #[error("Unexpected push promise")]
    UnexpectedPushPromise,

    /// Continuation related error
    #[error("{0}")]
    Continuation(#[from] FrameContinuationError),

    /// Failed to perform HPACK decoding
    #[error("Failed to perform HPACK decoding")]
    Hpack,
}

impl FrameError {
    /// Stream id for stream level errors
    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            FrameError::MalformedStream(id) | FrameError::InvalidDependencyId(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameContinuationError {
    /// Continuation frame is expected
    #[error("Continuation frame is expected")]
    Expected,

    /// Continuation frame is unexpected
    #[error("Continuation frame is unexpected")]
    Unexpected,

    /// Continuation frame's stream id is unexpected
    #[error("Continuation frame's stream id is unexpected")]
    UnknownStreamId,

    /// Max left over size
    #[error("Max left over size")]
    MaxLeftoverSize,

    /// Max number of continuations
    #[error("Max number of continuations")]
    MaxContinuations,

    /// Malformed frame
    #[error("Malformed frame")]
    Malformed,
}
