use std::{error, fmt, io, sync::Arc};

pub use crate::codec::EncoderError;

use crate::frame::{self, GoAway, Reason, StreamId};

/// Connection level errors, the session is closed with GOAWAY
#[derive(thiserror::Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("Go away: {0}")]
    GoAway(Reason),
    #[error("Unknown stream id: {0:?}")]
    UnknownStream(StreamId),
    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("Decoder error: {0}")]
    Decoder(#[from] frame::FrameError),
    /// Stream id is lower than or equal to an already observed id
    #[error("Invalid stream id: {0:?}")]
    InvalidStreamId(StreamId),
    #[error("Unexpected stream id {0:?} for current role")]
    InvalidStreamIdParity(StreamId),
    /// Frame is received for a closed stream
    #[error("Stream {0:?} is closed")]
    StreamClosed(StreamId),
    /// An frame is received on the connection stream that is only valid
    /// for streams
    #[error("Unexpected frame on connection stream")]
    UnexpectedConnectionFrame,
    /// PUSH_PROMISE received while push is disabled or by a server
    #[error("Unexpected push promise")]
    UnexpectedPushPromise,
    #[error("Unexpected setting ack received")]
    UnexpectedSettingsAck,
    /// Missing client preface
    #[error("Invalid connection preface")]
    InvalidPreface,
    /// Connection window overflowed
    #[error("Flow control error")]
    WindowValueOverflow,
    #[error("Window update value is zero")]
    ZeroWindowUpdateValue,
    /// Remote peer opened more streams than allowed
    #[error("Concurrency overflow")]
    ConcurrencyOverflow,
    #[error("Connection is idle")]
    IdleTimeout,
}

impl ConnectionError {
    /// GOAWAY frame for the error
    pub fn to_goaway(&self) -> GoAway {
        match self {
            ConnectionError::GoAway(reason) => GoAway::new(*reason),
            ConnectionError::Encoder(_) => {
                GoAway::new(Reason::PROTOCOL_ERROR).set_data("error during frame encoding")
            }
            ConnectionError::Decoder(err) => {
                let reason = match err {
                    frame::FrameError::MaxFrameSize
                    | frame::FrameError::BadFrameSize
                    | frame::FrameError::InvalidPayloadLength
                    | frame::FrameError::InvalidPayloadAckSettings => Reason::FRAME_SIZE_ERROR,
                    frame::FrameError::InvalidInitialWindowSize => Reason::FLOW_CONTROL_ERROR,
                    frame::FrameError::Hpack => Reason::COMPRESSION_ERROR,
                    _ => Reason::PROTOCOL_ERROR,
                };
                GoAway::new(reason).set_data(format!("error during frame decoding: {}", err))
            }
            ConnectionError::UnknownStream(_) => {
                GoAway::new(Reason::PROTOCOL_ERROR).set_data("unknown stream")
            }
            ConnectionError::InvalidStreamId(_) | ConnectionError::InvalidStreamIdParity(_) => {
                GoAway::new(Reason::PROTOCOL_ERROR).set_data("invalid stream id")
            }
            ConnectionError::StreamClosed(_) => {
                GoAway::new(Reason::STREAM_CLOSED).set_data("stream is closed")
            }
            ConnectionError::UnexpectedConnectionFrame => GoAway::new(Reason::PROTOCOL_ERROR)
                .set_data("stream frame received on connection stream"),
            ConnectionError::UnexpectedPushPromise => {
                GoAway::new(Reason::PROTOCOL_ERROR).set_data("unexpected push promise")
            }
            ConnectionError::UnexpectedSettingsAck => {
                GoAway::new(Reason::PROTOCOL_ERROR).set_data("received unexpected settings ack")
            }
            ConnectionError::InvalidPreface => {
                GoAway::new(Reason::PROTOCOL_ERROR).set_data("invalid connection preface")
            }
            ConnectionError::WindowValueOverflow => {
                GoAway::new(Reason::FLOW_CONTROL_ERROR).set_data("window value is overflowed")
            }
            ConnectionError::ZeroWindowUpdateValue => GoAway::new(Reason::PROTOCOL_ERROR)
                .set_data("zero value for window update frame is not allowed"),
            ConnectionError::ConcurrencyOverflow => GoAway::new(Reason::FLOW_CONTROL_ERROR)
                .set_data("concurrency overflow"),
            ConnectionError::IdleTimeout => GoAway::new(Reason::NO_ERROR).set_data("idle timeout"),
        }
    }
}

/// Stream level errors, the stream is reset with RST_STREAM
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Stream is closed")]
    Closed,
    #[error("Stream has been reset with {0}")]
    Reset(Reason),
    #[error("Stream window is overflowed")]
    WindowOverflowed,
    #[error("Zero value for window update frame is not allowed")]
    WindowZeroUpdateValue,
    #[error("Trailers headers without end of stream flags")]
    TrailersWithoutEos,
    #[error("Invalid content length")]
    InvalidContentLength,
    #[error("Malformed header block")]
    Malformed,
    #[error("Unexpected HEADERS frame")]
    UnexpectedHeadersFrame,
    #[error("Unexpected DATA frame")]
    UnexpectedDataFrame,
    #[error("Stream is refused")]
    Refused,
    #[error("Stream cannot depend on itself")]
    SelfDependency,
}

impl StreamError {
    /// Reason code of the RST_STREAM frame for the error
    #[inline]
    pub fn reason(&self) -> Reason {
        match self {
            StreamError::Closed => Reason::STREAM_CLOSED,
            StreamError::Reset(r) => *r,
            StreamError::WindowOverflowed => Reason::FLOW_CONTROL_ERROR,
            StreamError::Refused => Reason::REFUSED_STREAM,
            StreamError::WindowZeroUpdateValue
            | StreamError::TrailersWithoutEos
            | StreamError::InvalidContentLength
            | StreamError::Malformed
            | StreamError::UnexpectedHeadersFrame
            | StreamError::UnexpectedDataFrame
            | StreamError::SelfDependency => Reason::PROTOCOL_ERROR,
        }
    }
}

/// Errors delivered to completion sinks and returned to users of a session
#[derive(thiserror::Error, Debug, Clone)]
pub enum OperationError {
    #[error("{0}")]
    Io(Arc<io::Error>),

    /// Session is closed or the stream does not exist anymore
    #[error("Session or stream is closed")]
    Closed,

    /// Peer disabled server push
    #[error("Push is disabled")]
    PushDisabled,

    /// Stream has been reset locally
    #[error("Stream has been reset with {0}")]
    Reset(Reason),

    /// Stream has been reset by the peer
    #[error("Stream has been reset from the peer with {0}")]
    RemoteReset(Reason),

    /// The session is going away
    #[error("Going away: {0}")]
    GoAway(Reason),

    #[error("Flow control error")]
    FlowControl,

    /// The frame cannot be sent in the current stream state
    #[error("Invalid frame for current stream state")]
    InvalidFrame,

    #[error("{0}")]
    Stream(#[from] StreamError),

    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Stream id space is exhausted, a new connection is required
    #[error("Stream id is overflowed")]
    OverflowedStreamId,

    /// Remote MAX_CONCURRENT_STREAMS limit is reached
    #[error("Concurrency limit is reached")]
    Concurrency,
}

impl From<io::Error> for OperationError {
    fn from(err: io::Error) -> Self {
        OperationError::Io(Arc::new(err))
    }
}

impl From<frame::StreamIdOverflow> for OperationError {
    fn from(_: frame::StreamIdOverflow) -> Self {
        OperationError::OverflowedStreamId
    }
}

/// Async request lifecycle errors
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum AsyncError {
    /// Operation is not allowed in the current state
    #[error("Operation is not allowed in {0} state")]
    IllegalState(&'static str),
    /// Another actor already terminated the current async cycle
    #[error("Async cycle is already terminated ({0})")]
    AlreadyTerminated(&'static str),
    /// Request is not handled by a container channel
    #[error("Request is detached from its channel")]
    Detached,
}

/// Executor rejected submitted work
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("Executor is shut down")]
    Shutdown,
}

/// Error escaping a request handler or an async listener
///
/// Keeps the type name of the original error for diagnostics, the error
/// itself is shared so it can be attached to error dispatches.
#[derive(Clone)]
pub struct HandlerError {
    type_name: &'static str,
    err: Arc<dyn error::Error + Send + Sync + 'static>,
}

impl HandlerError {
    pub fn new<E>(err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        HandlerError {
            type_name: std::any::type_name::<E>(),
            err: Arc::new(err),
        }
    }

    /// Error for a panic caught while running user code
    pub fn panic(msg: String) -> Self {
        HandlerError::new(Panic(msg))
    }

    /// Type name of the original error
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Reference to the original error
    pub fn get_ref(&self) -> &(dyn error::Error + Send + Sync + 'static) {
        &*self.err
    }

    /// Iterate over the original error and its sources
    pub fn chain(&self) -> impl Iterator<Item = &(dyn error::Error + 'static)> {
        let first: &(dyn error::Error + 'static) = &*self.err;
        std::iter::successors(Some(first), |e| e.source())
    }

    /// Check if the error chain contains an error of type `T`
    pub fn is<T: error::Error + 'static>(&self) -> bool {
        self.chain().any(|e| e.is::<T>())
    }
}

impl<E> From<E> for HandlerError
where
    E: error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        HandlerError::new(err)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("type", &self.type_name)
            .field("err", &self.err)
            .finish()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.err)
    }
}

#[derive(thiserror::Error, Debug)]
#[error("panic: {0}")]
struct Panic(String);
