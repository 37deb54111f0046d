use std::{error, fmt, mem};

use ntex_bytes::Bytes;
use ntex_http::HeaderMap;

use crate::error::{OperationError, StreamError};
use crate::frame::PseudoHeaders;
use crate::stream::{Capacity, StreamRef};

/// Error returned by a stream listener
pub type ListenerError = Box<dyn error::Error + Send + Sync>;

/// Receiver of inbound stream events
///
/// Called outside of the session lock, on the thread that feeds the session.
/// An error resets the stream through the control service.
pub trait StreamListener: Send + Sync {
    fn on_message(&self, msg: Message) -> Result<(), ListenerError>;
}

impl<F> StreamListener for F
where
    F: Fn(Message) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_message(&self, msg: Message) -> Result<(), ListenerError> {
        (self)(msg)
    }
}

#[derive(Debug)]
pub struct Message {
    stream: StreamRef,
    kind: MessageKind,
}

#[derive(Debug)]
pub enum MessageKind {
    /// Initial header block
    Headers {
        pseudo: PseudoHeaders,
        headers: HeaderMap,
        eof: bool,
    },
    /// Data chunk, the capacity must be consumed to receive more data
    Data(Bytes, Capacity),
    /// End of stream
    Eof(StreamEof),
    /// Peer promised a pushed stream
    Push {
        stream: StreamRef,
        pseudo: PseudoHeaders,
        headers: HeaderMap,
    },
    /// Stream is gone without proper end
    Disconnect(OperationError),
    Empty,
}

#[derive(Debug, Clone)]
pub enum StreamEof {
    /// Last data chunk, its capacity is already released
    Data(Bytes),
    Trailers(HeaderMap),
    Error(StreamError),
}

impl Message {
    pub(crate) fn new(stream: StreamRef, kind: MessageKind) -> Self {
        Message { stream, kind }
    }

    #[inline]
    pub fn kind(&mut self) -> &mut MessageKind {
        &mut self.kind
    }

    #[inline]
    pub fn stream(&self) -> &StreamRef {
        &self.stream
    }

    pub fn into_parts(self) -> (StreamRef, MessageKind) {
        (self.stream, self.kind)
    }
}

impl MessageKind {
    pub fn take(&mut self) -> MessageKind {
        mem::replace(self, MessageKind::Empty)
    }

    /// Does this message end the stream
    pub fn is_eof(&self) -> bool {
        match self {
            MessageKind::Headers { eof, .. } => *eof,
            MessageKind::Eof(_) | MessageKind::Disconnect(_) => true,
            _ => false,
        }
    }
}

impl fmt::Display for StreamEof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamEof::Data(data) => write!(f, "data({}B)", data.len()),
            StreamEof::Trailers(_) => write!(f, "trailers"),
            StreamEof::Error(err) => write!(f, "error({})", err),
        }
    }
}
