use std::{fmt, io};

use crate::frame::{self, Frame, Reason, Reset, StreamId};
use crate::{error, message::ListenerError, stream::StreamRef};

/// Connection level events
#[derive(Debug)]
pub enum Control {
    /// Stream listener returned an error
    AppError(AppError),
    /// Protocol level error
    ConnectionError(ConnectionError),
    /// Remote GoAway is received
    GoAway(GoAway),
    /// Peer is gone
    PeerGone(PeerGone),
    /// Session is closed
    Terminated(Terminated),
}

/// Reaction to a control event
#[derive(Clone, Debug)]
pub struct ControlAck {
    pub(crate) frame: Option<Frame>,
    pub(crate) disconnect: bool,
}

/// Connection level events handler
pub trait ControlService: Send + Sync {
    fn on_control(&self, msg: Control) -> ControlAck;
}

impl<F> ControlService for F
where
    F: Fn(Control) -> ControlAck + Send + Sync,
{
    fn on_control(&self, msg: Control) -> ControlAck {
        (self)(msg)
    }
}

impl Control {
    pub(crate) fn app_error(err: ListenerError, stream: StreamRef) -> Self {
        Control::AppError(AppError::new(err, stream))
    }

    /// Create a new `Control` message from GOAWAY packet.
    pub(crate) fn go_away(frm: frame::GoAway) -> Self {
        Control::GoAway(GoAway(frm))
    }

    pub(crate) fn peer_gone(err: Option<io::Error>) -> Self {
        Control::PeerGone(PeerGone(err))
    }

    pub(crate) fn terminated() -> Self {
        Control::Terminated(Terminated)
    }

    /// Protocol level error, goaway frame reports `last` as last processed stream
    pub(crate) fn proto_error(err: error::ConnectionError, last: StreamId) -> Self {
        Control::ConnectionError(ConnectionError::new(err, last))
    }

    /// Default ack impl
    pub fn ack(self) -> ControlAck {
        match self {
            Control::AppError(item) => item.ack(),
            Control::ConnectionError(item) => item.ack(),
            Control::GoAway(item) => item.ack(),
            Control::PeerGone(item) => item.ack(),
            Control::Terminated(item) => item.ack(),
        }
    }
}

impl ControlAck {
    /// Ack without any action
    pub fn none() -> Self {
        ControlAck {
            frame: None,
            disconnect: false,
        }
    }

    /// Close session
    pub fn disconnect() -> Self {
        ControlAck {
            frame: None,
            disconnect: true,
        }
    }
}

/// Stream listener error
pub struct AppError {
    err: ListenerError,
    reason: Reason,
    stream: StreamRef,
}

impl AppError {
    fn new(err: ListenerError, stream: StreamRef) -> Self {
        Self {
            err,
            stream,
            reason: Reason::CANCEL,
        }
    }

    #[inline]
    /// Returns reference to the listener error
    pub fn get_ref(&self) -> &ListenerError {
        &self.err
    }

    #[inline]
    pub fn stream(&self) -> &StreamRef {
        &self.stream
    }

    #[inline]
    /// Set reason code for reset packet
    pub fn reason(mut self, reason: Reason) -> Self {
        self.reason = reason;
        self
    }

    #[inline]
    /// Ack listener error, reset the stream.
    pub fn ack(self) -> ControlAck {
        ControlAck {
            frame: Some(Reset::new(self.stream.id(), self.reason).into()),
            disconnect: false,
        }
    }
}

impl fmt::Debug for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppError")
            .field("err", &self.err)
            .field("reason", &self.reason)
            .field("stream", &self.stream.id())
            .finish()
    }
}

/// Session has been terminated
#[derive(Debug)]
pub struct Terminated;

impl Terminated {
    #[inline]
    pub fn ack(self) -> ControlAck {
        ControlAck::disconnect()
    }
}

/// Protocol level error
#[derive(Debug)]
pub struct ConnectionError {
    err: error::ConnectionError,
    frm: frame::GoAway,
}

impl ConnectionError {
    fn new(err: error::ConnectionError, last: StreamId) -> Self {
        Self {
            frm: err.to_goaway().set_last_stream_id(last),
            err,
        }
    }

    #[inline]
    /// Returns reference to a protocol error
    pub fn get_ref(&self) -> &error::ConnectionError {
        &self.err
    }

    #[inline]
    /// Set reason code for go away packet
    pub fn reason(mut self, reason: Reason) -> Self {
        self.frm = self.frm.set_reason(reason);
        self
    }

    #[inline]
    /// Ack protocol error, return go away packet and close connection.
    pub fn ack(self) -> ControlAck {
        ControlAck {
            frame: Some(self.frm.into()),
            disconnect: true,
        }
    }
}

#[derive(Debug)]
pub struct PeerGone(pub(crate) Option<io::Error>);

impl PeerGone {
    /// Returns error reference
    pub fn err(&self) -> Option<&io::Error> {
        self.0.as_ref()
    }

    /// Take error
    pub fn take(&mut self) -> Option<io::Error> {
        self.0.take()
    }

    pub fn ack(self) -> ControlAck {
        ControlAck::disconnect()
    }
}

/// Remote GOAWAY
#[derive(Debug)]
pub struct GoAway(frame::GoAway);

impl GoAway {
    pub fn frame(&self) -> &frame::GoAway {
        &self.0
    }

    /// Already running streams are allowed to complete
    pub fn ack(self) -> ControlAck {
        ControlAck::none()
    }
}
