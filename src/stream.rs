use std::{fmt, sync::Arc, sync::Weak};

use ntex_bytes::Bytes;
use ntex_http::{HeaderMap, StatusCode};

use crate::error::{OperationError, StreamError};
use crate::frame::{Data, Headers, PseudoHeaders, PushPromise, Reason, StreamId, WindowSize};
use crate::session::{Session, SessionShared};
use crate::{callback::Callback, callback::Promise, message::StreamListener, window::Window};

/// Stream state, RFC 7540 Section 5.1
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub(crate) struct StreamFlags: u8 {
        const RECV_HEADERS    = 0b0000_0001;
        const SEND_HEADERS    = 0b0000_0010;
        const REMOTE          = 0b0000_0100;
        // PUSH_PROMISE of a pushed stream is not written yet
        const PENDING_PROMISE = 0b0000_1000;
    }
}

/// Header block kind
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum HeadersKind {
    Initial,
    Trailers,
}

/// Stream state and flags
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct StreamStatus {
    pub(crate) state: StreamState,
    pub(crate) flags: StreamFlags,
}

impl StreamStatus {
    pub(crate) fn new(state: StreamState, remote: bool) -> Self {
        let mut flags = StreamFlags::empty();
        flags.set(StreamFlags::REMOTE, remote);
        StreamStatus { state, flags }
    }

    fn close_recv(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            _ => StreamState::Closed,
        };
    }

    fn close_send(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            _ => StreamState::Closed,
        };
    }

    pub(crate) fn is_recv_closed(&self) -> bool {
        matches!(
            self.state,
            StreamState::HalfClosedRemote | StreamState::Closed | StreamState::ReservedLocal
        )
    }

    /// Received HEADERS frame
    pub(crate) fn recv_headers(&mut self, eof: bool) -> Result<HeadersKind, StreamError> {
        let kind = match self.state {
            StreamState::Idle => {
                self.state = StreamState::Open;
                HeadersKind::Initial
            }
            StreamState::ReservedRemote => {
                self.state = StreamState::HalfClosedLocal;
                HeadersKind::Initial
            }
            StreamState::Open | StreamState::HalfClosedLocal => {
                if self.flags.contains(StreamFlags::RECV_HEADERS) {
                    if !eof {
                        return Err(StreamError::TrailersWithoutEos);
                    }
                    HeadersKind::Trailers
                } else {
                    HeadersKind::Initial
                }
            }
            StreamState::HalfClosedRemote | StreamState::Closed => {
                return Err(StreamError::Closed)
            }
            StreamState::ReservedLocal => return Err(StreamError::UnexpectedHeadersFrame),
        };
        self.flags.insert(StreamFlags::RECV_HEADERS);
        if eof {
            self.close_recv();
        }
        Ok(kind)
    }

    /// Received DATA frame
    pub(crate) fn recv_data(&mut self, eof: bool) -> Result<(), StreamError> {
        match self.state {
            StreamState::Open | StreamState::HalfClosedLocal
                if self.flags.contains(StreamFlags::RECV_HEADERS) =>
            {
                if eof {
                    self.close_recv();
                }
                Ok(())
            }
            StreamState::HalfClosedRemote | StreamState::Closed => Err(StreamError::Closed),
            _ => Err(StreamError::UnexpectedDataFrame),
        }
    }

    /// Sending HEADERS frame
    pub(crate) fn send_headers(&mut self, eof: bool) -> Result<(), OperationError> {
        match self.state {
            StreamState::Idle => self.state = StreamState::Open,
            StreamState::ReservedLocal => self.state = StreamState::HalfClosedRemote,
            StreamState::Open | StreamState::HalfClosedRemote => {
                // trailers must end the stream
                if self.flags.contains(StreamFlags::SEND_HEADERS) && !eof {
                    return Err(OperationError::InvalidFrame);
                }
            }
            StreamState::HalfClosedLocal | StreamState::Closed => {
                return Err(OperationError::Closed)
            }
            StreamState::ReservedRemote => return Err(OperationError::InvalidFrame),
        }
        self.flags.insert(StreamFlags::SEND_HEADERS);
        if eof {
            self.close_send();
        }
        Ok(())
    }

    /// Sending DATA frame
    pub(crate) fn send_data(&mut self, eof: bool) -> Result<(), OperationError> {
        match self.state {
            StreamState::Open | StreamState::HalfClosedRemote
                if self.flags.contains(StreamFlags::SEND_HEADERS) =>
            {
                if eof {
                    self.close_send();
                }
                Ok(())
            }
            StreamState::HalfClosedLocal | StreamState::Closed => Err(OperationError::Closed),
            _ => Err(OperationError::InvalidFrame),
        }
    }
}

/// Per stream state, owned by the session
pub(crate) struct StreamInner {
    pub(crate) id: StreamId,
    pub(crate) status: StreamStatus,
    /// Credit granted by the peer
    pub(crate) send_window: Window,
    /// Credit granted to the peer
    pub(crate) recv_window: Window,
    /// Received bytes not consumed by the application
    pub(crate) recv_pending: WindowSize,
    pub(crate) listener: Arc<dyn StreamListener>,
}

impl StreamInner {
    pub(crate) fn new(
        id: StreamId,
        status: StreamStatus,
        send_window: WindowSize,
        recv_window: WindowSize,
        listener: Arc<dyn StreamListener>,
    ) -> Self {
        StreamInner {
            id,
            status,
            listener,
            send_window: Window::new(send_window as i32),
            recv_window: Window::new(recv_window as i32),
            recv_pending: 0,
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        self.status.state
    }

    pub(crate) fn is_remote(&self) -> bool {
        self.status.flags.contains(StreamFlags::REMOTE)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.status.state == StreamState::Closed
    }
}

impl fmt::Debug for StreamInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("state", &self.status.state)
            .field("flags", &self.status.flags)
            .field("send_window", &self.send_window.value())
            .field("recv_window", &self.recv_window.value())
            .finish()
    }
}

/// Stream handle
///
/// Does not keep the session alive, operations on a stream of a dropped
/// session fail with `OperationError::Closed`.
#[derive(Clone)]
pub struct StreamRef {
    id: StreamId,
    session: Weak<SessionShared>,
}

impl StreamRef {
    pub(crate) fn new(id: StreamId, session: Weak<SessionShared>) -> Self {
        StreamRef { id, session }
    }

    #[inline]
    /// Stream id
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Owning session, if it still exists
    pub fn session(&self) -> Option<Session> {
        self.session.upgrade().map(Session::from_shared)
    }

    /// Current state, `None` if the stream is removed from the session
    pub fn state(&self) -> Option<StreamState> {
        self.session().and_then(|s| s.stream_state(self.id))
    }

    /// Send response HEADERS
    pub fn send_response(&self, status: StatusCode, headers: HeaderMap, eof: bool, cb: Callback) {
        let pseudo = PseudoHeaders::response(status);
        self.send_headers(pseudo, headers, eof, cb)
    }

    /// Send HEADERS frame
    pub fn send_headers(&self, pseudo: PseudoHeaders, headers: HeaderMap, eof: bool, cb: Callback) {
        match self.session() {
            Some(s) => s.enqueue_frames(
                self,
                vec![Headers::new(self.id, pseudo, headers, eof).into()],
                cb,
            ),
            None => cb.fail(OperationError::Closed),
        }
    }

    /// Send DATA frame, the payload is split according to flow control
    pub fn send_data(&self, payload: Bytes, eof: bool, cb: Callback) {
        match self.session() {
            Some(s) => {
                let mut data = Data::new(self.id, payload);
                if eof {
                    data.set_end_stream();
                }
                s.enqueue_data(self, data, cb)
            }
            None => cb.fail(OperationError::Closed),
        }
    }

    /// Send trailers, ends the stream
    pub fn send_trailers(&self, headers: HeaderMap, cb: Callback) {
        match self.session() {
            Some(s) => s.enqueue_frames(self, vec![Headers::trailers(self.id, headers).into()], cb),
            None => cb.fail(OperationError::Closed),
        }
    }

    /// Reset the stream
    pub fn reset(&self, reason: Reason) {
        if let Some(s) = self.session() {
            s.reset_stream(self.id, reason)
        }
    }

    /// Promise a pushed response for this stream
    pub fn push(
        &self,
        pseudo: PseudoHeaders,
        headers: HeaderMap,
        listener: Arc<dyn StreamListener>,
        promise: Promise<StreamRef>,
    ) {
        match self.session() {
            Some(s) => s.push(
                self,
                PushPromise::new(self.id, StreamId::CON, pseudo, headers),
                listener,
                promise,
            ),
            None => promise.fail(OperationError::Closed),
        }
    }
}

impl PartialEq for StreamRef {
    fn eq(&self, other: &StreamRef) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.session, &other.session)
    }
}

impl fmt::Debug for StreamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRef")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Received data capacity
///
/// Consuming or dropping the capacity gives the credit back to the peer and
/// completes the DATA acknowledgement.
pub struct Capacity {
    stream: StreamRef,
    size: WindowSize,
    ack: Option<Callback>,
}

impl Capacity {
    pub(crate) fn new(stream: StreamRef, size: WindowSize, ack: Callback) -> Self {
        Capacity {
            stream,
            size,
            ack: Some(ack),
        }
    }

    #[inline]
    /// Size of the received data, including padding
    pub fn size(&self) -> WindowSize {
        self.size
    }

    /// Release the capacity
    pub fn consume(self) {}
}

impl Drop for Capacity {
    fn drop(&mut self) {
        if let Some(ack) = self.ack.take() {
            if let Some(s) = self.stream.session() {
                s.release_capacity(self.stream.id(), self.size);
            }
            ack.succeed();
        }
    }
}

impl fmt::Debug for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capacity")
            .field("stream", &self.stream.id())
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_stream() {
        let mut st = StreamStatus::new(StreamState::Idle, true);
        assert_eq!(st.recv_headers(false), Ok(HeadersKind::Initial));
        assert_eq!(st.state, StreamState::Open);
        assert!(st.send_data(false).is_err());
        assert!(st.recv_data(false).is_ok());
        assert!(st.recv_data(true).is_ok());
        assert_eq!(st.state, StreamState::HalfClosedRemote);
        assert_eq!(st.recv_data(false), Err(StreamError::Closed));

        assert!(st.send_headers(false).is_ok());
        assert!(st.send_data(true).is_ok());
        assert_eq!(st.state, StreamState::Closed);
        assert!(matches!(st.send_data(false), Err(OperationError::Closed)));
    }

    #[test]
    fn test_trailers() {
        let mut st = StreamStatus::new(StreamState::Idle, true);
        st.recv_headers(false).unwrap();
        assert_eq!(st.recv_headers(false), Err(StreamError::TrailersWithoutEos));
        assert_eq!(st.recv_headers(true), Ok(HeadersKind::Trailers));
        assert_eq!(st.state, StreamState::HalfClosedRemote);

        st.send_headers(false).unwrap();
        assert!(matches!(st.send_headers(false), Err(OperationError::InvalidFrame)));
        st.send_headers(true).unwrap();
        assert_eq!(st.state, StreamState::Closed);
    }

    #[test]
    fn test_reserved() {
        let mut st = StreamStatus::new(StreamState::ReservedLocal, false);
        assert!(st.is_recv_closed());
        assert!(st.send_data(false).is_err());
        st.send_headers(false).unwrap();
        assert_eq!(st.state, StreamState::HalfClosedRemote);

        let mut st = StreamStatus::new(StreamState::ReservedRemote, true);
        assert_eq!(st.recv_headers(true), Ok(HeadersKind::Initial));
        assert_eq!(st.state, StreamState::Closed);
    }

    #[test]
    fn test_client_stream() {
        let mut st = StreamStatus::new(StreamState::Idle, false);
        st.send_headers(true).unwrap();
        assert_eq!(st.state, StreamState::HalfClosedLocal);
        assert_eq!(st.recv_data(false), Err(StreamError::UnexpectedDataFrame));
        st.recv_headers(false).unwrap();
        st.recv_data(true).unwrap();
        assert_eq!(st.state, StreamState::Closed);
    }
}
