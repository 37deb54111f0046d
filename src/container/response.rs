use std::sync::{Arc, Mutex, MutexGuard};
use std::{fmt, mem};

use ntex_bytes::{Bytes, BytesMut};
use ntex_http::{header, HeaderMap, HeaderValue, StatusCode};

use crate::{callback::Callback, error::AsyncError};

/// Status line and headers of a response
#[derive(Clone, Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Outbound side of a request
pub trait Transport: Send + Sync {
    /// Write response bytes, `head` is passed with the first write only.
    ///
    /// `done` completes once the bytes are flushed. Calls are made in order.
    fn write(&self, head: Option<ResponseHead>, body: Bytes, eof: bool, done: Callback);
}

/// Buffered response
///
/// The body is buffered until `flush_buffer` or completion of the request,
/// the first flush commits status and headers.
#[derive(Clone)]
pub struct Response(Arc<ResponseInner>);

struct ResponseInner {
    transport: Arc<dyn Transport>,
    state: Mutex<ResponseState>,
    // keeps transport writes in order
    write: Mutex<()>,
}

struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    buffer: BytesMut,
    committed: bool,
    closed: bool,
}

impl Response {
    pub(super) fn new(transport: Arc<dyn Transport>) -> Self {
        Response(Arc::new(ResponseInner {
            transport,
            write: Mutex::new(()),
            state: Mutex::new(ResponseState {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                buffer: BytesMut::new(),
                committed: false,
                closed: false,
            }),
        }))
    }

    fn state(&self) -> MutexGuard<'_, ResponseState> {
        self.0.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> StatusCode {
        self.state().status
    }

    /// Set response status, ignored once the response is committed
    pub fn set_status(&self, status: StatusCode) {
        let mut state = self.state();
        if state.committed {
            log::debug!("response is committed, ignore status {}", status);
        } else {
            state.status = status;
        }
    }

    /// Set response header, ignored once the response is committed
    pub fn set_header(&self, name: header::HeaderName, value: HeaderValue) {
        let mut state = self.state();
        if !state.committed {
            state.headers.insert(name, value);
        }
    }

    pub fn header(&self, name: &header::HeaderName) -> Option<HeaderValue> {
        self.state().headers.get(name).cloned()
    }

    /// Append bytes to the body buffer
    pub fn write(&self, data: &[u8]) {
        let mut state = self.state();
        if state.closed {
            log::trace!("response is closed, drop {}B", data.len());
        } else {
            state.buffer.extend_from_slice(data);
        }
    }

    pub fn print(&self, s: &str) {
        self.write(s.as_bytes())
    }

    /// Buffered, not flushed body
    pub fn buffered(&self) -> Bytes {
        Bytes::copy_from_slice(&self.state().buffer)
    }

    /// Write status, headers and buffered body
    pub fn flush_buffer(&self) {
        let _write = self.0.write.lock().unwrap_or_else(|e| e.into_inner());
        let (head, body) = {
            let mut state = self.state();
            if state.closed {
                return;
            }
            let head = self.commit(&mut state);
            (head, state.buffer.split().freeze())
        };
        if head.is_some() || !body.is_empty() {
            self.0.transport.write(head, body, false, Callback::noop());
        }
    }

    pub fn is_committed(&self) -> bool {
        self.state().committed
    }

    /// Clear status, headers and body buffer
    pub fn reset(&self) -> Result<(), AsyncError> {
        let mut state = self.state();
        if state.committed {
            Err(AsyncError::IllegalState("COMMITTED"))
        } else {
            state.status = StatusCode::OK;
            state.headers.clear();
            state.buffer.clear();
            Ok(())
        }
    }

    /// Clear body buffer
    pub fn reset_buffer(&self) -> Result<(), AsyncError> {
        let mut state = self.state();
        if state.committed {
            Err(AsyncError::IllegalState("COMMITTED"))
        } else {
            state.buffer.clear();
            Ok(())
        }
    }

    /// Write remaining body and close the response
    pub(super) fn complete(&self, done: Callback) {
        let _write = self.0.write.lock().unwrap_or_else(|e| e.into_inner());
        let (head, body) = {
            let mut state = self.state();
            if state.closed {
                drop(state);
                done.succeed();
                return;
            }
            if !state.committed {
                let len = HeaderValue::from(state.buffer.len());
                state.headers.insert(header::CONTENT_LENGTH, len);
            }
            state.closed = true;
            let head = self.commit(&mut state);
            (head, state.buffer.split().freeze())
        };
        log::trace!("complete response, {}B", body.len());
        self.0.transport.write(head, body, true, done);
    }

    fn commit(&self, state: &mut ResponseState) -> Option<ResponseHead> {
        if state.committed {
            None
        } else {
            state.committed = true;
            Some(ResponseHead {
                status: state.status,
                headers: mem::take(&mut state.headers),
            })
        }
    }

    pub(super) fn ptr_eq(&self, other: &Response) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Response")
            .field("status", &state.status)
            .field("committed", &state.committed)
            .field("closed", &state.closed)
            .field("buffered", &state.buffer.len())
            .finish()
    }
}
