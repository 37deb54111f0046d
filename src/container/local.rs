use std::sync::{mpsc, Arc, Mutex};
use std::{fmt, time::Duration};

use ntex_bytes::{Bytes, BytesMut};
use ntex_http::{HeaderMap, StatusCode};

use super::context::Context;
use super::request::RequestHead;
use super::response::{ResponseHead, Transport};
use crate::{callback::Callback, error::ExecError};

/// Local connector errors
#[derive(thiserror::Error, Debug)]
pub enum ConnectorError {
    /// Response is not completed in time
    #[error("Response is not completed in time")]
    Timeout,
    /// Request cannot be scheduled
    #[error("Request is rejected: {0}")]
    Rejected(#[from] ExecError),
}

/// Complete response received through a [`LocalConnector`]
#[derive(Clone, Debug)]
pub struct LocalResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl LocalResponse {
    /// Body as utf-8 text, invalid sequences are replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// In-process connector
///
/// Runs requests through a [`Context`] without any network transport.
#[derive(Clone, Debug)]
pub struct LocalConnector {
    context: Context,
}

impl LocalConnector {
    pub fn new(context: Context) -> Self {
        LocalConnector { context }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Run request and wait for the completed response
    pub fn request(
        &self,
        head: RequestHead,
        timeout: Duration,
    ) -> Result<LocalResponse, ConnectorError> {
        let (tx, rx) = mpsc::channel();
        let transport = Arc::new(Capture {
            state: Mutex::new(CaptureState {
                head: None,
                body: BytesMut::new(),
                tx: Some(tx),
            }),
        });
        log::trace!("local request {} {:?}", head.method, head.target);
        self.context.handle(head, transport)?;
        rx.recv_timeout(timeout).map_err(|_| ConnectorError::Timeout)
    }
}

struct Capture {
    state: Mutex<CaptureState>,
}

struct CaptureState {
    head: Option<ResponseHead>,
    body: BytesMut,
    tx: Option<mpsc::Sender<LocalResponse>>,
}

impl Transport for Capture {
    fn write(&self, head: Option<ResponseHead>, body: Bytes, eof: bool, done: Callback) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if head.is_some() {
                state.head = head;
            }
            state.body.extend_from_slice(&body);

            if eof {
                if let Some(tx) = state.tx.take() {
                    let head = state.head.take().unwrap_or_else(|| ResponseHead {
                        status: StatusCode::OK,
                        headers: HeaderMap::new(),
                    });
                    let _ = tx.send(LocalResponse {
                        status: head.status,
                        headers: head.headers,
                        body: state.body.split().freeze(),
                    });
                }
            }
        }
        done.succeed();
    }
}

impl fmt::Debug for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capture").finish()
    }
}
