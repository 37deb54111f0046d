//! HTTP/2 front end of a [`Context`]
//!
//! [`H2Handler`] is a stream listener that turns inbound streams into
//! container requests, responses are written back to the stream.
use std::{fmt, sync::Arc, sync::Mutex};

use ntex_bytes::{Bytes, BytesMut};
use ntex_http::Method;
use ntex_util::HashMap;

use super::context::Context;
use super::request::RequestHead;
use super::response::{ResponseHead, Transport};
use crate::callback::Callback;
use crate::frame::{Reason, StreamId};
use crate::message::{ListenerError, Message, MessageKind, StreamEof, StreamListener};
use crate::registry::{RegistryError, SessionTracker};
use crate::stream::StreamRef;

/// Stream listener that runs requests through a [`Context`]
pub struct H2Handler {
    context: Context,
    tracker: Arc<SessionTracker>,
    pending: Mutex<HashMap<StreamId, (RequestHead, BytesMut)>>,
}

impl H2Handler {
    /// Create handler, sessions are tracked in the context registry
    pub fn new(context: Context) -> Result<Self, RegistryError> {
        let tracker = context.registry().get_or_init(
            context.context_path(),
            SessionTracker::KEY,
            SessionTracker::default,
        )?;
        Ok(H2Handler {
            context,
            tracker,
            pending: Mutex::new(HashMap::default()),
        })
    }

    /// Open sessions served by the handler
    pub fn sessions(&self) -> &SessionTracker {
        &self.tracker
    }

    fn dispatch(&self, stream: StreamRef, head: RequestHead) -> Result<(), ListenerError> {
        log::trace!("{:?}: dispatch {} {:?}", stream.id(), head.method, head.target);
        let transport = Arc::new(H2Transport { stream });
        self.context.handle(head, transport)?;
        Ok(())
    }

    fn take_pending(&self, id: StreamId) -> Option<(RequestHead, BytesMut)> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
    }
}

impl StreamListener for H2Handler {
    fn on_message(&self, msg: Message) -> Result<(), ListenerError> {
        let (stream, kind) = msg.into_parts();
        let id = stream.id();

        match kind {
            MessageKind::Headers {
                pseudo,
                headers,
                eof,
            } => {
                if let Some(session) = stream.session() {
                    if self.tracker.add(&session) {
                        log::debug!("track new session for {:?}", self.context.context_path());
                    }
                }

                let method = pseudo.method.unwrap_or(Method::GET);
                let path = pseudo.path.as_deref().unwrap_or("/");
                let mut head = RequestHead::new(method, path);
                head.headers = headers;
                head.authority = pseudo.authority.map(|a| a.to_string());
                if pseudo.scheme.as_deref() == Some("https") {
                    head.scheme = "https";
                }

                if eof {
                    self.dispatch(stream, head)
                } else {
                    self.pending
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(id, (head, BytesMut::new()));
                    Ok(())
                }
            }
            MessageKind::Data(data, cap) => {
                if let Some((_, body)) = self
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .get_mut(&id)
                {
                    body.extend_from_slice(&data);
                }
                cap.consume();
                Ok(())
            }
            MessageKind::Eof(StreamEof::Data(data)) => match self.take_pending(id) {
                Some((head, mut body)) => {
                    body.extend_from_slice(&data);
                    self.dispatch(stream, head.body(body.freeze()))
                }
                None => Ok(()),
            },
            MessageKind::Eof(StreamEof::Trailers(_)) => match self.take_pending(id) {
                Some((head, body)) => self.dispatch(stream, head.body(body.freeze())),
                None => Ok(()),
            },
            MessageKind::Eof(StreamEof::Error(err)) => {
                log::debug!("{:?}: stream failed: {}", id, err);
                self.take_pending(id);
                Ok(())
            }
            MessageKind::Disconnect(err) => {
                log::debug!("{:?}: stream is disconnected: {}", id, err);
                self.take_pending(id);
                Ok(())
            }
            MessageKind::Push { stream, .. } => {
                stream.reset(Reason::REFUSED_STREAM);
                Ok(())
            }
            MessageKind::Empty => Ok(()),
        }
    }
}

impl fmt::Debug for H2Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("H2Handler")
            .field("context", &self.context)
            .field("sessions", &self.tracker.len())
            .finish()
    }
}

/// Writes container responses to an HTTP/2 stream
struct H2Transport {
    stream: StreamRef,
}

impl Transport for H2Transport {
    fn write(&self, head: Option<ResponseHead>, body: Bytes, eof: bool, done: Callback) {
        match head {
            Some(head) if body.is_empty() => {
                self.stream.send_response(head.status, head.headers, eof, done);
            }
            Some(head) => {
                self.stream
                    .send_response(head.status, head.headers, false, Callback::noop());
                self.stream.send_data(body, eof, done);
            }
            None if body.is_empty() && !eof => done.succeed(),
            None => self.stream.send_data(body, eof, done),
        }
    }
}
