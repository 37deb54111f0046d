use std::{fmt, io, sync::Arc};

use ntex_bytes::ByteString;
use ntex_http::{uri::Scheme, HeaderMap, Method};

use crate::control::ControlService;
use crate::default::{DefaultControlService, DefaultStreamListener};
use crate::exec::{Exec, Flusher, IoFlusher};
use crate::frame::PseudoHeaders;
use crate::message::StreamListener;
use crate::session::{Role, Session, SessionState};
use crate::{config::Config, error::OperationError, stream::StreamRef};

/// Http2 client
#[derive(Clone)]
pub struct Client {
    session: Session,
    scheme: Scheme,
    authority: ByteString,
}

/// Http2 client builder
pub struct ClientBuilder {
    config: Config,
    scheme: Scheme,
    authority: ByteString,
    control: Arc<dyn ControlService>,
    push: Arc<dyn StreamListener>,
}

impl ClientBuilder {
    /// Create client builder for `authority`
    pub fn new(scheme: Scheme, authority: ByteString) -> Self {
        ClientBuilder {
            scheme,
            authority,
            config: Config::new(),
            control: Arc::new(DefaultControlService),
            push: Arc::new(DefaultStreamListener),
        }
    }

    /// Configure connection settings
    pub fn configure<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Config) -> Config,
    {
        self.config = f(self.config);
        self
    }

    /// Service to call with control frames
    pub fn control<C>(mut self, service: C) -> Self
    where
        C: ControlService + 'static,
    {
        self.control = Arc::new(service);
        self
    }

    /// Listener for streams pushed by the server
    ///
    /// By default pushed streams are cancelled.
    pub fn push_listener<L>(mut self, listener: L) -> Self
    where
        L: StreamListener + 'static,
    {
        self.push = Arc::new(listener);
        self
    }

    /// Start client session, the preface and local SETTINGS are queued
    /// immediately.
    pub fn handshake(self, flusher: Arc<dyn Flusher>) -> Client {
        let session = Session::new(Role::Client, self.config, flusher, self.push, self.control);
        Client {
            session,
            scheme: self.scheme,
            authority: self.authority,
        }
    }

    /// Start client session over `write`, outbound bytes are written by a
    /// writer task of `exec`.
    pub fn connect<W>(self, exec: &Exec, write: W) -> Client
    where
        W: io::Write + Send + 'static,
    {
        self.handshake(Arc::new(IoFlusher::new(exec, write)))
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("scheme", &self.scheme)
            .field("authority", &self.authority)
            .field("config", &self.config)
            .finish()
    }
}

impl Client {
    #[inline]
    /// Send request to the peer
    ///
    /// Response events are delivered to `listener`.
    pub fn send_request<L>(
        &self,
        method: Method,
        path: ByteString,
        headers: HeaderMap,
        eof: bool,
        listener: L,
    ) -> Result<StreamRef, OperationError>
    where
        L: StreamListener + 'static,
    {
        let pseudo = PseudoHeaders {
            method: Some(method),
            scheme: Some(ByteString::from(self.scheme.as_str())),
            authority: Some(self.authority.clone()),
            path: Some(path),
            status: None,
        };
        self.session
            .send_request(pseudo, headers, eof, Arc::new(listener))
    }

    #[inline]
    /// Read loop, returns once the connection is closed
    pub fn run<R: io::Read>(&self, read: R) -> Result<(), OperationError> {
        self.session.read_from(read)
    }

    #[inline]
    /// Gracefully close connection
    pub fn close(&self) {
        self.session.close()
    }

    #[inline]
    /// Check if connection is closed
    pub fn is_closed(&self) -> bool {
        self.session.state() == SessionState::Closed
    }

    #[inline]
    /// Get authority
    pub fn authority(&self) -> &ByteString {
        &self.authority
    }

    #[inline]
    /// Get number of active streams
    pub fn active_streams(&self) -> usize {
        self.session.active_streams()
    }

    #[inline]
    /// Underlying session
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("authority", &self.authority)
            .field("session", &self.session)
            .finish()
    }
}
