use std::{fmt, io, sync::Arc};

use crate::control::ControlService;
use crate::default::DefaultControlService;
use crate::error::OperationError;
use crate::exec::{Exec, Flusher, IoFlusher};
use crate::message::StreamListener;
use crate::session::{Role, Session};
use crate::config::Config;

/// Builds server with custom configuration values.
///
/// Methods can be chained in order to set the configuration values.
///
/// New instances of `Builder` are obtained via [`ServerBuilder::new`].
#[derive(Clone)]
pub struct ServerBuilder {
    config: Config,
    control: Arc<dyn ControlService>,
}

// ===== impl Builder =====

impl ServerBuilder {
    /// Returns a new server builder instance initialized with default
    /// configuration values.
    pub fn new() -> ServerBuilder {
        ServerBuilder {
            config: Config::new(),
            control: Arc::new(DefaultControlService),
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

    /// Creates a new configured HTTP/2 server.
    pub fn finish<L>(self, listener: L) -> Server
    where
        L: StreamListener + 'static,
    {
        Server {
            config: self.config,
            control: self.control,
            listener: Arc::new(listener),
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> ServerBuilder {
        ServerBuilder::new()
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .finish()
    }
}

/// HTTP/2 server
///
/// Creates server sessions for accepted connections.
#[derive(Clone)]
pub struct Server {
    config: Config,
    control: Arc<dyn ControlService>,
    listener: Arc<dyn StreamListener>,
}

impl Server {
    /// Server configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start server session, local SETTINGS are queued immediately.
    pub fn handshake(&self, flusher: Arc<dyn Flusher>) -> Session {
        Session::new(
            Role::Server,
            self.config.clone(),
            flusher,
            self.listener.clone(),
            self.control.clone(),
        )
    }

    /// Serve one connection until the peer disconnects
    ///
    /// Outbound bytes are written by a writer task of `exec`.
    pub fn serve<R, W>(&self, exec: &Exec, read: R, write: W) -> Result<(), OperationError>
    where
        R: io::Read,
        W: io::Write + Send + 'static,
    {
        let flusher = Arc::new(IoFlusher::new(exec, write));
        let session = self.handshake(flusher);
        log::debug!("serving http/2 session");
        let res = session.read_from(read);
        session.close();
        res
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .finish()
    }
}
