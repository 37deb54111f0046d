//! Request container with asynchronous request lifecycle
//!
//! A [`Context`] routes requests to [`Handler`]s. A handler may suspend the
//! request with [`Request::start_async`], the returned [`AsyncContext`]
//! later re-enters the pipeline (`dispatch`), finishes the response
//! (`complete`) or expires. Errors escaping handlers or async listeners are
//! handed to an [`ErrorMapper`] which selects an error page.
use std::fmt;

mod async_context;
mod channel;
mod config;
mod context;
mod error_page;
mod local;
mod request;
mod response;
mod routes;
mod uri;

pub mod h2;

pub use self::async_context::{AsyncContext, AsyncEvent, AsyncListener, AsyncState};
pub use self::config::ContainerConfig;
pub use self::context::{Context, ContextBuilder};
pub use self::error_page::{ErrorMapper, ErrorPages};
pub use self::local::{ConnectorError, LocalConnector, LocalResponse};
pub use self::request::{Attribute, Request, RequestHead};
pub use self::response::{Response, ResponseHead, Transport};
pub use self::routes::{Handler, Route, Router, Routes};

/// Attributes captured at the first `start_async` of a request
pub const ASYNC_REQUEST_URI: &str = "container.async.request_uri";
pub const ASYNC_CONTEXT_PATH: &str = "container.async.context_path";
pub const ASYNC_SERVLET_PATH: &str = "container.async.servlet_path";
pub const ASYNC_PATH_INFO: &str = "container.async.path_info";
pub const ASYNC_QUERY_STRING: &str = "container.async.query_string";

/// Attributes of an ERROR dispatch
pub const ERROR_STATUS_CODE: &str = "container.error.status_code";
pub const ERROR_REQUEST_URI: &str = "container.error.request_uri";
pub const ERROR_EXCEPTION: &str = "container.error.exception";
pub const ERROR_EXCEPTION_TYPE: &str = "container.error.exception_type";
pub const ERROR_MESSAGE: &str = "container.error.message";

/// Attributes of a FORWARD dispatch, values of the request before forward
pub const FORWARD_REQUEST_URI: &str = "container.forward.request_uri";
pub const FORWARD_CONTEXT_PATH: &str = "container.forward.context_path";
pub const FORWARD_SERVLET_PATH: &str = "container.forward.servlet_path";
pub const FORWARD_PATH_INFO: &str = "container.forward.path_info";
pub const FORWARD_QUERY_STRING: &str = "container.forward.query_string";

/// Kind of the current handler invocation
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DispatchKind {
    /// Initial invocation
    Request,
    /// Re-entry after `AsyncContext::dispatch`
    Async,
    /// Error page
    Error,
    /// Server side redirect
    Forward,
}

impl DispatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchKind::Request => "REQUEST",
            DispatchKind::Async => "ASYNC",
            DispatchKind::Error => "ERROR",
            DispatchKind::Forward => "FORWARD",
        }
    }
}

impl fmt::Display for DispatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
