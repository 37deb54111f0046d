use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::fmt;

use ntex_bytes::Bytes;
use ntex_http::{header, HeaderMap, HeaderValue, Method};
use ntex_util::HashMap;

use super::async_context::AsyncContext;
use super::{channel::Channel, response::Response, uri, DispatchKind};
use crate::error::{AsyncError, HandlerError};

/// Request attribute value
#[derive(Clone, Debug)]
pub enum Attribute {
    Str(String),
    Int(i64),
    Error(HandlerError),
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Str(s) => f.write_str(s),
            Attribute::Int(n) => write!(f, "{}", n),
            Attribute::Error(e) => write!(f, "{}", e),
        }
    }
}

impl From<&str> for Attribute {
    fn from(s: &str) -> Self {
        Attribute::Str(s.to_string())
    }
}

impl From<String> for Attribute {
    fn from(s: String) -> Self {
        Attribute::Str(s)
    }
}

impl From<i64> for Attribute {
    fn from(n: i64) -> Self {
        Attribute::Int(n)
    }
}

impl From<HandlerError> for Attribute {
    fn from(e: HandlerError) -> Self {
        Attribute::Error(e)
    }
}

/// Received request
#[derive(Clone, Debug)]
pub struct RequestHead {
    pub method: Method,
    /// Request target as received, path and query are percent-encoded
    pub target: String,
    pub scheme: &'static str,
    /// Authority of the request, `Host` header is used if not set
    pub authority: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RequestHead {
    pub fn new(method: Method, target: &str) -> Self {
        RequestHead {
            method,
            target: target.to_string(),
            scheme: "http",
            authority: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }
}

/// Request handle
///
/// Cloned handles refer to the same request.
#[derive(Clone)]
pub struct Request(Arc<RequestInner>);

struct RequestInner {
    head: RequestHead,
    context_path: String,
    channel: Weak<Channel>,
    paths: Mutex<Paths>,
    attributes: Mutex<HashMap<String, Attribute>>,
}

/// Dispatch dependent part of the request
#[derive(Clone, Debug)]
pub(super) struct Paths {
    kind: DispatchKind,
    /// Encoded, includes context path
    request_uri: String,
    /// Decoded, context relative
    path: String,
    servlet_path: String,
    path_info: Option<String>,
    query: Option<String>,
}

impl Request {
    pub(super) fn new(head: RequestHead, context_path: &str, channel: Weak<Channel>) -> Self {
        let (path, query) = uri::split_query(&head.target);
        let paths = Paths {
            kind: DispatchKind::Request,
            request_uri: path.to_string(),
            path: uri::decode(path.strip_prefix(context_path).unwrap_or(path)),
            servlet_path: String::new(),
            path_info: None,
            query: query.map(|q| q.to_string()),
        };
        Request(Arc::new(RequestInner {
            channel,
            context_path: context_path.to_string(),
            paths: Mutex::new(paths),
            attributes: Mutex::new(HashMap::default()),
            head,
        }))
    }

    fn paths(&self) -> MutexGuard<'_, Paths> {
        self.0.paths.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn attributes(&self) -> MutexGuard<'_, HashMap<String, Attribute>> {
        self.0.attributes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn channel(&self) -> Result<Arc<Channel>, AsyncError> {
        self.0.channel.upgrade().ok_or(AsyncError::Detached)
    }

    pub fn method(&self) -> &Method {
        &self.0.head.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.0.head.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.0.head.body
    }

    pub fn scheme(&self) -> &'static str {
        self.0.head.scheme
    }

    pub fn context_path(&self) -> &str {
        &self.0.context_path
    }

    /// Kind of the current dispatch
    pub fn dispatch_kind(&self) -> DispatchKind {
        self.paths().kind
    }

    /// Request path with the context path, percent-encoded form is preserved
    pub fn request_uri(&self) -> String {
        self.paths().request_uri.clone()
    }

    /// Reconstructed request url, without query
    pub fn request_url(&self) -> String {
        let host = self
            .0
            .head
            .authority
            .as_deref()
            .or_else(|| {
                self.0
                    .head
                    .headers
                    .get(&header::HOST)
                    .and_then(|h| h.to_str().ok())
            })
            .unwrap_or("localhost");
        format!("{}://{}{}", self.0.head.scheme, host, self.paths().request_uri)
    }

    /// Encoded query string
    pub fn query_string(&self) -> Option<String> {
        self.paths().query.clone()
    }

    /// Decoded query parameter
    pub fn parameter(&self, name: &str) -> Option<String> {
        self.paths()
            .query
            .as_deref()
            .and_then(|q| uri::parameter(q, name))
    }

    /// Decoded path of the matched route
    pub fn servlet_path(&self) -> String {
        self.paths().servlet_path.clone()
    }

    /// Decoded path after the matched route
    pub fn path_info(&self) -> Option<String> {
        self.paths().path_info.clone()
    }

    pub fn attribute(&self, name: &str) -> Option<Attribute> {
        self.attributes().get(name).cloned()
    }

    pub fn set_attribute<T: Into<Attribute>>(&self, name: &str, value: T) {
        self.attributes().insert(name.to_string(), value.into());
    }

    pub fn remove_attribute(&self, name: &str) -> Option<Attribute> {
        self.attributes().remove(name)
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes().keys().cloned().collect()
    }

    /// Put request into async mode
    ///
    /// `dispatch()` without a path re-enters the pipeline at the original
    /// request uri.
    pub fn start_async(&self) -> Result<AsyncContext, AsyncError> {
        let channel = self.channel()?;
        let resp = channel.response().clone();
        channel.start_async(self.clone(), resp, None)
    }

    /// Put request into async mode with the given response
    ///
    /// `dispatch()` without a path re-enters the pipeline at the current,
    /// possibly forwarded, path of the request.
    pub fn start_async_with(&self, resp: &Response) -> Result<AsyncContext, AsyncError> {
        let channel = self.channel()?;
        let target = self.current_target();
        channel.start_async(self.clone(), resp.clone(), Some(target))
    }

    /// Async context of the current async cycle
    pub fn async_context(&self) -> Result<AsyncContext, AsyncError> {
        self.channel()?.async_context()
    }

    pub fn is_async_started(&self) -> bool {
        self.channel()
            .map(|ch| ch.is_async_started())
            .unwrap_or(false)
    }

    /// Server side redirect to a context relative `path`
    ///
    /// Runs the handler of `path` on the current thread, the request paths
    /// are restored afterwards.
    pub fn forward(&self, path: &str, resp: &Response) -> Result<(), HandlerError> {
        let channel = self.channel()?;
        resp.reset_buffer()?;

        let saved = self.paths().clone();
        if self.attribute(FORWARD_MARK).is_none() {
            let mut attrs = self.attributes();
            attrs.insert(FORWARD_MARK.to_string(), Attribute::Int(1));
            attrs.insert(
                super::FORWARD_REQUEST_URI.to_string(),
                saved.request_uri.clone().into(),
            );
            attrs.insert(
                super::FORWARD_CONTEXT_PATH.to_string(),
                self.0.context_path.clone().into(),
            );
            attrs.insert(
                super::FORWARD_SERVLET_PATH.to_string(),
                saved.servlet_path.clone().into(),
            );
            if let Some(ref info) = saved.path_info {
                attrs.insert(super::FORWARD_PATH_INFO.to_string(), info.clone().into());
            }
            if let Some(ref query) = saved.query {
                attrs.insert(super::FORWARD_QUERY_STRING.to_string(), query.clone().into());
            }
        }
        log::trace!("forward {:?} to {:?}", saved.request_uri, path);

        self.set_target(DispatchKind::Forward, path);
        let res = channel.invoke(self, resp);
        *self.paths() = saved;
        res
    }

    /// Context relative encoded path with query
    pub(super) fn current_target(&self) -> String {
        let paths = self.paths();
        let path = paths
            .request_uri
            .strip_prefix(self.0.context_path.as_str())
            .unwrap_or(&paths.request_uri);
        match paths.query {
            Some(ref q) => format!("{}?{}", path, q),
            None => path.to_string(),
        }
    }

    /// Decoded context relative path
    pub(super) fn path(&self) -> String {
        self.paths().path.clone()
    }

    /// Point request at a context relative encoded target
    pub(super) fn set_target(&self, kind: DispatchKind, target: &str) {
        let (path, query) = uri::split_query(target);
        let mut paths = self.paths();
        paths.kind = kind;
        paths.request_uri = format!("{}{}", self.0.context_path, path);
        paths.path = uri::decode(path);
        paths.servlet_path = String::new();
        paths.path_info = None;
        if let Some(q) = query {
            paths.query = Some(q.to_string());
        }
    }

    pub(super) fn set_kind(&self, kind: DispatchKind) {
        self.paths().kind = kind;
    }

    pub(super) fn set_route(&self, servlet_path: String, path_info: Option<String>) {
        let mut paths = self.paths();
        paths.servlet_path = servlet_path;
        paths.path_info = path_info;
    }

    /// Record request paths at the first start of async mode
    pub(super) fn capture_async_attributes(&self) {
        let paths = self.paths().clone();
        let mut attrs = self.attributes();
        if attrs.contains_key(super::ASYNC_REQUEST_URI) {
            return;
        }
        attrs.insert(super::ASYNC_REQUEST_URI.to_string(), paths.request_uri.into());
        attrs.insert(
            super::ASYNC_CONTEXT_PATH.to_string(),
            self.0.context_path.clone().into(),
        );
        attrs.insert(super::ASYNC_SERVLET_PATH.to_string(), paths.servlet_path.into());
        if let Some(info) = paths.path_info {
            attrs.insert(super::ASYNC_PATH_INFO.to_string(), info.into());
        }
        if let Some(query) = paths.query {
            attrs.insert(super::ASYNC_QUERY_STRING.to_string(), query.into());
        }
    }

    pub(super) fn ptr_eq(&self, other: &Request) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

const FORWARD_MARK: &str = "container.forward";

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let paths = self.paths();
        f.debug_struct("Request")
            .field("method", &self.0.head.method)
            .field("kind", &paths.kind)
            .field("request_uri", &paths.request_uri)
            .field("servlet_path", &paths.servlet_path)
            .field("path_info", &paths.path_info)
            .field("query", &paths.query)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let head = RequestHead::new(Method::GET, "/ctx/test/hello%2fthere?dispatch=true")
            .header(header::HOST, HeaderValue::from_static("localhost"));
        let req = Request::new(head, "/ctx", Weak::new());
        assert_eq!(req.request_uri(), "/ctx/test/hello%2fthere");
        assert_eq!(req.path(), "/test/hello/there");
        assert_eq!(req.query_string().as_deref(), Some("dispatch=true"));
        assert_eq!(req.parameter("dispatch").as_deref(), Some("true"));
        assert_eq!(req.current_target(), "/test/hello%2fthere?dispatch=true");

        req.set_target(DispatchKind::Async, "/test2/something%2felse");
        req.set_route("/test2".to_string(), Some("/something/else".to_string()));
        assert_eq!(req.dispatch_kind(), DispatchKind::Async);
        assert_eq!(req.request_uri(), "/ctx/test2/something%2felse");
        assert_eq!(
            req.request_url(),
            "http://localhost/ctx/test2/something%2felse"
        );
        assert_eq!(req.path_info().as_deref(), Some("/something/else"));
        assert_eq!(req.query_string().as_deref(), Some("dispatch=true"));

        assert!(matches!(req.start_async(), Err(AsyncError::Detached)));
    }

    #[test]
    fn test_async_attributes_captured_once() {
        let req = Request::new(RequestHead::new(Method::GET, "/ctx/a?x=1"), "/ctx", Weak::new());
        req.set_route("/a".to_string(), None);
        req.capture_async_attributes();

        req.set_target(DispatchKind::Async, "/b");
        req.set_route("/b".to_string(), None);
        req.capture_async_attributes();

        assert_eq!(
            req.attribute(super::super::ASYNC_SERVLET_PATH)
                .map(|a| a.to_string())
                .as_deref(),
            Some("/a")
        );
        assert_eq!(
            req.attribute(super::super::ASYNC_REQUEST_URI)
                .map(|a| a.to_string())
                .as_deref(),
            Some("/ctx/a")
        );
        assert!(req.attribute(super::super::ASYNC_PATH_INFO).is_none());
    }
}
