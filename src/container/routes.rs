use std::{fmt, sync::Arc};

use super::{request::Request, response::Response};
use crate::error::HandlerError;

/// Request handler
pub trait Handler: Send + Sync {
    fn handle(&self, req: &Request, resp: &Response) -> Result<(), HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&Request, &Response) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, req: &Request, resp: &Response) -> Result<(), HandlerError> {
        (self)(req, resp)
    }
}

/// Resolved handler for a context relative path
#[derive(Clone)]
pub struct Route {
    pub handler: Arc<dyn Handler>,
    /// Decoded matched part of the path
    pub servlet_path: String,
    /// Decoded remainder of the path
    pub path_info: Option<String>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("servlet_path", &self.servlet_path)
            .field("path_info", &self.path_info)
            .finish()
    }
}

/// Maps decoded context relative paths to handlers
pub trait Router: Send + Sync {
    fn route(&self, path: &str) -> Option<Route>;
}

enum Pattern {
    Exact(String),
    Prefix(String),
    Default,
}

/// Path mappings
///
/// Supported patterns are exact paths (`/path`), prefixes (`/path/*`) and
/// the default mapping (`/`). Exact matches win over prefixes, the longest
/// prefix wins over shorter ones.
#[derive(Default)]
pub struct Routes {
    routes: Vec<(Pattern, Arc<dyn Handler>)>,
}

impl Routes {
    pub fn new() -> Self {
        Routes::default()
    }

    /// Register handler for `pattern`
    pub fn route<H>(mut self, pattern: &str, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        let pattern = if pattern == "/" || pattern.is_empty() {
            Pattern::Default
        } else if let Some(prefix) = pattern.strip_suffix("/*") {
            Pattern::Prefix(prefix.to_string())
        } else {
            Pattern::Exact(pattern.to_string())
        };
        self.routes.push((pattern, Arc::new(handler)));
        self
    }
}

impl Router for Routes {
    fn route(&self, path: &str) -> Option<Route> {
        let path = if path.is_empty() { "/" } else { path };

        let exact = self.routes.iter().find_map(|(p, h)| match p {
            Pattern::Exact(p) if p == path => Some(h),
            _ => None,
        });
        if let Some(handler) = exact {
            return Some(Route {
                handler: handler.clone(),
                servlet_path: path.to_string(),
                path_info: None,
            });
        }

        let prefix = self
            .routes
            .iter()
            .filter_map(|(p, h)| match p {
                Pattern::Prefix(prefix) if matches_prefix(path, prefix) => Some((prefix, h)),
                _ => None,
            })
            .max_by_key(|(prefix, _)| prefix.len());
        if let Some((prefix, handler)) = prefix {
            let rest = &path[prefix.len()..];
            return Some(Route {
                handler: handler.clone(),
                servlet_path: prefix.clone(),
                path_info: if rest.is_empty() {
                    None
                } else {
                    Some(rest.to_string())
                },
            });
        }

        self.routes.iter().find_map(|(p, h)| match p {
            Pattern::Default => Some(Route {
                handler: h.clone(),
                servlet_path: path.to_string(),
                path_info: None,
            }),
            _ => None,
        })
    }
}

fn matches_prefix(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .map(|rest| rest.is_empty() || rest.starts_with('/'))
        .unwrap_or(false)
}

impl fmt::Debug for Routes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let patterns: Vec<_> = self
            .routes
            .iter()
            .map(|(p, _)| match p {
                Pattern::Exact(p) => p.clone(),
                Pattern::Prefix(p) => format!("{}/*", p),
                Pattern::Default => "/".to_string(),
            })
            .collect();
        f.debug_struct("Routes").field("patterns", &patterns).finish()
    }
}
