use std::{error::Error, fmt};

use ntex_http::StatusCode;
use ntex_util::HashMap;

use crate::error::HandlerError;

/// Selects error page for a failed request
pub trait ErrorMapper: Send + Sync {
    /// Context relative path of the error page, `None` if there is no page
    /// for the error.
    fn error_page(&self, status: StatusCode, err: Option<&HandlerError>, path: &str)
        -> Option<String>;
}

type Matcher = Box<dyn Fn(&(dyn Error + 'static)) -> bool + Send + Sync>;

/// Error pages by error type and by status code
///
/// Errors are matched first, the error chain is walked from the outermost
/// error, registered types are checked in registration order. Then the
/// status code is checked, then the default page.
#[derive(Default)]
pub struct ErrorPages {
    types: Vec<(&'static str, Matcher, String)>,
    statuses: HashMap<StatusCode, String>,
    default: Option<String>,
}

impl ErrorPages {
    pub fn new() -> Self {
        ErrorPages::default()
    }

    /// Error page for errors of type `T` anywhere in the error chain
    pub fn error<T: Error + 'static>(mut self, page: &str) -> Self {
        let matcher: Matcher = Box::new(|e: &(dyn Error + 'static)| e.is::<T>());
        self.types
            .push((std::any::type_name::<T>(), matcher, page.to_string()));
        self
    }

    /// Error page for status code
    pub fn status(mut self, status: StatusCode, page: &str) -> Self {
        self.statuses.insert(status, page.to_string());
        self
    }

    /// Error page for everything else
    pub fn default_page(mut self, page: &str) -> Self {
        self.default = Some(page.to_string());
        self
    }
}

impl ErrorMapper for ErrorPages {
    fn error_page(
        &self,
        status: StatusCode,
        err: Option<&HandlerError>,
        path: &str,
    ) -> Option<String> {
        if let Some(err) = err {
            for e in err.chain() {
                if let Some((name, _, page)) = self.types.iter().find(|(_, m, _)| m(e)) {
                    log::trace!("error page {:?} for {} at {:?}", page, name, path);
                    return Some(page.clone());
                }
            }
        }
        self.statuses
            .get(&status)
            .or(self.default.as_ref())
            .cloned()
    }
}

impl fmt::Debug for ErrorPages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorPages")
            .field(
                "types",
                &self.types.iter().map(|(n, _, p)| (n, p)).collect::<Vec<_>>(),
            )
            .field("statuses", &self.statuses)
            .field("default", &self.default)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[derive(thiserror::Error, Debug)]
    #[error("quiet: {0}")]
    struct Quiet(#[source] io::Error);

    #[test]
    fn test_error_page() {
        let pages = ErrorPages::new()
            .status(StatusCode::INTERNAL_SERVER_ERROR, "/error/500")
            .error::<io::Error>("/error/IOE");

        let err = HandlerError::new(Quiet(io::Error::new(io::ErrorKind::Other, "Test")));
        assert_eq!(
            pages
                .error_page(StatusCode::INTERNAL_SERVER_ERROR, Some(&err), "/startthrow")
                .as_deref(),
            Some("/error/IOE")
        );
        assert_eq!(
            pages
                .error_page(StatusCode::INTERNAL_SERVER_ERROR, None, "/expire")
                .as_deref(),
            Some("/error/500")
        );
        assert_eq!(pages.error_page(StatusCode::NOT_FOUND, None, "/x"), None);

        let pages = pages.default_page("/error/any");
        assert_eq!(
            pages.error_page(StatusCode::NOT_FOUND, None, "/x").as_deref(),
            Some("/error/any")
        );
    }
}
